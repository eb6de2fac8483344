//! Claude Code state detector.
//!
//! Screen layout of the Claude Code TUI:
//!
//! ```text
//! [content area: responses, ⏺ tool boxes]
//! ────────────────────
//! ❯  (prompt)
//! ```
//!
//! Detection order: trust dialog (startup) → confirmation → busy
//! (`esc to interrupt`) → idle (prompt) → error.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::parser::{
    ConfirmType, ParserContext, ParserMeta, SessionState, StateDetection, StateMeta, StateParser,
};
use crate::pattern::PROMPT_LINE;

static OPTION_CONFIRM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^[\s❯>]*1\.\s*(Yes|Allow)").unwrap());

static YES_NO_CONFIRM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Y/n\]|\[y/N\]|\(yes/no\)|Allow\?|Do you want to proceed").unwrap());

/// Claude Code state detector (priority 100).
pub struct ClaudeCodeStateParser {
    meta: ParserMeta,
}

impl Default for ClaudeCodeStateParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCodeStateParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("claude-code-state", 100)
                .with_description("Detects Claude Code CLI states"),
        }
    }

    fn is_busy(&self, text: &str) -> bool {
        text.contains("esc to interrupt") || text.contains("ESC to interrupt")
    }

    fn is_option_confirm(&self, text: &str) -> bool {
        OPTION_CONFIRM.is_match(text) && text.contains("Esc to cancel")
    }

    fn is_yes_no_confirm(&self, text: &str) -> bool {
        YES_NO_CONFIRM.is_match(text)
    }

    fn has_prompt(&self, lines: &[String]) -> bool {
        lines.iter().any(|l| PROMPT_LINE.is_match(l.trim()))
    }
}

impl StateParser for ClaudeCodeStateParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn detect_state(&self, ctx: &ParserContext) -> Option<StateDetection> {
        let text = ctx.window_text();

        // Trust dialog during startup: surfaced via metadata so the driver
        // can answer it automatically.
        if ctx.current_state == Some(SessionState::Starting)
            && (text.contains("Yes, proceed") || text.contains("Yes, I trust this folder"))
            && text.contains("Enter to confirm")
        {
            return Some(
                StateDetection::new(SessionState::Starting, 0.95).with_meta(StateMeta {
                    needs_trust_confirm: Some(true),
                    ..StateMeta::default()
                }),
            );
        }

        let is_option_confirm = self.is_option_confirm(&text);
        if is_option_confirm || self.is_yes_no_confirm(&text) {
            let confirm_type = if is_option_confirm {
                ConfirmType::Options
            } else {
                ConfirmType::YesNo
            };
            return Some(
                StateDetection::new(SessionState::Confirming, 0.95).with_meta(StateMeta {
                    confirm_type: Some(confirm_type),
                    ..StateMeta::default()
                }),
            );
        }

        if self.is_busy(&text) {
            // Tool boxes render a ⏺ header with │-prefixed detail lines;
            // their co-occurrence disambiguates tool_running from thinking.
            if text.contains('⏺') && text.contains('│') {
                return Some(StateDetection::new(SessionState::ToolRunning, 0.85));
            }
            return Some(StateDetection::new(SessionState::Thinking, 0.9));
        }

        if self.has_prompt(&ctx.last_lines) {
            return Some(StateDetection::new(SessionState::Idle, 0.9));
        }

        if text.contains("Error:") || text.contains("error:") || text.contains('✖') {
            return Some(StateDetection::new(SessionState::Error, 0.7));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(lines: &[&str]) -> ParserContext {
        ParserContext::from_lines(lines.iter().map(|s| s.to_string()).collect())
    }

    fn ctx_with_state(lines: &[&str], state: SessionState) -> ParserContext {
        ctx(lines).with_state(state)
    }

    #[test]
    fn test_idle_with_prompt() {
        let parser = ClaudeCodeStateParser::new();

        let result = parser.detect_state(&ctx(&["some earlier output", "❯ "])).unwrap();
        assert_eq!(result.state, SessionState::Idle);
        assert!(result.confidence >= 0.9);

        let result = parser.detect_state(&ctx(&["> "])).unwrap();
        assert_eq!(result.state, SessionState::Idle);
    }

    #[test]
    fn test_thinking_from_statusbar() {
        let parser = ClaudeCodeStateParser::new();
        let result = parser
            .detect_state(&ctx(&["· Precipitating… (esc to interrupt · thinking)"]))
            .unwrap();
        assert_eq!(result.state, SessionState::Thinking);
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn test_tool_running_with_tool_box() {
        let parser = ClaudeCodeStateParser::new();
        let result = parser
            .detect_state(&ctx(&[
                "⏺ Bash",
                "  │ command: \"cargo build\"",
                "✻ Running… (esc to interrupt)",
            ]))
            .unwrap();
        assert_eq!(result.state, SessionState::ToolRunning);
        assert!((result.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confirming_options() {
        let parser = ClaudeCodeStateParser::new();
        let result = parser
            .detect_state(&ctx(&[
                "xjp-mcp - xjp_secret_get(key: \"test\")",
                "❯ 1. Yes, allow this action",
                "  2. Yes, allow for this session",
                "  3. No, deny this action",
                "Esc to cancel",
            ]))
            .unwrap();
        assert_eq!(result.state, SessionState::Confirming);
        assert_eq!(
            result.meta.unwrap().confirm_type,
            Some(ConfirmType::Options)
        );
    }

    #[test]
    fn test_confirming_yes_no() {
        let parser = ClaudeCodeStateParser::new();

        let result = parser
            .detect_state(&ctx(&["Do you want to continue? [Y/n]"]))
            .unwrap();
        assert_eq!(result.state, SessionState::Confirming);
        assert_eq!(result.meta.unwrap().confirm_type, Some(ConfirmType::YesNo));

        let result = parser.detect_state(&ctx(&["Proceed? (yes/no)"])).unwrap();
        assert_eq!(result.state, SessionState::Confirming);
    }

    #[test]
    fn test_trust_dialog_during_startup() {
        let parser = ClaudeCodeStateParser::new();
        let result = parser
            .detect_state(&ctx_with_state(
                &[
                    "Do you trust this project?",
                    "Yes, proceed",
                    "Enter to confirm",
                ],
                SessionState::Starting,
            ))
            .unwrap();
        assert_eq!(result.state, SessionState::Starting);
        assert_eq!(result.meta.unwrap().needs_trust_confirm, Some(true));
    }

    #[test]
    fn test_trust_dialog_ignored_outside_startup() {
        let parser = ClaudeCodeStateParser::new();
        // Same text without the Starting hint falls through to other rules.
        let result = parser.detect_state(&ctx(&[
            "Do you trust this project?",
            "Yes, proceed",
            "Enter to confirm",
        ]));
        assert!(result.is_none() || result.unwrap().state != SessionState::Starting);
    }

    #[test]
    fn test_error_markers() {
        let parser = ClaudeCodeStateParser::new();

        let result = parser.detect_state(&ctx(&["✖ Failed to reach API"])).unwrap();
        assert_eq!(result.state, SessionState::Error);
        assert!((result.confidence - 0.7).abs() < f64::EPSILON);

        let result = parser
            .detect_state(&ctx(&["Error: network unreachable"]))
            .unwrap();
        assert_eq!(result.state, SessionState::Error);
    }

    #[test]
    fn test_busy_wins_over_prompt() {
        let parser = ClaudeCodeStateParser::new();
        // Claude Code keeps the prompt visible while thinking.
        let result = parser
            .detect_state(&ctx(&[
                "✳ Determining… (esc to interrupt)",
                "────────────────────",
                "❯ ",
            ]))
            .unwrap();
        assert_eq!(result.state, SessionState::Thinking);
    }

    #[test]
    fn test_no_detection() {
        let parser = ClaudeCodeStateParser::new();
        assert!(parser
            .detect_state(&ctx(&["random text", "nothing special"]))
            .is_none());
    }
}
