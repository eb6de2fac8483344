//! Claude Code status-bar classifier.
//!
//! Matches lines like `· Precipitating… (esc to interrupt · thinking)`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::{OutputData, OutputParser, ParserContext, ParserMeta, SemanticOutput};

/// Spinner characters used in the status bar.
pub const SPINNER_CHARS: &[char] = &['·', '✻', '✽', '✶', '✳', '✢'];

static STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([·✻✽✶✳✢])\s+(\S+…?)\s*\((?:esc|ESC)\s+to\s+interrupt(?:\s*·\s*(\w+))?\)")
        .unwrap()
});

/// Processing phase shown in the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    Thinking,
    ToolRunning,
    Unknown,
}

/// Parsed status-bar payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeStatusData {
    /// Spinner glyph
    pub spinner: String,
    /// Status text, e.g. `Precipitating…`
    pub status_text: String,
    /// Inferred phase
    pub phase: StatusPhase,
    /// Whether the operation can be interrupted
    pub interruptible: bool,
}

/// Status-bar classifier (priority 95).
pub struct ClaudeStatusParser {
    meta: ParserMeta,
}

impl Default for ClaudeStatusParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeStatusParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("claude-status", 95)
                .with_description("Parses the Claude Code status bar (spinner + status text)"),
        }
    }

    fn phase_for(status_text: &str, hint: Option<&str>) -> StatusPhase {
        match hint {
            Some("thinking") => return StatusPhase::Thinking,
            Some("tool") => return StatusPhase::ToolRunning,
            _ => {}
        }
        if status_text.to_lowercase().contains("tool") {
            return StatusPhase::ToolRunning;
        }
        // A spinner without an explicit hint still means active processing.
        StatusPhase::Thinking
    }
}

impl OutputParser for ClaudeStatusParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn can_parse(&self, ctx: &ParserContext) -> bool {
        ctx.last_lines.iter().any(|l| STATUS.is_match(l.trim()))
    }

    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        for line in &ctx.last_lines {
            let trimmed = line.trim();
            if let Some(caps) = STATUS.captures(trimmed) {
                let spinner = caps.get(1)?.as_str().to_string();
                let status_text = caps.get(2)?.as_str().to_string();
                let hint = caps.get(3).map(|m| m.as_str());

                let phase = Self::phase_for(&status_text, hint);

                return Some(SemanticOutput {
                    raw: trimmed.to_string(),
                    data: OutputData::ClaudeStatus(ClaudeStatusData {
                        spinner,
                        status_text,
                        phase,
                        interruptible: true,
                    }),
                    confidence: 0.95,
                    parser_name: self.meta.name.clone(),
                });
            }
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

    fn status_of(out: &SemanticOutput) -> &ClaudeStatusData {
        match &out.data {
            OutputData::ClaudeStatus(s) => s,
            other => panic!("expected claude-status payload, got {other:?}"),
        }
    }

    #[test]
    fn test_full_status_with_thinking_hint() {
        let parser = ClaudeStatusParser::new();
        let out = parser
            .parse(&ctx(&["· Precipitating… (esc to interrupt · thinking)"]))
            .unwrap();
        assert_eq!(out.confidence, 0.95);

        let status = status_of(&out);
        assert_eq!(status.spinner, "·");
        assert_eq!(status.status_text, "Precipitating…");
        assert_eq!(status.phase, StatusPhase::Thinking);
        assert!(status.interruptible);
    }

    #[test]
    fn test_status_without_hint_defaults_to_thinking() {
        let parser = ClaudeStatusParser::new();
        let out = parser
            .parse(&ctx(&["✻ Schlepping… (esc to interrupt)"]))
            .unwrap();
        let status = status_of(&out);
        assert_eq!(status.spinner, "✻");
        assert_eq!(status.phase, StatusPhase::Thinking);
    }

    #[test]
    fn test_tool_hint() {
        let parser = ClaudeStatusParser::new();
        let out = parser
            .parse(&ctx(&["✶ Running… (esc to interrupt · tool)"]))
            .unwrap();
        assert_eq!(status_of(&out).phase, StatusPhase::ToolRunning);
    }

    #[test]
    fn test_tool_in_status_text() {
        let parser = ClaudeStatusParser::new();
        let out = parser.parse(&ctx(&["✳ Tool… (esc to interrupt)"])).unwrap();
        assert_eq!(status_of(&out).phase, StatusPhase::ToolRunning);
    }

    #[test]
    fn test_all_spinners_and_case_insensitive_esc() {
        let parser = ClaudeStatusParser::new();
        for spinner in SPINNER_CHARS {
            let line = format!("{spinner} Working… (ESC to interrupt)");
            let out = parser.parse(&ctx(&[&line])).unwrap();
            assert_eq!(status_of(&out).spinner, spinner.to_string());
        }
    }

    #[test]
    fn test_finds_status_among_other_lines() {
        let parser = ClaudeStatusParser::new();
        let context = ctx(&[
            "Some output",
            "  ✽ Processing… (esc to interrupt · thinking)",
            "❯ ",
        ]);
        assert!(parser.can_parse(&context));
        assert_eq!(status_of(&parser.parse(&context).unwrap()).status_text, "Processing…");
    }

    #[test]
    fn test_rejects_non_status() {
        let parser = ClaudeStatusParser::new();
        assert!(!parser.can_parse(&ctx(&["❯ "])));
        assert!(parser.parse(&ctx(&["· Missing the suffix"])).is_none());
        assert!(parser.parse(&ctx(&["X Bogus… (esc to interrupt)"])).is_none());
    }
}
