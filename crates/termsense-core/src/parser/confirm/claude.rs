//! Claude Code confirmation detector.
//!
//! Handles the numbered-options dialog (`❯ 1. Yes, allow…` + `Esc to
//! cancel`) and the plain Y/n style, extracts the tool line
//! (`server - tool_name(key: "v") (MCP)`), and formats responses.
//!
//! Two response strategies exist for option dialogs: arrow-key navigation
//! (`\x1b[B` + Enter, correct for current Claude Code builds) and literal
//! option numbers (`2\r`, used by older builds). The strategy is a preset
//! option; arrow keys are the default.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::{
    ConfirmAction, ConfirmInfo, ConfirmOption, ConfirmParser, ConfirmResponse, ConfirmType,
    ParserContext, ParserMeta, ToolRequest,
};

static OPTION_CONFIRM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^[\s❯>]*1\.\s*(Yes|Allow)").unwrap());
static YES_NO_CONFIRM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Y/n\]|\[y/N\]|\(yes/no\)|Allow\?|Do you want to proceed").unwrap());
static TOOL_INFO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S+)\s*-\s*(\w+)\s*\(([^)]*)\)(?:\s*\(MCP\))?").unwrap());
static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+):\s*("[^"]*"|[^,)]+)"#).unwrap());
static OPTION_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s❯>]*(\d+)\.\s*(.+)$").unwrap());
static YN_CLEANUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\[Y/n\].*|\s*\[y/N\].*|\s*\(yes/no\).*").unwrap());

const DOWN: &str = "\x1b[B";

/// How option-dialog responses are written to the PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStrategy {
    /// Navigate with arrow keys and press Enter (current Claude Code)
    #[default]
    ArrowKeys,
    /// Type the literal option number (older Claude Code builds)
    Numbers,
}

/// Claude Code confirmation detector (priority 100).
pub struct ClaudeCodeConfirmParser {
    meta: ParserMeta,
    strategy: ConfirmStrategy,
}

impl Default for ClaudeCodeConfirmParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCodeConfirmParser {
    pub fn new() -> Self {
        Self::with_strategy(ConfirmStrategy::default())
    }

    /// Create a parser using the given response strategy.
    pub fn with_strategy(strategy: ConfirmStrategy) -> Self {
        Self {
            meta: ParserMeta::new("claude-code-confirm", 100)
                .with_description("Parses Claude Code tool confirmation dialogs"),
            strategy,
        }
    }

    /// The configured response strategy.
    pub fn strategy(&self) -> ConfirmStrategy {
        self.strategy
    }

    fn is_option_confirm(text: &str) -> bool {
        OPTION_CONFIRM.is_match(text) && text.contains("Esc to cancel")
    }

    fn is_yes_no_confirm(text: &str) -> bool {
        YES_NO_CONFIRM.is_match(text)
    }

    /// Extract tool info from a line shaped `server - tool(k: "v") (MCP)`.
    fn parse_tool(text: &str) -> Option<ToolRequest> {
        let caps = TOOL_INFO.captures(text)?;
        let mcp_server = caps.get(1)?.as_str().to_string();
        let name = caps.get(2)?.as_str().to_string();
        let params_str = caps.get(3)?.as_str();

        let mut params = HashMap::new();
        for caps in PARAM.captures_iter(params_str) {
            if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
                let key = key.as_str().to_string();
                let mut value = value.as_str().trim().to_string();
                if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
                    value = value[1..value.len() - 1].to_string();
                }
                params.insert(key, value);
            }
        }

        Some(ToolRequest {
            name,
            mcp_server: Some(mcp_server),
            params,
        })
    }

    /// Collect every `n. label` line.
    fn parse_options(text: &str) -> Option<Vec<ConfirmOption>> {
        let mut options = Vec::new();
        for line in text.lines() {
            if let Some(caps) = OPTION_LINE.captures(line) {
                if let (Some(num), Some(label)) = (caps.get(1), caps.get(2)) {
                    if let Ok(n) = num.as_str().parse::<u32>() {
                        options.push(ConfirmOption {
                            key: n.to_string(),
                            label: label.as_str().trim().to_string(),
                            is_default: n == 1,
                        });
                    }
                }
            }
        }
        (!options.is_empty()).then_some(options)
    }

    /// The question text: everything before the options or the Y/n marker.
    fn extract_prompt(text: &str) -> String {
        let mut prompt_lines = Vec::new();
        for line in text.lines() {
            if OPTION_LINE.is_match(line) {
                break;
            }
            if YES_NO_CONFIRM.is_match(line) {
                let cleaned = YN_CLEANUP.replace(line, "");
                let trimmed = cleaned.trim();
                if !trimmed.is_empty() {
                    prompt_lines.push(trimmed.to_string());
                }
                break;
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                prompt_lines.push(trimmed.to_string());
            }
        }
        prompt_lines.join("\n")
    }

    fn select_bytes(&self, option: u32) -> Vec<u8> {
        match self.strategy {
            ConfirmStrategy::ArrowKeys => {
                let mut out = String::new();
                for _ in 1..option.max(1) {
                    out.push_str(DOWN);
                }
                out.push('\r');
                out.into_bytes()
            }
            ConfirmStrategy::Numbers => format!("{option}\r").into_bytes(),
        }
    }

    /// Index of the first option whose label reads as a refusal.
    fn deny_option(info: &ConfirmInfo) -> u32 {
        info.options
            .as_ref()
            .and_then(|opts| {
                opts.iter().find(|o| {
                    let label = o.label.to_lowercase();
                    label.starts_with("no") || label.contains("deny")
                })
            })
            .and_then(|o| o.key.parse().ok())
            // The canonical tool dialog puts "No, deny" third.
            .unwrap_or(3)
    }
}

impl ConfirmParser for ClaudeCodeConfirmParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn detect_confirm(&self, ctx: &ParserContext) -> Option<ConfirmInfo> {
        let text = ctx.window_text();

        if Self::is_option_confirm(&text) {
            return Some(ConfirmInfo {
                confirm_type: ConfirmType::Options,
                prompt: Self::extract_prompt(&text),
                options: Self::parse_options(&text),
                tool: Self::parse_tool(&text),
                raw_prompt: text,
            });
        }

        if Self::is_yes_no_confirm(&text) {
            return Some(ConfirmInfo {
                confirm_type: ConfirmType::YesNo,
                prompt: Self::extract_prompt(&text),
                options: Some(vec![
                    ConfirmOption {
                        key: "y".to_string(),
                        label: "Yes".to_string(),
                        is_default: true,
                    },
                    ConfirmOption {
                        key: "n".to_string(),
                        label: "No".to_string(),
                        is_default: false,
                    },
                ]),
                tool: None,
                raw_prompt: text,
            });
        }

        None
    }

    fn format_response(&self, info: &ConfirmInfo, response: &ConfirmResponse) -> Vec<u8> {
        match response.action {
            ConfirmAction::Confirm => match info.confirm_type {
                // The first option is pre-selected; Enter accepts it.
                ConfirmType::Options => b"\r".to_vec(),
                ConfirmType::YesNo | ConfirmType::Input => b"y\r".to_vec(),
            },
            ConfirmAction::Deny => match info.confirm_type {
                ConfirmType::Options => self.select_bytes(Self::deny_option(info)),
                ConfirmType::YesNo | ConfirmType::Input => b"n\r".to_vec(),
            },
            ConfirmAction::Select => {
                let option = response.option.unwrap_or(1);
                match info.confirm_type {
                    ConfirmType::Options => self.select_bytes(option),
                    ConfirmType::YesNo | ConfirmType::Input => {
                        if option == 1 {
                            b"y\r".to_vec()
                        } else {
                            b"n\r".to_vec()
                        }
                    }
                }
            }
            ConfirmAction::Input => {
                let mut bytes = response
                    .value
                    .as_deref()
                    .unwrap_or_default()
                    .as_bytes()
                    .to_vec();
                bytes.push(b'\r');
                bytes
            }
        }
    }
}
