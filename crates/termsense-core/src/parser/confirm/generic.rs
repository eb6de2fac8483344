//! Generic Y/N confirmation detector.
//!
//! A table of prompt patterns with their default answer; responses are the
//! literal bytes `y\r`, `n\r`, or the free-form value.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::parser::{
    ConfirmAction, ConfirmInfo, ConfirmOption, ConfirmParser, ConfirmResponse, ConfirmType,
    ParserContext, ParserMeta,
};

struct PromptPattern {
    pattern: &'static Lazy<Regex>,
    default_yes: bool,
}

static BRACKET_YES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[Y/n\]").unwrap());
static BRACKET_NO: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[y/N\]").unwrap());
static YES_NO_WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(yes/no\)").unwrap());
static CONTINUE_Q: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Continue\?").unwrap());
static ARE_YOU_SURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Are you sure\?").unwrap());
static PROCEED_Q: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Proceed\?").unwrap());
static OVERWRITE_Q: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Overwrite\?").unwrap());
static DELETE_Q: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Delete\?").unwrap());

static PATTERNS: &[PromptPattern] = &[
    PromptPattern { pattern: &BRACKET_YES, default_yes: true },
    PromptPattern { pattern: &BRACKET_NO, default_yes: false },
    PromptPattern { pattern: &YES_NO_WORDS, default_yes: true },
    PromptPattern { pattern: &CONTINUE_Q, default_yes: true },
    PromptPattern { pattern: &ARE_YOU_SURE, default_yes: false },
    PromptPattern { pattern: &PROCEED_Q, default_yes: true },
    PromptPattern { pattern: &OVERWRITE_Q, default_yes: false },
    PromptPattern { pattern: &DELETE_Q, default_yes: false },
];

/// Prompt-suffix cleanup for the extracted question.
static SUFFIX_CLEANUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[[YyNn]/[YyNn]\].*$|\s*\(yes/no\).*$").unwrap());

/// Generic Y/N confirmation detector (priority 10).
pub struct GenericYesNoParser {
    meta: ParserMeta,
}

impl Default for GenericYesNoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericYesNoParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("generic-yesno-confirm", 10)
                .with_description("Detects plain [Y/n]-style confirmation prompts"),
        }
    }
}

impl ConfirmParser for GenericYesNoParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn detect_confirm(&self, ctx: &ParserContext) -> Option<ConfirmInfo> {
        for line in ctx.last_lines.iter().rev() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            for entry in PATTERNS {
                if entry.pattern.is_match(trimmed) {
                    let prompt = SUFFIX_CLEANUP.replace(trimmed, "").trim().to_string();
                    let options = vec![
                        ConfirmOption {
                            key: "y".to_string(),
                            label: "Yes".to_string(),
                            is_default: entry.default_yes,
                        },
                        ConfirmOption {
                            key: "n".to_string(),
                            label: "No".to_string(),
                            is_default: !entry.default_yes,
                        },
                    ];
                    return Some(ConfirmInfo {
                        confirm_type: ConfirmType::YesNo,
                        prompt,
                        options: Some(options),
                        tool: None,
                        raw_prompt: trimmed.to_string(),
                    });
                }
            }
        }
        None
    }

    fn format_response(&self, _info: &ConfirmInfo, response: &ConfirmResponse) -> Vec<u8> {
        match response.action {
            ConfirmAction::Confirm => b"y\r".to_vec(),
            ConfirmAction::Deny => b"n\r".to_vec(),
            ConfirmAction::Select => {
                // A Y/N prompt has two options; 1 means yes.
                if response.option == Some(1) {
                    b"y\r".to_vec()
                } else {
                    b"n\r".to_vec()
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
