//! Claude Code terminal-title classifier.
//!
//! Only active when the context carries a terminal title (from the OSC
//! sequence). Extracts `spinner + task name`; braille and non-static
//! spinners mean the session is processing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::{OutputData, OutputParser, ParserContext, ParserMeta, SemanticOutput};

/// Braille spinner glyphs used in the title.
pub const BRAILLE_SPINNERS: &[char] = &[
    '⠐', '⠂', '⠈', '⠁', '⠉', '⠃', '⠋', '⠓', '⠒', '⠖', '⠦', '⠤',
];

/// Non-braille spinner glyphs; `✳` is the static idle marker.
pub const OTHER_SPINNERS: &[char] = &['✳', '✻', '✽', '✶', '✢', '·'];

static TITLE: Lazy<Regex> = Lazy::new(|| {
    let mut glyphs = String::new();
    glyphs.extend(BRAILLE_SPINNERS);
    glyphs.extend(OTHER_SPINNERS);
    Regex::new(&format!(r"^([{glyphs}])\s*(.*)$")).unwrap()
});

/// Parsed title payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeTitleData {
    /// Task name shown in the title, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    /// The spinner glyph, empty for static titles
    pub spinner_state: String,
    /// Whether the spinner indicates active processing
    pub is_processing: bool,
}

/// Terminal-title classifier (priority 85).
pub struct ClaudeTitleParser {
    meta: ParserMeta,
}

impl Default for ClaudeTitleParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeTitleParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("claude-title", 85)
                .with_description("Parses the Claude Code terminal title"),
        }
    }

    fn is_processing_spinner(spinner: char) -> bool {
        if BRAILLE_SPINNERS.contains(&spinner) {
            return true;
        }
        // ✳ is the static idle glyph.
        OTHER_SPINNERS.contains(&spinner) && spinner != '✳'
    }
}

impl OutputParser for ClaudeTitleParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn can_parse(&self, ctx: &ParserContext) -> bool {
        ctx.terminal_title
            .as_ref()
            .is_some_and(|t| !t.is_empty())
    }

    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        let title = ctx.terminal_title.as_deref()?;
        if title.is_empty() {
            return None;
        }

        if let Some(caps) = TITLE.captures(title) {
            let spinner_state = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let task_name = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
            let spinner_char = spinner_state.chars().next().unwrap_or(' ');

            return Some(SemanticOutput {
                raw: title.to_string(),
                data: OutputData::ClaudeTitle(ClaudeTitleData {
                    task_name: (!task_name.is_empty()).then_some(task_name),
                    spinner_state,
                    is_processing: Self::is_processing_spinner(spinner_char),
                }),
                confidence: 0.95,
                parser_name: self.meta.name.clone(),
            });
        }

        // Static title, no spinner.
        let trimmed = title.trim();
        Some(SemanticOutput {
            raw: title.to_string(),
            data: OutputData::ClaudeTitle(ClaudeTitleData {
                task_name: (!trimmed.is_empty()).then(|| trimmed.to_string()),
                spinner_state: String::new(),
                is_processing: false,
            }),
            confidence: 0.7,
            parser_name: self.meta.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(title: &str) -> ParserContext {
        ParserContext::default().with_title(title)
    }

    fn title_of(out: &SemanticOutput) -> &ClaudeTitleData {
        match &out.data {
            OutputData::ClaudeTitle(t) => t,
            other => panic!("expected claude-title payload, got {other:?}"),
        }
    }

    #[test]
    fn test_braille_spinner_means_processing() {
        let parser = ClaudeTitleParser::new();
        let out = parser.parse(&ctx("⠐ Initial Greeting")).unwrap();
        assert_eq!(out.confidence, 0.95);

        let title = title_of(&out);
        assert_eq!(title.task_name.as_deref(), Some("Initial Greeting"));
        assert_eq!(title.spinner_state, "⠐");
        assert!(title.is_processing);
    }

    #[test]
    fn test_all_braille_spinners_process() {
        let parser = ClaudeTitleParser::new();
        for &spinner in BRAILLE_SPINNERS {
            let out = parser.parse(&ctx(&format!("{spinner} Task"))).unwrap();
            assert!(title_of(&out).is_processing, "for {spinner}");
        }
    }

    #[test]
    fn test_static_asterisk_is_not_processing() {
        let parser = ClaudeTitleParser::new();
        let out = parser.parse(&ctx("✳ Claude Code")).unwrap();
        let title = title_of(&out);
        assert_eq!(title.task_name.as_deref(), Some("Claude Code"));
        assert!(!title.is_processing);
    }

    #[test]
    fn test_other_spinners_process_except_static() {
        let parser = ClaudeTitleParser::new();
        for &spinner in OTHER_SPINNERS {
            let out = parser.parse(&ctx(&format!("{spinner} Task"))).unwrap();
            assert_eq!(
                title_of(&out).is_processing,
                spinner != '✳',
                "for {spinner}"
            );
        }
    }

    #[test]
    fn test_plain_title_low_confidence() {
        let parser = ClaudeTitleParser::new();
        let out = parser.parse(&ctx("Claude Code")).unwrap();
        assert_eq!(out.confidence, 0.7);
        let title = title_of(&out);
        assert_eq!(title.task_name.as_deref(), Some("Claude Code"));
        assert!(title.spinner_state.is_empty());
        assert!(!title.is_processing);
    }

    #[test]
    fn test_spinner_without_task_name() {
        let parser = ClaudeTitleParser::new();
        let out = parser.parse(&ctx("⠐ ")).unwrap();
        let title = title_of(&out);
        assert!(title.task_name.is_none());
        assert!(title.is_processing);
    }

    #[test]
    fn test_inactive_without_title() {
        let parser = ClaudeTitleParser::new();
        assert!(!parser.can_parse(&ParserContext::default()));
        assert!(!parser.can_parse(&ctx("")));
    }
}
