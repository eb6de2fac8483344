//! Claude Code assistant-response classifier.
//!
//! Finds the most recent `⏺` line that is not a tool header and collects
//! the response block that follows it, stopping at a separator, a prompt,
//! the next `⏺`, or the end of the window.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::claude_tool::KNOWN_TOOLS;
use crate::parser::{OutputData, OutputParser, ParserContext, ParserMeta, SemanticOutput};
use crate::pattern::SEPARATOR_LINE;

static INLINE_TOOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^⏺\s+\w+\(.*\)$").unwrap());
static COMPLETED_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^⏺\s+(\w+)\s+\(completed\s+in\s+[\d.]+s?\)$").unwrap());
static BARE_TOOL_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^⏺\s+(\w+)$").unwrap());
/// A line that is nothing but spinner/status glyphs.
static GLYPH_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[·✻✽✶✳✢⠀-⣿\s]+$").unwrap());

/// Parsed assistant-content payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeContentData {
    /// Always `assistant`
    pub role: String,
    /// Collected response text
    pub content: String,
    /// True when a separator ended the block (response finished rendering)
    pub is_complete: bool,
}

/// Assistant-content classifier (priority 90).
pub struct ClaudeContentParser {
    meta: ParserMeta,
}

impl Default for ClaudeContentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeContentParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("claude-content", 90)
                .with_description("Extracts assistant response text from Claude Code output"),
        }
    }

    /// A `⏺` line that belongs to a tool call rather than response text.
    fn is_tool_header(lines: &[String], index: usize) -> bool {
        let trimmed = lines[index].trim();

        if INLINE_TOOL.is_match(trimmed) {
            return true;
        }
        if let Some(caps) = COMPLETED_SUFFIX.captures(trimmed) {
            return KNOWN_TOOLS.contains(&caps.get(1).unwrap().as_str());
        }
        if let Some(caps) = BARE_TOOL_HEADER.captures(trimmed) {
            if KNOWN_TOOLS.contains(&caps.get(1).unwrap().as_str()) {
                return true;
            }
            // Unknown bare name: structurally a tool header when its own │ or
            // ⎿ line follows within 5 lines (scan stops at the next ⏺, whose
            // output is not ours).
            return lines
                .iter()
                .skip(index + 1)
                .take(5)
                .take_while(|l| !l.trim_start().starts_with('⏺'))
                .any(|l| {
                    let t = l.trim_start();
                    t.starts_with('│') || t.starts_with('⎿')
                });
        }
        false
    }
}

impl OutputParser for ClaudeContentParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn can_parse(&self, ctx: &ParserContext) -> bool {
        ctx.last_lines.iter().any(|l| l.trim_start().starts_with('⏺'))
    }

    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        let lines = &ctx.last_lines;

        // Most recent ⏺ line that is not a tool header.
        let start = lines
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, l)| l.trim_start().starts_with('⏺'))
            .find(|(i, _)| !Self::is_tool_header(lines, *i))
            .map(|(i, _)| i)?;

        let first = lines[start]
            .trim_start()
            .trim_start_matches('⏺')
            .trim()
            .to_string();

        let mut collected: Vec<String> = Vec::new();
        if !first.is_empty() {
            collected.push(first);
        }

        let mut is_complete = false;
        let mut raw_lines = vec![lines[start].clone()];

        for line in &lines[start + 1..] {
            let trimmed = line.trim();

            if SEPARATOR_LINE.is_match(trimmed) {
                is_complete = true;
                break;
            }
            if crate::pattern::PROMPT_LINE.is_match(trimmed) || trimmed.starts_with('⏺') {
                break;
            }
            // Tool output and bare status glyphs are not response text.
            if trimmed.starts_with('│') || trimmed.starts_with('⎿') {
                continue;
            }
            if !trimmed.is_empty() && GLYPH_ONLY.is_match(trimmed) {
                continue;
            }

            raw_lines.push(line.clone());
            if !trimmed.is_empty() {
                collected.push(trimmed.to_string());
            }
        }

        if collected.is_empty() {
            return None;
        }

        Some(SemanticOutput {
            raw: raw_lines.join("\n"),
            data: OutputData::ClaudeContent(ClaudeContentData {
                role: "assistant".to_string(),
                content: collected.join("\n"),
                is_complete,
            }),
            confidence: 0.85,
            parser_name: self.meta.name.clone(),
        })
    }
}
