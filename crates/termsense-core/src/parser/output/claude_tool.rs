//! Claude Code tool-box classifier.
//!
//! Two header shapes:
//! - box: `⏺ Bash` or `⏺ Bash (completed in 0.5s)`, parameters on
//!   `  │ key: value` lines, output on other `  │ …` lines;
//! - inline: `⏺ Bash(git status)`, output on `⎿ …` lines and indented
//!   continuations.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::{OutputData, OutputParser, ParserContext, ParserMeta, SemanticOutput};

static BOX_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^⏺\s+(\w+)(?:\s+\(completed\s+in\s+([\d.]+)s?\))?$").unwrap());
static INLINE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^⏺\s+(\w+)\((.*)\)$").unwrap());
static PARAM_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*│\s*(\w+):\s*(.+)$").unwrap());
static INLINE_OUTPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*⎿\s*(.+)$").unwrap());

/// Tools the classifier knows about; known names score higher.
pub const KNOWN_TOOLS: &[&str] = &[
    "Bash",
    "Read",
    "Edit",
    "Write",
    "Glob",
    "Grep",
    "WebFetch",
    "WebSearch",
    "Task",
    "LSP",
    "NotebookEdit",
    "Search",
    "TodoRead",
    "TodoWrite",
];

/// Tool execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
}

/// Parsed tool-call payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeToolData {
    /// Tool name, e.g. `Bash`
    pub tool_name: String,
    /// Parsed parameters (JSON-coerced where possible)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
    /// Collected output lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Duration in milliseconds when the box showed one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Running or completed
    pub status: ToolStatus,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Style {
    Box,
    Inline,
}

/// Tool-box classifier (priority 92).
pub struct ClaudeToolParser {
    meta: ParserMeta,
}

impl Default for ClaudeToolParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeToolParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("claude-tool", 92)
                .with_description("Parses Claude Code tool call boxes"),
        }
    }

    fn coerce_value(raw: &str) -> serde_json::Value {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(raw) {
            return v;
        }
        let cleaned = raw
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(raw);
        serde_json::Value::String(cleaned.to_string())
    }

    /// Split inline args on commas, respecting quoted strings.
    fn split_args(args: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_string: Option<char> = None;
        let mut escaped = false;

        for ch in args.chars() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == quote {
                    in_string = None;
                }
                current.push(ch);
                continue;
            }
            match ch {
                '"' | '\'' => {
                    in_string = Some(ch);
                    current.push(ch);
                }
                ',' => {
                    if !current.trim().is_empty() {
                        parts.push(current.trim().to_string());
                    }
                    current.clear();
                }
                _ => current.push(ch),
            }
        }
        if !current.trim().is_empty() {
            parts.push(current.trim().to_string());
        }
        parts
    }

    fn parse_inline_args(tool_name: &str, args: &str) -> HashMap<String, serde_json::Value> {
        let trimmed = args.trim();
        let mut params = HashMap::new();
        if trimmed.is_empty() {
            return params;
        }

        // Bash(...) carries a raw command string.
        if tool_name == "Bash" {
            params.insert(
                "command".to_string(),
                serde_json::Value::String(trimmed.to_string()),
            );
            return params;
        }

        if trimmed.contains(':') {
            for part in Self::split_args(trimmed) {
                if let Some(idx) = part.find(':') {
                    let key = part[..idx].trim();
                    let value = part[idx + 1..].trim();
                    if !key.is_empty() {
                        params.insert(key.to_string(), Self::coerce_value(value));
                    }
                }
            }
            if !params.is_empty() {
                return params;
            }
        }

        params.insert(
            "args".to_string(),
            serde_json::Value::String(trimmed.to_string()),
        );
        params
    }

    fn is_known(name: &str) -> bool {
        KNOWN_TOOLS.contains(&name)
    }
}

impl OutputParser for ClaudeToolParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn can_parse(&self, ctx: &ParserContext) -> bool {
        ctx.last_lines.iter().any(|line| {
            let trimmed = line.trim();
            BOX_HEADER.is_match(trimmed)
                || INLINE_HEADER.is_match(trimmed)
                || INLINE_OUTPUT.is_match(trimmed)
        })
    }

    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        let mut tool_name: Option<String> = None;
        let mut duration_ms: Option<f64> = None;
        let mut params: HashMap<String, serde_json::Value> = HashMap::new();
        let mut output_lines: Vec<String> = Vec::new();
        let mut raw_lines: Vec<String> = Vec::new();
        let mut style: Option<Style> = None;

        for line in &ctx.last_lines {
            let trimmed = line.trim();

            if let Some(caps) = BOX_HEADER.captures(trimmed) {
                tool_name = Some(caps.get(1).unwrap().as_str().to_string());
                if let Some(d) = caps.get(2) {
                    if let Ok(secs) = d.as_str().parse::<f64>() {
                        duration_ms = Some(secs * 1000.0);
                    }
                }
                style = Some(Style::Box);
                raw_lines.push(line.clone());
                continue;
            }

            if let Some(caps) = INLINE_HEADER.captures(trimmed) {
                let name = caps.get(1).unwrap().as_str();
                tool_name = Some(name.to_string());
                params = Self::parse_inline_args(name, caps.get(2).map_or("", |m| m.as_str()));
                style = Some(Style::Inline);
                raw_lines.push(line.clone());
                continue;
            }

            match style {
                Some(Style::Box) => {
                    if let Some(caps) = PARAM_LINE.captures(trimmed) {
                        let key = caps.get(1).unwrap().as_str();
                        let value = caps.get(2).unwrap().as_str();
                        params.insert(key.to_string(), Self::coerce_value(value));
                        raw_lines.push(line.clone());
                        continue;
                    }
                    if let Some(rest) = trimmed.strip_prefix('│') {
                        let content = rest.trim();
                        if !content.is_empty() {
                            output_lines.push(content.to_string());
                            raw_lines.push(line.clone());
                        }
                        continue;
                    }
                    if !trimmed.is_empty() {
                        break;
                    }
                }
                Some(Style::Inline) => {
                    if let Some(caps) = INLINE_OUTPUT.captures(trimmed) {
                        let content = caps.get(1).map_or("", |m| m.as_str()).trim();
                        if !content.is_empty() {
                            output_lines.push(content.to_string());
                        }
                        raw_lines.push(line.clone());
                        continue;
                    }
                    // Indented continuations of ⎿ output stay in the block.
                    if line.starts_with("  ")
                        && !trimmed.starts_with('⏺')
                        && !trimmed.starts_with('❯')
                        && !trimmed.starts_with('>')
                    {
                        if !trimmed.is_empty() {
                            output_lines.push(trimmed.to_string());
                            raw_lines.push(line.clone());
                        }
                        continue;
                    }
                    if !trimmed.is_empty() {
                        break;
                    }
                }
                None => {}
            }
        }

        let tool_name = tool_name?;
        let status = if duration_ms.is_some() {
            ToolStatus::Completed
        } else {
            ToolStatus::Running
        };
        let confidence = if Self::is_known(&tool_name) { 0.95 } else { 0.8 };

        Some(SemanticOutput {
            raw: raw_lines.join("\n"),
            data: OutputData::ClaudeTool(ClaudeToolData {
                tool_name,
                params,
                output: if output_lines.is_empty() {
                    None
                } else {
                    Some(output_lines.join("\n"))
                },
                duration_ms,
                status,
            }),
            confidence,
            parser_name: self.meta.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ctx(lines: &[&str]) -> ParserContext {
        ParserContext::from_lines(lines.iter().map(|s| s.to_string()).collect())
    }

    fn tool_of(out: &SemanticOutput) -> &ClaudeToolData {
        match &out.data {
            OutputData::ClaudeTool(t) => t,
            other => panic!("expected claude-tool payload, got {other:?}"),
        }
    }

    #[test]
    fn test_box_style_running() {
        let parser = ClaudeToolParser::new();
        let out = parser
            .parse(&ctx(&["⏺ Bash", "  │ command: \"git status\""]))
            .unwrap();
        assert_eq!(out.confidence, 0.95);

        let tool = tool_of(&out);
        assert_eq!(tool.tool_name, "Bash");
        assert_eq!(tool.status, ToolStatus::Running);
        assert!(tool.duration_ms.is_none());
        assert_eq!(
            tool.params.get("command"),
            Some(&Value::String("git status".into()))
        );
    }

    #[test]
    fn test_box_style_completed_with_duration() {
        let parser = ClaudeToolParser::new();
        let out = parser
            .parse(&ctx(&[
                "⏺ Bash (completed in 0.5s)",
                "  │ command: \"git status\"",
            ]))
            .unwrap();
        let tool = tool_of(&out);
        assert_eq!(tool.status, ToolStatus::Completed);
        assert_eq!(tool.duration_ms, Some(500.0));
        assert_eq!(
            tool.params.get("command"),
            Some(&Value::String("git status".into()))
        );
    }

    #[test]
    fn test_inline_bash_command() {
        let parser = ClaudeToolParser::new();
        let out = parser.parse(&ctx(&["⏺ Bash(git status)"])).unwrap();
        let tool = tool_of(&out);
        assert_eq!(tool.tool_name, "Bash");
        assert_eq!(
            tool.params.get("command"),
            Some(&Value::String("git status".into()))
        );
    }

    #[test]
    fn test_inline_key_value_args() {
        let parser = ClaudeToolParser::new();
        let out = parser
            .parse(&ctx(&["⏺ Search(pattern: \"*.rs\", path: \"/src\")"]))
            .unwrap();
        let tool = tool_of(&out);
        assert_eq!(tool.params.get("pattern"), Some(&Value::String("*.rs".into())));
        assert_eq!(tool.params.get("path"), Some(&Value::String("/src".into())));
    }

    #[test]
    fn test_inline_args_commas_inside_quotes() {
        let args = ClaudeToolParser::parse_inline_args("Search", r#"pattern: "a,b,c", path: "/src""#);
        assert_eq!(args.get("pattern"), Some(&Value::String("a,b,c".into())));
        assert_eq!(args.get("path"), Some(&Value::String("/src".into())));
    }

    #[test]
    fn test_inline_output_lines() {
        let parser = ClaudeToolParser::new();
        let out = parser
            .parse(&ctx(&[
                "⏺ Bash(git status)",
                "  ⎿ On branch main",
                "  ⎿ nothing to commit",
            ]))
            .unwrap();
        let output = tool_of(&out).output.as_deref().unwrap();
        assert!(output.contains("On branch main"));
        assert!(output.contains("nothing to commit"));
    }

    #[test]
    fn test_box_output_lines() {
        let parser = ClaudeToolParser::new();
        let out = parser
            .parse(&ctx(&[
                "⏺ Read",
                "  │ file_path: \"/src/lib.rs\"",
                "  │ mod parser;",
            ]))
            .unwrap();
        let tool = tool_of(&out);
        assert_eq!(tool.tool_name, "Read");
        assert!(tool.params.contains_key("file_path"));
        // `mod parser;` has a colon-free shape so it lands in output
        assert_eq!(tool.output.as_deref(), Some("mod parser;"));
    }

    #[test]
    fn test_numeric_param_coerced_to_json_number() {
        let parser = ClaudeToolParser::new();
        let out = parser
            .parse(&ctx(&["⏺ Read", "  │ limit: 100"]))
            .unwrap();
        assert_eq!(
            tool_of(&out).params.get("limit"),
            Some(&Value::Number(100.into()))
        );
    }

    #[test]
    fn test_unknown_tool_lower_confidence() {
        let parser = ClaudeToolParser::new();
        let out = parser.parse(&ctx(&["⏺ Mystery(some args)"])).unwrap();
        assert_eq!(tool_of(&out).tool_name, "Mystery");
        assert_eq!(out.confidence, 0.8);
    }

    #[test]
    fn test_block_ends_at_unrelated_line() {
        let parser = ClaudeToolParser::new();
        let out = parser
            .parse(&ctx(&[
                "⏺ Bash(ls)",
                "  ⎿ file.txt",
                "❯ ",
            ]))
            .unwrap();
        let output = tool_of(&out).output.as_deref().unwrap();
        assert_eq!(output, "file.txt");
    }

    #[test]
    fn test_rejects_non_tool_text() {
        let parser = ClaudeToolParser::new();
        assert!(!parser.can_parse(&ctx(&["random", "text"])));
    }
}
