//! JSON output classifier.
//!
//! Tries, in order: a single JSON document (0.95), newline-delimited JSON
//! (0.9), and the longest balanced `{…}`/`[…]` substring (0.7).

use serde_json::Value;

use crate::parser::{OutputData, OutputParser, ParserContext, ParserMeta, SemanticOutput};

/// JSON / NDJSON classifier (priority 60).
pub struct JsonOutputParser {
    meta: ParserMeta,
}

impl Default for JsonOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonOutputParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("json-output", 60)
                .with_description("Parses JSON and newline-delimited JSON output"),
        }
    }

    fn parse_ndjson(text: &str) -> Option<Vec<Value>> {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() < 2 {
            return None;
        }
        let values: Vec<Value> = lines
            .iter()
            .map(|l| serde_json::from_str(l.trim()))
            .collect::<Result<_, _>>()
            .ok()?;
        Some(values)
    }

    /// Longest balanced `{…}` or `[…]` substring that parses as JSON.
    fn extract_embedded(text: &str) -> Option<(String, Value)> {
        let mut best: Option<(usize, usize)> = None;

        for (open, close) in [('{', '}'), ('[', ']')] {
            let bytes = text.as_bytes();
            for start in text.char_indices().filter(|&(_, c)| c == open).map(|(i, _)| i) {
                let mut depth = 0usize;
                let mut in_string = false;
                let mut escaped = false;
                for (offset, &b) in bytes[start..].iter().enumerate() {
                    let c = b as char;
                    if in_string {
                        if escaped {
                            escaped = false;
                        } else if c == '\\' {
                            escaped = true;
                        } else if c == '"' {
                            in_string = false;
                        }
                        continue;
                    }
                    match c {
                        '"' => in_string = true,
                        c if c == open => depth += 1,
                        c if c == close => {
                            depth -= 1;
                            if depth == 0 {
                                let end = start + offset + 1;
                                let len = end - start;
                                if best.is_none_or(|(s, e)| len > e - s) {
                                    best = Some((start, end));
                                }
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let (start, end) = best?;
        let candidate = &text[start..end];
        let value: Value = serde_json::from_str(candidate).ok()?;
        Some((candidate.to_string(), value))
    }
}

impl OutputParser for JsonOutputParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn can_parse(&self, ctx: &ParserContext) -> bool {
        let trimmed = ctx.screen_text.trim();
        if trimmed.is_empty() {
            return false;
        }
        // Quick gate: document braces, or every non-empty line looks like JSON.
        (trimmed.starts_with('{') && trimmed.ends_with('}'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']'))
            || trimmed.contains('{')
            || trimmed.contains('[')
    }

    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        let raw = ctx.screen_text.trim().to_string();

        if let Ok(value) = serde_json::from_str::<Value>(&raw) {
            return Some(SemanticOutput {
                raw,
                data: OutputData::Json { value },
                confidence: 0.95,
                parser_name: self.meta.name.clone(),
            });
        }

        if let Some(values) = Self::parse_ndjson(&raw) {
            return Some(SemanticOutput {
                raw,
                data: OutputData::Json {
                    value: Value::Array(values),
                },
                confidence: 0.9,
                parser_name: self.meta.name.clone(),
            });
        }

        if let Some((fragment, value)) = Self::extract_embedded(&raw) {
            return Some(SemanticOutput {
                raw: fragment,
                data: OutputData::Json { value },
                confidence: 0.7,
                parser_name: self.meta.name.clone(),
            });
        }

        None
    }
}
