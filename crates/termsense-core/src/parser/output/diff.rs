//! Unified-diff output classifier.
//!
//! Gated on `@@`, `diff --git`, `--- a/`, `+++ b/`. Each `@@` line starts
//! a new hunk; inside a hunk `+`/`-`/space prefixes mark additions,
//! removals and context (`+++`/`---` file headers excluded).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::{OutputData, OutputParser, ParserContext, ParserMeta, SemanticOutput};

static GIT_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^diff --git a/(\S+) b/(\S+)").unwrap());
static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@@[^@]*@@").unwrap());

/// Kind of a changed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffChangeKind {
    Add,
    Remove,
    Context,
}

/// One changed line within a hunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffChange {
    /// Line kind
    pub kind: DiffChangeKind,
    /// Line content without its prefix character
    pub content: String,
}

/// One `@@` hunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHunk {
    /// The `@@ -a,b +c,d @@` header line
    pub header: String,
    /// Changed lines in order
    pub changes: Vec<DiffChange>,
}

/// Parsed diff payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffData {
    /// File path from `diff --git a/…`, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Hunks in order
    pub hunks: Vec<DiffHunk>,
}

impl DiffData {
    /// Total added lines across hunks.
    pub fn additions(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.changes)
            .filter(|c| c.kind == DiffChangeKind::Add)
            .count()
    }

    /// Total removed lines across hunks.
    pub fn removals(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.changes)
            .filter(|c| c.kind == DiffChangeKind::Remove)
            .count()
    }
}

/// Unified-diff classifier (priority 58).
pub struct DiffOutputParser {
    meta: ParserMeta,
}

impl Default for DiffOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffOutputParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("diff-output", 58)
                .with_description("Parses unified diff output into hunks"),
        }
    }
}

impl OutputParser for DiffOutputParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn can_parse(&self, ctx: &ParserContext) -> bool {
        let text = &ctx.screen_text;
        text.contains("@@")
            || text.contains("diff --git")
            || text.contains("--- a/")
            || text.contains("+++ b/")
    }

    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        let mut file = None;
        let mut hunks: Vec<DiffHunk> = Vec::new();
        let mut current: Option<DiffHunk> = None;

        for line in ctx.screen_text.lines() {
            if let Some(caps) = GIT_HEADER.captures(line) {
                if file.is_none() {
                    file = Some(caps.get(2).unwrap().as_str().to_string());
                }
                continue;
            }

            if HUNK_HEADER.is_match(line) {
                if let Some(hunk) = current.take() {
                    hunks.push(hunk);
                }
                current = Some(DiffHunk {
                    header: line.to_string(),
                    changes: Vec::new(),
                });
                continue;
            }

            let Some(hunk) = current.as_mut() else {
                continue;
            };

            // File headers inside the diff are not changes.
            if line.starts_with("+++") || line.starts_with("---") {
                continue;
            }

            if let Some(content) = line.strip_prefix('+') {
                hunk.changes.push(DiffChange {
                    kind: DiffChangeKind::Add,
                    content: content.to_string(),
                });
            } else if let Some(content) = line.strip_prefix('-') {
                hunk.changes.push(DiffChange {
                    kind: DiffChangeKind::Remove,
                    content: content.to_string(),
                });
            } else if let Some(content) = line.strip_prefix(' ') {
                hunk.changes.push(DiffChange {
                    kind: DiffChangeKind::Context,
                    content: content.to_string(),
                });
            }
        }

        if let Some(hunk) = current.take() {
            hunks.push(hunk);
        }

        if hunks.is_empty() {
            return None;
        }

        Some(SemanticOutput {
            raw: ctx.screen_text.clone(),
            data: OutputData::Diff(DiffData { file, hunks }),
            confidence: 0.9,
            parser_name: self.meta.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(text: &str) -> ParserContext {
        ParserContext {
            screen_text: text.to_string(),
            last_lines: text.lines().map(|s| s.to_string()).collect(),
            ..ParserContext::default()
        }
    }

    fn diff_of(out: &SemanticOutput) -> &DiffData {
        match &out.data {
            OutputData::Diff(d) => d,
            other => panic!("expected diff payload, got {other:?}"),
        }
    }

    const SIMPLE: &str = "\
diff --git a/x b/x
index 1111111..2222222 100644
--- a/x
+++ b/x
@@ -1,2 +1,2 @@
-bar
+foo";

    #[test]
    fn test_single_hunk() {
        let parser = DiffOutputParser::new();
        let out = parser.parse(&ctx(SIMPLE)).unwrap();
        assert_eq!(out.confidence, 0.9);

        let diff = diff_of(&out);
        assert_eq!(diff.file.as_deref(), Some("x"));
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.hunks[0].header, "@@ -1,2 +1,2 @@");
        assert_eq!(diff.hunks[0].changes.len(), 2);
        assert_eq!(diff.hunks[0].changes[0].kind, DiffChangeKind::Remove);
        assert_eq!(diff.hunks[0].changes[0].content, "bar");
        assert_eq!(diff.hunks[0].changes[1].kind, DiffChangeKind::Add);
        assert_eq!(diff.hunks[0].changes[1].content, "foo");
    }

    #[test]
    fn test_multiple_hunks_and_context() {
        let parser = DiffOutputParser::new();
        let text = "\
diff --git a/src/main.rs b/src/main.rs
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,3 @@
 use std::io;
-fn main() {}
+fn main() { run(); }
@@ -10,2 +10,3 @@
 }
+fn run() {}";
        let out = parser.parse(&ctx(text)).unwrap();
        let diff = diff_of(&out);
        assert_eq!(diff.file.as_deref(), Some("src/main.rs"));
        assert_eq!(diff.hunks.len(), 2);
        assert_eq!(diff.hunks[0].changes[0].kind, DiffChangeKind::Context);
        assert_eq!(diff.additions(), 2);
        assert_eq!(diff.removals(), 1);
    }

    #[test]
    fn test_counts_match_prefix_lines() {
        let parser = DiffOutputParser::new();
        let text = "\
@@ -1,4 +1,4 @@
-alpha
-beta
+gamma
 delta
+epsilon";
        let out = parser.parse(&ctx(text)).unwrap();
        let diff = diff_of(&out);

        let plus_lines = text
            .lines()
            .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
            .count();
        let minus_lines = text
            .lines()
            .filter(|l| l.starts_with('-') && !l.starts_with("---"))
            .count();
        assert_eq!(diff.additions(), plus_lines);
        assert_eq!(diff.removals(), minus_lines);
    }

    #[test]
    fn test_file_headers_not_counted() {
        let parser = DiffOutputParser::new();
        let out = parser.parse(&ctx(SIMPLE)).unwrap();
        let diff = diff_of(&out);
        assert_eq!(diff.additions(), 1);
        assert_eq!(diff.removals(), 1);
    }

    #[test]
    fn test_rejects_non_diff() {
        let parser = DiffOutputParser::new();
        assert!(!parser.can_parse(&ctx("nothing diff-like here")));
        // gate passes but no hunks
        assert!(parser.parse(&ctx("mentions diff --git but no hunks")).is_none());
    }
}
