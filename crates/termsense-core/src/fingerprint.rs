//! Fingerprint registry: named textual patterns shared by the parser
//! families.
//!
//! Higher-level parsers ask cheap "what's on the screen?" questions
//! through the registry instead of duplicating patterns. Fingerprints are
//! keyed by id and indexed per category, categories sorted by descending
//! priority.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::ParserContext;

/// How a fingerprint's pattern is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Regular expression tested per line
    Regex,
    /// Substring tested per line, falling back to the full screen text
    Literal,
    /// List of alternates, first alternate found on a line wins
    Enum,
    /// Alias of `Enum` used for structural markers
    Marker,
}

/// Fingerprint grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Spinner,
    Statusbar,
    Prompt,
    Separator,
    Assistant,
    Tool,
    Error,
    Confirm,
}

/// Compiled pattern behind a fingerprint.
#[derive(Debug, Clone)]
pub enum Pattern {
    Regex(Regex),
    Literal(String),
    Alternates(Vec<String>),
}

/// A named pattern with category, confidence and priority.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// Unique identifier, e.g. `claude-code.prompt.input`
    pub id: &'static str,
    /// Match mechanics
    pub match_kind: MatchKind,
    /// Grouping
    pub category: Category,
    /// The pattern itself
    pub pattern: Pattern,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Priority within the category (higher first)
    pub priority: u32,
    /// Where the pattern came from, e.g. `claude-code-v1.0`
    pub source: &'static str,
}

/// Result of matching one fingerprint against a context.
#[derive(Debug, Clone)]
pub struct FingerprintMatch {
    /// Id of the fingerprint
    pub fingerprint_id: String,
    /// Whether it matched
    pub matched: bool,
    /// Capture groups (regex) or the winning alternate (enum/marker)
    pub captures: Option<Vec<String>>,
    /// Index into `last_lines` where the match was found
    pub line_index: Option<usize>,
}

/// Boolean hints derived from the per-category matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintHints {
    pub has_spinner: bool,
    pub has_prompt: bool,
    pub has_tool_output: bool,
    pub has_confirm_dialog: bool,
    pub has_error: bool,
}

/// Full extraction result.
#[derive(Debug, Clone)]
pub struct FingerprintResult {
    /// Every fingerprint's outcome, keyed by id
    pub matches: HashMap<String, FingerprintMatch>,
    /// Positive matches grouped by category
    pub categories: HashMap<Category, Vec<FingerprintMatch>>,
    /// Derived hints
    pub hints: FingerprintHints,
}

/// Registry of fingerprints, keyed by id and indexed by category.
#[derive(Debug, Default)]
pub struct FingerprintRegistry {
    fingerprints: HashMap<String, Fingerprint>,
    by_category: HashMap<Category, Vec<String>>,
}

impl FingerprintRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fingerprint. Re-registering an id replaces it and moves
    /// it between category indexes if the category changed.
    pub fn register(&mut self, fp: Fingerprint) {
        let id = fp.id.to_string();
        let category = fp.category;

        if let Some(existing) = self.fingerprints.get(&id) {
            let old = existing.category;
            if let Some(ids) = self.by_category.get_mut(&old) {
                ids.retain(|i| i != &id);
            }
        }

        self.fingerprints.insert(id.clone(), fp);

        let ids = self.by_category.entry(category).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        let fingerprints = &self.fingerprints;
        ids.sort_by(|a, b| {
            let pa = fingerprints.get(a).map(|f| f.priority).unwrap_or(0);
            let pb = fingerprints.get(b).map(|f| f.priority).unwrap_or(0);
            pb.cmp(&pa)
        });
    }

    /// Register a batch.
    pub fn register_all(&mut self, fps: Vec<Fingerprint>) {
        for fp in fps {
            self.register(fp);
        }
    }

    /// Look up a fingerprint by id.
    pub fn get(&self, id: &str) -> Option<&Fingerprint> {
        self.fingerprints.get(id)
    }

    /// All fingerprints of a category, priority-sorted.
    pub fn by_category(&self, category: Category) -> Vec<&Fingerprint> {
        self.by_category
            .get(&category)
            .map(|ids| ids.iter().filter_map(|id| self.fingerprints.get(id)).collect())
            .unwrap_or_default()
    }

    /// Remove every fingerprint.
    pub fn clear(&mut self) {
        self.fingerprints.clear();
        self.by_category.clear();
    }

    /// Match every fingerprint against the context.
    pub fn extract(&self, ctx: &ParserContext) -> FingerprintResult {
        let mut matches = HashMap::new();
        let mut categories: HashMap<Category, Vec<FingerprintMatch>> = HashMap::new();

        for (id, fp) in &self.fingerprints {
            let m = Self::match_one(fp, ctx);
            if m.matched {
                categories.entry(fp.category).or_default().push(m.clone());
            }
            matches.insert(id.clone(), m);
        }

        let hit = |c: Category| categories.get(&c).is_some_and(|v| !v.is_empty());
        let hints = FingerprintHints {
            has_spinner: hit(Category::Spinner),
            has_prompt: hit(Category::Prompt),
            has_tool_output: hit(Category::Tool),
            has_confirm_dialog: hit(Category::Confirm),
            has_error: hit(Category::Error),
        };

        FingerprintResult {
            matches,
            categories,
            hints,
        }
    }

    /// Walk `last_lines` once for a single fingerprint. Literal patterns
    /// additionally fall back to a substring test on the full screen text.
    fn match_one(fp: &Fingerprint, ctx: &ParserContext) -> FingerprintMatch {
        for (i, line) in ctx.last_lines.iter().enumerate() {
            match &fp.pattern {
                Pattern::Regex(re) => {
                    if let Some(caps) = re.captures(line) {
                        let captures: Vec<String> = caps
                            .iter()
                            .skip(1)
                            .filter_map(|m| m.map(|m| m.as_str().to_string()))
                            .collect();
                        return FingerprintMatch {
                            fingerprint_id: fp.id.to_string(),
                            matched: true,
                            captures: Some(captures),
                            line_index: Some(i),
                        };
                    }
                }
                Pattern::Literal(s) => {
                    if line.contains(s.as_str()) {
                        return FingerprintMatch {
                            fingerprint_id: fp.id.to_string(),
                            matched: true,
                            captures: None,
                            line_index: Some(i),
                        };
                    }
                }
                Pattern::Alternates(alts) => {
                    for alt in alts {
                        if line.contains(alt.as_str()) {
                            return FingerprintMatch {
                                fingerprint_id: fp.id.to_string(),
                                matched: true,
                                captures: Some(vec![alt.clone()]),
                                line_index: Some(i),
                            };
                        }
                    }
                }
            }
        }

        if let Pattern::Literal(s) = &fp.pattern {
            if ctx.screen_text.contains(s.as_str()) {
                return FingerprintMatch {
                    fingerprint_id: fp.id.to_string(),
                    matched: true,
                    captures: None,
                    line_index: None,
                };
            }
        }

        FingerprintMatch {
            fingerprint_id: fp.id.to_string(),
            matched: false,
            captures: None,
            line_index: None,
        }
    }
}

mod patterns {
    use once_cell::sync::Lazy;
    use regex::Regex;

    pub static STATUSBAR: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^([·✻✽✶✳✢])\s+(\S+…?)\s*\((?:esc|ESC)\s+to\s+interrupt(?:\s*·\s*(\w+))?\)")
            .unwrap()
    });
    pub static PROMPT_INPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[❯>]\s*$").unwrap());
    pub static PROMPT_WITH_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[❯>]\s+.+").unwrap());
    pub static TOOL_HEADER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^⏺\s+(\w+)(?:\s+\(completed\s+in\s+([\d.]+)s?\))?$").unwrap());
    pub static TOOL_INLINE_HEADER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^⏺\s+(\w+)\(.+\)$").unwrap());
    pub static TOOL_PARAM: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*│\s*(\w+):\s*(.+)$").unwrap());
    pub static TOOL_OUTPUT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*│\s+(.+)$").unwrap());
    pub static TOOL_INLINE_OUTPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*⎿\s+.+$").unwrap());
    pub static CONFIRM_NUMBERED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*(\d+)\.\s+(.+)$").unwrap());
    pub static CONFIRM_YES: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^\s*1\.\s+(?:Yes|Allow),?\s").unwrap());
    pub static CONFIRM_NO: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^\s*\d+\.\s+No,?\s").unwrap());
    pub static STACK_TRACE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s+at\s+.+\(.+:\d+:\d+\)$").unwrap());
    pub static TITLE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^([⠐⠂⠈⠁⠉⠃⠋⠓⠒⠖⠦⠤✳])\s+(.+)$").unwrap());
}

/// Built-in Claude-Code fingerprints.
pub fn claude_code_fingerprints() -> Vec<Fingerprint> {
    vec![
        Fingerprint {
            id: "claude-code.spinner.status",
            match_kind: MatchKind::Enum,
            category: Category::Spinner,
            pattern: Pattern::Alternates(
                ["·", "✻", "✽", "✶", "✳", "✢"].iter().map(|s| s.to_string()).collect(),
            ),
            confidence: 0.95,
            priority: 100,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.spinner.braille",
            match_kind: MatchKind::Enum,
            category: Category::Spinner,
            pattern: Pattern::Alternates(
                ["⠐", "⠂", "⠈", "⠁", "⠉", "⠃", "⠋", "⠓", "⠒", "⠖", "⠦", "⠤"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            confidence: 0.95,
            priority: 100,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.statusbar.pattern",
            match_kind: MatchKind::Regex,
            category: Category::Statusbar,
            pattern: Pattern::Regex(patterns::STATUSBAR.clone()),
            confidence: 0.95,
            priority: 95,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.statusbar.running",
            match_kind: MatchKind::Literal,
            category: Category::Statusbar,
            pattern: Pattern::Literal("esc to interrupt".into()),
            confidence: 0.90,
            priority: 90,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.prompt.input",
            match_kind: MatchKind::Regex,
            category: Category::Prompt,
            pattern: Pattern::Regex(patterns::PROMPT_INPUT.clone()),
            confidence: 0.90,
            priority: 90,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.prompt.with-text",
            match_kind: MatchKind::Regex,
            category: Category::Prompt,
            pattern: Pattern::Regex(patterns::PROMPT_WITH_TEXT.clone()),
            confidence: 0.85,
            priority: 85,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.marker.response",
            match_kind: MatchKind::Marker,
            category: Category::Assistant,
            pattern: Pattern::Alternates(vec!["⏺".into()]),
            confidence: 0.95,
            priority: 90,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.marker.separator",
            match_kind: MatchKind::Regex,
            category: Category::Separator,
            pattern: Pattern::Regex(crate::pattern::SEPARATOR_LINE.clone()),
            confidence: 0.90,
            priority: 80,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.tool.header",
            match_kind: MatchKind::Regex,
            category: Category::Tool,
            pattern: Pattern::Regex(patterns::TOOL_HEADER.clone()),
            confidence: 0.95,
            priority: 92,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.tool.inline-header",
            match_kind: MatchKind::Regex,
            category: Category::Tool,
            pattern: Pattern::Regex(patterns::TOOL_INLINE_HEADER.clone()),
            confidence: 0.90,
            priority: 92,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.tool.param",
            match_kind: MatchKind::Regex,
            category: Category::Tool,
            pattern: Pattern::Regex(patterns::TOOL_PARAM.clone()),
            confidence: 0.90,
            priority: 90,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.tool.output-line",
            match_kind: MatchKind::Regex,
            category: Category::Tool,
            pattern: Pattern::Regex(patterns::TOOL_OUTPUT_LINE.clone()),
            confidence: 0.85,
            priority: 85,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.tool.inline-output-line",
            match_kind: MatchKind::Regex,
            category: Category::Tool,
            pattern: Pattern::Regex(patterns::TOOL_INLINE_OUTPUT.clone()),
            confidence: 0.85,
            priority: 85,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.tool.known-names",
            match_kind: MatchKind::Enum,
            category: Category::Tool,
            pattern: Pattern::Alternates(
                [
                    "Bash", "Read", "Edit", "Write", "Glob", "Grep", "WebFetch", "WebSearch",
                    "Task", "LSP", "NotebookEdit", "TodoRead", "TodoWrite",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ),
            confidence: 0.95,
            priority: 92,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.confirm.numbered-option",
            match_kind: MatchKind::Regex,
            category: Category::Confirm,
            pattern: Pattern::Regex(patterns::CONFIRM_NUMBERED.clone()),
            confidence: 0.85,
            priority: 85,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.confirm.yes-option",
            match_kind: MatchKind::Regex,
            category: Category::Confirm,
            pattern: Pattern::Regex(patterns::CONFIRM_YES.clone()),
            confidence: 0.90,
            priority: 88,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.confirm.no-option",
            match_kind: MatchKind::Regex,
            category: Category::Confirm,
            pattern: Pattern::Regex(patterns::CONFIRM_NO.clone()),
            confidence: 0.90,
            priority: 88,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.error.keywords",
            match_kind: MatchKind::Enum,
            category: Category::Error,
            pattern: Pattern::Alternates(
                [
                    "Error:", "error:", "ERROR:", "✖", "ENOENT", "EPERM", "EACCES", "failed",
                    "Failed",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ),
            confidence: 0.85,
            priority: 80,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.error.stack-trace",
            match_kind: MatchKind::Regex,
            category: Category::Error,
            pattern: Pattern::Regex(patterns::STACK_TRACE.clone()),
            confidence: 0.90,
            priority: 82,
            source: "claude-code-v1.0",
        },
        Fingerprint {
            id: "claude-code.title.pattern",
            match_kind: MatchKind::Regex,
            category: Category::Statusbar,
            pattern: Pattern::Regex(patterns::TITLE.clone()),
            confidence: 0.90,
            priority: 85,
            source: "claude-code-v1.0",
        },
    ]
}

/// A registry pre-loaded with the Claude-Code catalogue.
pub fn default_registry() -> FingerprintRegistry {
    let mut registry = FingerprintRegistry::new();
    registry.register_all(claude_code_fingerprints());
    registry
}

/// Shared pre-built default registry.
pub static DEFAULT_FINGERPRINTS: Lazy<FingerprintRegistry> = Lazy::new(default_registry);
