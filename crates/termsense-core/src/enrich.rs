//! Severity classification and actionable suggestions.
//!
//! `determine_severity` is a pure function over a priority-ordered regex
//! ladder (critical > error > warning > success > info). The suggestion
//! catalogue maps well-known failure signatures to concrete next steps.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::SemanticOutput;

/// Severity of an output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

/// Kind of suggested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Retry,
    Fix,
    Investigate,
    Skip,
}

/// An actionable hint attached to an enhanced output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// What kind of action this is
    pub kind: SuggestionKind,
    /// The command or step to take
    pub action: String,
    /// Why it helps
    pub description: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// True when the action can be run without a human
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub automated: bool,
    /// Prerequisite, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
}

/// Execution metadata carried by an enhanced output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputMetadata {
    /// Epoch milliseconds when the record was created
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// A semantic output plus severity, suggestions and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedOutput {
    /// The wrapped semantic output
    #[serde(flatten)]
    pub output: SemanticOutput,
    /// Classified severity
    pub severity: Severity,
    /// Suggestions, omitted when empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,
    /// Execution metadata
    pub metadata: OutputMetadata,
}

struct SeverityRule {
    severity: Severity,
    pattern: &'static Lazy<Regex>,
}

static CRITICAL_FATAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"FATAL|PANIC|SEGFAULT|SIGSEGV|core dumped").unwrap());
static CRITICAL_RESOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)out of memory|OOM|stack overflow").unwrap());
static CRITICAL_ACCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)permission denied|EACCES").unwrap());
static ERROR_GENERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)error:|ERR!|failed|exception|throw|cannot find|ENOENT|syntax error")
        .unwrap()
});
static ERROR_NETWORK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)timeout|ETIMEDOUT|ECONNREFUSED").unwrap());
static WARNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)warning:|WARN|deprecated|caution|notice").unwrap());
static SUCCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)success|completed|done|passed|✓|✔|\bOK\b").unwrap());

static SEVERITY_LADDER: &[SeverityRule] = &[
    SeverityRule { severity: Severity::Critical, pattern: &CRITICAL_FATAL },
    SeverityRule { severity: Severity::Critical, pattern: &CRITICAL_RESOURCE },
    SeverityRule { severity: Severity::Critical, pattern: &CRITICAL_ACCESS },
    SeverityRule { severity: Severity::Error, pattern: &ERROR_GENERAL },
    SeverityRule { severity: Severity::Error, pattern: &ERROR_NETWORK },
    SeverityRule { severity: Severity::Warning, pattern: &WARNING },
    SeverityRule { severity: Severity::Success, pattern: &SUCCESS },
];

/// Classify text severity: first hit in the ladder wins, default `info`.
pub fn determine_severity(text: &str) -> Severity {
    for rule in SEVERITY_LADDER {
        if rule.pattern.is_match(text) {
            return rule.severity;
        }
    }
    Severity::Info
}

struct SuggestionRule {
    pattern: &'static Lazy<Regex>,
    build: fn() -> Suggestion,
}

static NPM_ERESOLVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"npm ERR! code ERESOLVE").unwrap());
static NOT_A_GIT_REPO: Lazy<Regex> = Lazy::new(|| Regex::new(r"not a git repository").unwrap());
static MERGE_CONFLICT: Lazy<Regex> = Lazy::new(|| Regex::new(r"CONFLICT.*Merge conflict").unwrap());
static CONN_REFUSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"ECONNREFUSED").unwrap());
static TSC_ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"TS\d+:").unwrap());
static DOCKER_MISSING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)docker.*not found").unwrap());

static SUGGESTION_CATALOGUE: &[SuggestionRule] = &[
    SuggestionRule {
        pattern: &NPM_ERESOLVE,
        build: || Suggestion {
            kind: SuggestionKind::Fix,
            action: "npm install --legacy-peer-deps".into(),
            description: "Retry the install relaxing peer dependency resolution".into(),
            confidence: 0.8,
            automated: true,
            requires: None,
        },
    },
    SuggestionRule {
        pattern: &NOT_A_GIT_REPO,
        build: || Suggestion {
            kind: SuggestionKind::Fix,
            action: "git init".into(),
            description: "Initialise a git repository in the current directory".into(),
            confidence: 0.7,
            automated: true,
            requires: None,
        },
    },
    SuggestionRule {
        pattern: &MERGE_CONFLICT,
        build: || Suggestion {
            kind: SuggestionKind::Investigate,
            action: "git status".into(),
            description: "List conflicted files before resolving the merge".into(),
            confidence: 0.85,
            automated: false,
            requires: None,
        },
    },
    SuggestionRule {
        pattern: &CONN_REFUSED,
        build: || Suggestion {
            kind: SuggestionKind::Retry,
            action: "retry the command".into(),
            description: "The remote refused the connection; it may not be up yet".into(),
            confidence: 0.6,
            automated: false,
            requires: None,
        },
    },
    SuggestionRule {
        pattern: &TSC_ERROR,
        build: || Suggestion {
            kind: SuggestionKind::Investigate,
            action: "tsc --noEmit".into(),
            description: "Type-check the project to list every TypeScript error".into(),
            confidence: 0.75,
            automated: false,
            requires: Some("typescript".into()),
        },
    },
    SuggestionRule {
        pattern: &DOCKER_MISSING,
        build: || Suggestion {
            kind: SuggestionKind::Investigate,
            action: "docker info".into(),
            description: "Check whether the docker daemon is installed and reachable".into(),
            confidence: 0.7,
            automated: false,
            requires: None,
        },
    },
];

/// Suggestions matching the text, in catalogue order. May be empty.
pub fn extract_suggestions(text: &str) -> Vec<Suggestion> {
    SUGGESTION_CATALOGUE
        .iter()
        .filter(|rule| rule.pattern.is_match(text))
        .map(|rule| (rule.build)())
        .collect()
}

/// Context for building an enhanced output.
#[derive(Debug, Clone, Default)]
pub struct EnrichContext {
    pub session_id: Option<String>,
    pub command: Option<String>,
    pub duration_ms: Option<u64>,
    pub exit_code: Option<i32>,
}

/// Wrap a semantic output with severity, suggestions and metadata.
pub fn create_enhanced_output(output: SemanticOutput, ctx: EnrichContext) -> EnhancedOutput {
    let severity = determine_severity(&output.raw);
    let suggestions = extract_suggestions(&output.raw);

    EnhancedOutput {
        output,
        severity,
        suggestions: (!suggestions.is_empty()).then_some(suggestions),
        metadata: OutputMetadata {
            timestamp: chrono::Utc::now().timestamp_millis(),
            session_id: ctx.session_id,
            command: ctx.command,
            duration_ms: ctx.duration_ms,
            exit_code: ctx.exit_code,
        },
    }
}
