//! Docker CLI state detector.
//!
//! Classifies image pull/push progress, build steps and compose lifecycle
//! output as `tool_running` with an operation hint, and daemon failures as
//! `error`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::parser::{
    ParserContext, ParserMeta, SessionState, StateDetection, StateMeta, StateParser,
};

/// Pull/push transfer activity, including size progress like `1.2MB/4.5MB`.
static TRANSFER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Pulling from|Pushing to|\d+\.\d+[kMG]B/\d+\.\d+[kMG]B|Downloading|Extracting|Waiting")
        .unwrap()
});

/// Build activity: classic `Step n/m`, layer arrows, BuildKit `#n` lines.
static BUILD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Step \d+/\d+|--->|Building|^#\d+ ").unwrap());

/// Compose lifecycle verbs.
static COMPOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:Creating|Starting|Stopping|Removing)\s").unwrap());

/// Daemon / permission / not-found failures.
static DOCKER_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Cannot connect to the Docker daemon|docker: command not found|permission denied while trying to connect|Error response from daemon|pull access denied|manifest unknown",
    )
    .unwrap()
});

/// Prompt tail on the final line, meaning the command already returned.
static TRAILING_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[❯$#>%]\s*$").unwrap());

/// Docker state detector (priority 50).
pub struct DockerStateParser {
    meta: ParserMeta,
}

impl Default for DockerStateParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerStateParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("docker-state", 50)
                .with_description("Detects docker pull/push/build/compose activity"),
        }
    }

    fn running(op: &str, confidence: f64) -> StateDetection {
        StateDetection::new(SessionState::ToolRunning, confidence).with_meta(StateMeta {
            operation: Some(op.to_string()),
            ..StateMeta::default()
        })
    }
}

impl StateParser for DockerStateParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn detect_state(&self, ctx: &ParserContext) -> Option<StateDetection> {
        let lines = &ctx.last_lines;

        if lines.iter().any(|l| DOCKER_ERROR.is_match(l)) {
            return Some(StateDetection::new(SessionState::Error, 0.9));
        }

        // A trailing prompt wins over stale progress lines above it.
        if lines
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .is_some_and(|l| TRAILING_PROMPT.is_match(l.trim_end()))
        {
            return Some(StateDetection::new(SessionState::Idle, 0.7));
        }

        if lines.iter().any(|l| TRANSFER.is_match(l)) {
            let op = if lines.iter().any(|l| l.contains("Pushing to")) {
                "push"
            } else {
                "pull"
            };
            return Some(Self::running(op, 0.85));
        }

        if lines.iter().any(|l| BUILD.is_match(l)) {
            return Some(Self::running("build", 0.85));
        }

        if lines.iter().any(|l| COMPOSE.is_match(l)) {
            return Some(Self::running("compose", 0.8));
        }

        None
    }
}
