//! Presets: named parser bundles + default session options for a
//! particular CLI.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::parser::confirm::claude::ConfirmStrategy;
use crate::parser::{
    ClaudeCodeConfirmParser, ClaudeCodeStateParser, ClaudeContentParser, ClaudeStatusParser,
    ClaudeTitleParser, ClaudeToolParser, ConfirmParser, DiffOutputParser, DockerStateParser,
    GenericShellStateParser, GenericYesNoParser, JsonOutputParser, OutputParser, ParserRegistry,
    StateParser, TableOutputParser,
};
use crate::session::SessionOptions;

/// A named bundle of parsers and session options.
#[derive(Clone)]
pub struct Preset {
    /// Preset name, e.g. `claude-code`
    pub name: String,
    /// State detectors to register
    pub state_parsers: Vec<Arc<dyn StateParser>>,
    /// Output classifiers to register
    pub output_parsers: Vec<Arc<dyn OutputParser>>,
    /// Confirmation detectors to register
    pub confirm_parsers: Vec<Arc<dyn ConfirmParser>>,
    /// Session options this preset defaults to
    pub session_options: SessionOptions,
    /// Command to launch, `None` = interactive shell
    pub command: Option<String>,
    /// Arguments for the command
    pub args: Vec<String>,
}

impl std::fmt::Debug for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preset")
            .field("name", &self.name)
            .field("state_parsers", &self.state_parsers.len())
            .field("output_parsers", &self.output_parsers.len())
            .field("confirm_parsers", &self.confirm_parsers.len())
            .field("command", &self.command)
            .finish()
    }
}

impl Preset {
    /// Build a fresh registry holding this preset's parsers.
    pub fn build_registry(&self) -> ParserRegistry {
        let mut registry = ParserRegistry::new();
        for p in &self.state_parsers {
            registry.register_state(Arc::clone(p));
        }
        for p in &self.output_parsers {
            registry.register_output(Arc::clone(p));
        }
        for p in &self.confirm_parsers {
            registry.register_confirm(Arc::clone(p));
        }
        registry
    }
}

/// The generic output classifiers every preset carries.
fn generic_outputs() -> Vec<Arc<dyn OutputParser>> {
    vec![
        Arc::new(JsonOutputParser::new()),
        Arc::new(TableOutputParser::new()),
        Arc::new(DiffOutputParser::new()),
    ]
}

/// Plain interactive shell.
pub fn shell_preset() -> Preset {
    Preset {
        name: "shell".to_string(),
        state_parsers: vec![Arc::new(GenericShellStateParser::new())],
        output_parsers: generic_outputs(),
        confirm_parsers: vec![Arc::new(GenericYesNoParser::new())],
        session_options: SessionOptions::default(),
        command: None,
        args: Vec::new(),
    }
}

/// Shell tuned for docker workflows: docker progress detection on top of
/// the shell detector.
pub fn docker_preset() -> Preset {
    Preset {
        name: "docker".to_string(),
        state_parsers: vec![
            Arc::new(DockerStateParser::new()),
            Arc::new(GenericShellStateParser::new()),
        ],
        output_parsers: generic_outputs(),
        confirm_parsers: vec![Arc::new(GenericYesNoParser::new())],
        session_options: SessionOptions::default(),
        command: None,
        args: Vec::new(),
    }
}

/// Claude Code CLI with the full Claude parser family.
pub fn claude_code_preset() -> Preset {
    claude_code_preset_with_strategy(ConfirmStrategy::default())
}

/// Claude Code preset with an explicit confirm response strategy.
pub fn claude_code_preset_with_strategy(strategy: ConfirmStrategy) -> Preset {
    let mut output_parsers: Vec<Arc<dyn OutputParser>> = vec![
        Arc::new(ClaudeStatusParser::new()),
        Arc::new(ClaudeToolParser::new()),
        Arc::new(ClaudeContentParser::new()),
        Arc::new(ClaudeTitleParser::new()),
    ];
    output_parsers.extend(generic_outputs());

    Preset {
        name: "claude-code".to_string(),
        state_parsers: vec![
            Arc::new(ClaudeCodeStateParser::new()),
            Arc::new(GenericShellStateParser::new()),
        ],
        output_parsers,
        confirm_parsers: vec![
            Arc::new(ClaudeCodeConfirmParser::with_strategy(strategy)),
            Arc::new(GenericYesNoParser::new()),
        ],
        session_options: SessionOptions::default(),
        command: Some("claude".to_string()),
        args: Vec::new(),
    }
}

/// Resolve a preset by name.
pub fn resolve(name: &str) -> Result<Preset> {
    match name {
        "shell" => Ok(shell_preset()),
        "docker" => Ok(docker_preset()),
        "claude-code" => Ok(claude_code_preset()),
        other => Err(Error::UnknownPreset(other.to_string())),
    }
}
