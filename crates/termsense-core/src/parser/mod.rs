//! Parser contracts: the context every parser sees, the three parser
//! families (state detectors, output classifiers, confirmation detectors),
//! and the semantic output model.
//!
//! Parsers are stateless and only read the [`ParserContext`]; they never
//! touch driver state. A parser that panics during detection is treated as
//! a non-match by the registry.

pub mod confirm;
pub mod output;
pub mod registry;
pub mod state;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use confirm::claude::ClaudeCodeConfirmParser;
pub use confirm::generic::GenericYesNoParser;
pub use output::claude_content::{ClaudeContentData, ClaudeContentParser};
pub use output::claude_status::{ClaudeStatusData, ClaudeStatusParser, StatusPhase};
pub use output::claude_title::{ClaudeTitleData, ClaudeTitleParser};
pub use output::claude_tool::{ClaudeToolData, ClaudeToolParser, ToolStatus, KNOWN_TOOLS};
pub use output::diff::{DiffChange, DiffChangeKind, DiffData, DiffHunk, DiffOutputParser};
pub use output::json::JsonOutputParser;
pub use output::table::{TableData, TableOutputParser};
pub use registry::{ConfirmHit, ParserRegistry};
pub use state::claude::ClaudeCodeStateParser;
pub use state::docker::DockerStateParser;
pub use state::shell::GenericShellStateParser;

/// Session state machine values.
///
/// Exactly one value per session at any time. `Starting` is the initial
/// state; `Exited` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Starting up, may need trust confirmation
    Starting,
    /// Waiting for input (prompt visible)
    Idle,
    /// Processing / thinking
    Thinking,
    /// Streaming a response
    Responding,
    /// A tool is executing
    ToolRunning,
    /// Waiting for user confirmation
    Confirming,
    /// Error state
    Error,
    /// Child process has exited (terminal)
    Exited,
}

impl SessionState {
    /// States that mean the session is actively producing output.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Thinking | SessionState::Responding | SessionState::ToolRunning
        )
    }

    /// States from which the session can never recover.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Exited)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Starting => "starting",
            SessionState::Idle => "idle",
            SessionState::Thinking => "thinking",
            SessionState::Responding => "responding",
            SessionState::ToolRunning => "tool_running",
            SessionState::Confirming => "confirming",
            SessionState::Error => "error",
            SessionState::Exited => "exited",
        };
        write!(f, "{s}")
    }
}

/// Parser metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserMeta {
    /// Unique parser name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Priority (higher = consulted first)
    pub priority: u32,
    /// Parser version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ParserMeta {
    /// Create metadata with name and priority; description/version optional.
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            priority,
            version: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The read-only bundle passed to every parser call.
#[derive(Debug, Clone, Default)]
pub struct ParserContext {
    /// Full visible screen + scrollback, newline-joined, no control codes
    pub screen_text: String,
    /// Last N lines (default 10, configurable per session)
    pub last_lines: Vec<String>,
    /// Current session state, if known
    pub current_state: Option<SessionState>,
    /// Previous session state, if known
    pub previous_state: Option<SessionState>,
    /// Raw screen with control codes, when a parser needs it
    pub raw_screen: Option<String>,
    /// Terminal title from the OSC sequence, if one was set
    pub terminal_title: Option<String>,
}

impl ParserContext {
    /// Build a context from the last-lines window alone; `screen_text`
    /// becomes the joined lines.
    pub fn from_lines(last_lines: Vec<String>) -> Self {
        let screen_text = last_lines.join("\n");
        Self {
            screen_text,
            last_lines,
            ..Self::default()
        }
    }

    /// Attach the current state hint.
    pub fn with_state(mut self, state: SessionState) -> Self {
        self.current_state = Some(state);
        self
    }

    /// Attach the previous state hint.
    pub fn with_previous_state(mut self, state: SessionState) -> Self {
        self.previous_state = Some(state);
        self
    }

    /// Attach a terminal title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.terminal_title = Some(title.into());
        self
    }

    /// The last-lines window joined with newlines.
    pub fn window_text(&self) -> String {
        self.last_lines.join("\n")
    }

    /// The last `n` non-empty lines of the window, oldest first.
    pub fn last_non_empty_lines(&self, n: usize) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .last_lines
            .iter()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(n)
            .map(|s| s.as_str())
            .collect();
        out.reverse();
        out
    }
}

/// Extra detail a state detector can attach to its result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    /// Trust confirmation needed during startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_trust_confirm: Option<bool>,
    /// Confirmation style when the state is `confirming`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_type: Option<ConfirmType>,
    /// Operation hint (e.g. docker `pull`/`build`/`compose`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Result of a state detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDetection {
    /// Detected state
    pub state: SessionState,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Optional detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<StateMeta>,
}

impl StateDetection {
    /// A detection with no metadata.
    pub fn new(state: SessionState, confidence: f64) -> Self {
        Self {
            state,
            confidence,
            meta: None,
        }
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: StateMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Output record type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "table")]
    Table,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "tree")]
    Tree,
    #[serde(rename = "diff")]
    Diff,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "claude-status")]
    ClaudeStatus,
    #[serde(rename = "claude-content")]
    ClaudeContent,
    #[serde(rename = "claude-title")]
    ClaudeTitle,
    #[serde(rename = "claude-tool")]
    ClaudeTool,
}

/// Type-dependent payload of a semantic output, tagged by the wire `type`.
///
/// Parser-specific payload structs live next to their parsers; `Tree` and
/// `List` exist for third-party classifiers and carry generic shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputData {
    #[serde(rename = "text")]
    Text {
        /// The plain text content
        content: String,
    },
    #[serde(rename = "table")]
    Table(TableData),
    #[serde(rename = "json")]
    Json {
        /// Parsed JSON value (a single document or an NDJSON array)
        value: serde_json::Value,
    },
    #[serde(rename = "tree")]
    Tree {
        /// Nested nodes, label plus children
        nodes: Vec<TreeNode>,
    },
    #[serde(rename = "diff")]
    Diff(DiffData),
    #[serde(rename = "list")]
    List {
        /// Flat list items
        items: Vec<String>,
    },
    #[serde(rename = "error")]
    Error {
        /// The error text
        message: String,
    },
    #[serde(rename = "claude-status")]
    ClaudeStatus(ClaudeStatusData),
    #[serde(rename = "claude-content")]
    ClaudeContent(ClaudeContentData),
    #[serde(rename = "claude-title")]
    ClaudeTitle(ClaudeTitleData),
    #[serde(rename = "claude-tool")]
    ClaudeTool(ClaudeToolData),
}

impl OutputData {
    /// The type tag this payload serialises under.
    pub fn output_type(&self) -> OutputType {
        match self {
            OutputData::Text { .. } => OutputType::Text,
            OutputData::Table(_) => OutputType::Table,
            OutputData::Json { .. } => OutputType::Json,
            OutputData::Tree { .. } => OutputType::Tree,
            OutputData::Diff(_) => OutputType::Diff,
            OutputData::List { .. } => OutputType::List,
            OutputData::Error { .. } => OutputType::Error,
            OutputData::ClaudeStatus(_) => OutputType::ClaudeStatus,
            OutputData::ClaudeContent(_) => OutputType::ClaudeContent,
            OutputData::ClaudeTitle(_) => OutputType::ClaudeTitle,
            OutputData::ClaudeTool(_) => OutputType::ClaudeTool,
        }
    }
}

/// A node in a `tree` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Node label
    pub label: String,
    /// Child nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// A semantic output record produced by an output classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticOutput {
    /// Raw text the parser consumed
    pub raw: String,
    /// Typed payload (carries the `type` tag)
    pub data: OutputData,
    /// Parser confidence in [0, 1]
    pub confidence: f64,
    /// Name of the parser that produced this record
    pub parser_name: String,
}

impl SemanticOutput {
    /// Wrap a raw string as a plain `text` record.
    pub fn text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            data: OutputData::Text {
                content: raw.clone(),
            },
            raw,
            confidence: 1.0,
            parser_name: "raw".to_string(),
        }
    }
}

/// Confirmation dialog style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmType {
    /// Simple yes/no prompt
    YesNo,
    /// Numbered option list
    Options,
    /// Free-form input expected
    Input,
}

/// A single selectable confirmation option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOption {
    /// Option key (number for option lists, character for Y/n)
    pub key: String,
    /// Option label
    pub label: String,
    /// Whether this option is pre-selected
    #[serde(default)]
    pub is_default: bool,
}

/// Tool named in a confirmation dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool name
    pub name: String,
    /// MCP server the tool belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_server: Option<String>,
    /// Parsed tool parameters
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

/// A detected confirmation dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmInfo {
    /// Dialog style
    #[serde(rename = "type")]
    pub confirm_type: ConfirmType,
    /// The question being asked
    pub prompt: String,
    /// Options, when the dialog lists them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<ConfirmOption>>,
    /// Tool being confirmed, when one is named
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolRequest>,
    /// Raw dialog text
    pub raw_prompt: String,
}

/// Action to take on a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmAction {
    Confirm,
    Deny,
    Select,
    Input,
}

/// Response to a pending confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmResponse {
    /// Action to take
    pub action: ConfirmAction,
    /// Option number for `select`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option: Option<u32>,
    /// Free-form value for `input`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ConfirmResponse {
    /// Accept the default option.
    pub fn confirm() -> Self {
        Self {
            action: ConfirmAction::Confirm,
            option: None,
            value: None,
        }
    }

    /// Refuse.
    pub fn deny() -> Self {
        Self {
            action: ConfirmAction::Deny,
            option: None,
            value: None,
        }
    }

    /// Pick option `n` (1-based).
    pub fn select(n: u32) -> Self {
        Self {
            action: ConfirmAction::Select,
            option: Some(n),
            value: None,
        }
    }

    /// Send a free-form value.
    pub fn input(value: impl Into<String>) -> Self {
        Self {
            action: ConfirmAction::Input,
            option: None,
            value: Some(value.into()),
        }
    }
}

/// State detector contract.
pub trait StateParser: Send + Sync {
    /// Parser metadata.
    fn meta(&self) -> &ParserMeta;

    /// Detect the session state, or `None` if this parser has no opinion.
    fn detect_state(&self, ctx: &ParserContext) -> Option<StateDetection>;
}

/// Output classifier contract.
pub trait OutputParser: Send + Sync {
    /// Parser metadata.
    fn meta(&self) -> &ParserMeta;

    /// Cheap gate: does the context plausibly belong to this classifier?
    fn can_parse(&self, ctx: &ParserContext) -> bool;

    /// Parse the context into a semantic output, or `None`.
    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput>;
}

/// Confirmation detector contract.
pub trait ConfirmParser: Send + Sync {
    /// Parser metadata.
    fn meta(&self) -> &ParserMeta;

    /// Detect a pending confirmation dialog, or `None`.
    fn detect_confirm(&self, ctx: &ParserContext) -> Option<ConfirmInfo>;

    /// Bytes to write into the PTY to answer the dialog. The registry
    /// routes the response back to the parser that detected the dialog so
    /// the bytes match what the originating CLI expects.
    fn format_response(&self, info: &ConfirmInfo, response: &ConfirmResponse) -> Vec<u8>;
}
