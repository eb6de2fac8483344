//! # termsense-core
//!
//! Semantic terminal engine: turns the raw character stream of an
//! interactive terminal into a structured, observable model an AI agent
//! can consume.
//!
//! The pipeline, bottom up:
//!
//! - [`pattern`] / [`fingerprint`]: shared matching primitives
//! - [`parser`]: the three parser families (state detectors, output
//!   classifiers, confirmation detectors) and their registry
//! - [`enrich`]: severity classification and actionable suggestions
//! - [`screen`]: the ANSI-aware virtual screen (alacritty-backed)
//! - [`pty`]: the child-process transport
//! - [`session`]: the driver with its evaluation tick, state machine and `exec`
//! - [`manager`]: multiplexing, quotas, idle eviction, presets

#![warn(clippy::all)]

pub mod enrich;
pub mod error;
pub mod fingerprint;
pub mod manager;
pub mod parser;
pub mod pattern;
pub mod permission;
pub mod preset;
pub mod pty;
pub mod screen;
pub mod session;

pub use enrich::{
    create_enhanced_output, determine_severity, extract_suggestions, EnhancedOutput,
    EnrichContext, OutputMetadata, Severity, Suggestion, SuggestionKind,
};
pub use error::{Error, Result};
pub use fingerprint::{
    claude_code_fingerprints, default_registry as default_fingerprints, Category, Fingerprint,
    FingerprintHints, FingerprintMatch, FingerprintRegistry, FingerprintResult, MatchKind,
};
pub use manager::{
    CreateOptions, ManagerConfig, ManagerEvent, SessionManager, SessionSummary,
};
pub use parser::{
    ConfirmAction, ConfirmInfo, ConfirmOption, ConfirmParser, ConfirmResponse, ConfirmType,
    OutputData, OutputParser, OutputType, ParserContext, ParserMeta, ParserRegistry,
    SemanticOutput, SessionState, StateDetection, StateMeta, StateParser, ToolRequest,
};
pub use permission::PermissionRules;
pub use preset::{claude_code_preset, docker_preset, resolve as resolve_preset, shell_preset, Preset};
pub use screen::{CursorPos, Screen};
pub use session::{
    ExecResult, Message, MessageRole, PermissionChecker, PermissionDecision, ScreenSnapshot,
    SessionDriver, SessionEvent, SessionOptions,
};
