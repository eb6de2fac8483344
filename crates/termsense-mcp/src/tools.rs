//! MCP tool catalogue: one tool per session-manager operation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A tool definition following the MCP schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name, e.g. `term_exec`
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema of the arguments object
    pub input_schema: Value,
}

impl ToolDefinition {
    fn new(name: &str, description: &str, input_schema: Value) -> Self {
        ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Tool result content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Successful plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Successful JSON result.
    pub fn json<T: Serialize>(value: &T) -> Self {
        let text = serde_json::to_string(value)
            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
        ToolResult::text(text)
    }

    /// Error result carrying a stable kind.
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text {
                text: json!({ "error": { "kind": kind, "message": message.into() } }).to_string(),
            }],
            is_error: Some(true),
        }
    }
}

fn session_id_schema() -> Value {
    json!({
        "type": "string",
        "description": "Session id returned by term_create"
    })
}

/// Every tool the server exposes.
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "term_create",
            "Create a terminal session from a preset and return its id",
            json!({
                "type": "object",
                "properties": {
                    "preset": {
                        "type": "string",
                        "enum": ["shell", "claude-code", "docker"],
                        "description": "Parser bundle to load (default: shell)"
                    },
                    "command": {
                        "type": "string",
                        "description": "Command override; the preset's command otherwise"
                    },
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Arguments for the command override"
                    },
                    "cwd": { "type": "string", "description": "Working directory" },
                    "env": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Extra environment variables"
                    },
                    "cols": { "type": "number", "description": "Terminal columns" },
                    "rows": { "type": "number", "description": "Terminal rows" },
                    "logFile": {
                        "type": "string",
                        "description": "Session log file path; defaults to <log-dir>/<session_id>.log when the server was started with --log-dir"
                    }
                }
            }),
        ),
        ToolDefinition::new(
            "term_destroy",
            "Destroy a session (graceful close, force-kill on request)",
            json!({
                "type": "object",
                "properties": {
                    "sessionId": session_id_schema(),
                    "force": {
                        "type": "boolean",
                        "description": "Skip the graceful close and kill immediately"
                    }
                },
                "required": ["sessionId"]
            }),
        ),
        ToolDefinition::new(
            "term_destroy_all",
            "Destroy every session",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDefinition::new(
            "term_list",
            "List live sessions with state and idle age",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDefinition::new(
            "term_exec",
            "Run a command in an idle session and return the classified output",
            json!({
                "type": "object",
                "properties": {
                    "sessionId": session_id_schema(),
                    "command": { "type": "string", "description": "Command to run" },
                    "timeoutMs": {
                        "type": "number",
                        "description": "Completion timeout in milliseconds (default 30000)"
                    },
                    "parseOutput": {
                        "type": "boolean",
                        "description": "Classify the output (default true)"
                    }
                },
                "required": ["sessionId", "command"]
            }),
        ),
        ToolDefinition::new(
            "term_send",
            "Send a text message followed by Enter",
            json!({
                "type": "object",
                "properties": {
                    "sessionId": session_id_schema(),
                    "message": { "type": "string", "description": "Text to send" }
                },
                "required": ["sessionId", "message"]
            }),
        ),
        ToolDefinition::new(
            "term_write",
            "Write raw bytes (UTF-8 text, escapes allowed) to the PTY",
            json!({
                "type": "object",
                "properties": {
                    "sessionId": session_id_schema(),
                    "data": { "type": "string", "description": "Raw data to write" }
                },
                "required": ["sessionId", "data"]
            }),
        ),
        ToolDefinition::new(
            "term_interrupt",
            "Send Ctrl-C to a session",
            json!({
                "type": "object",
                "properties": { "sessionId": session_id_schema() },
                "required": ["sessionId"]
            }),
        ),
        ToolDefinition::new(
            "term_screen",
            "Read the session screen as plain text",
            json!({
                "type": "object",
                "properties": {
                    "sessionId": session_id_schema(),
                    "lines": {
                        "type": "number",
                        "description": "Only the last N lines when set"
                    }
                },
                "required": ["sessionId"]
            }),
        ),
        ToolDefinition::new(
            "term_state",
            "Read the session's current state",
            json!({
                "type": "object",
                "properties": { "sessionId": session_id_schema() },
                "required": ["sessionId"]
            }),
        ),
        ToolDefinition::new(
            "term_wait_for_state",
            "Block until the session enters a state or the timeout fires",
            json!({
                "type": "object",
                "properties": {
                    "sessionId": session_id_schema(),
                    "state": {
                        "type": "string",
                        "enum": [
                            "starting", "idle", "thinking", "responding",
                            "tool_running", "confirming", "error", "exited"
                        ],
                        "description": "State to wait for"
                    },
                    "timeoutMs": {
                        "type": "number",
                        "description": "Timeout in milliseconds (default 30000)"
                    }
                },
                "required": ["sessionId", "state"]
            }),
        ),
        ToolDefinition::new(
            "term_pending_confirm",
            "Read the pending confirmation dialog, if any",
            json!({
                "type": "object",
                "properties": { "sessionId": session_id_schema() },
                "required": ["sessionId"]
            }),
        ),
        ToolDefinition::new(
            "term_confirm",
            "Answer the pending confirmation dialog",
            json!({
                "type": "object",
                "properties": {
                    "sessionId": session_id_schema(),
                    "action": {
                        "type": "string",
                        "enum": ["confirm", "deny", "select", "input"],
                        "description": "How to answer"
                    },
                    "option": {
                        "type": "number",
                        "description": "Option number for select (1-based)"
                    },
                    "value": {
                        "type": "string",
                        "description": "Free-form value for input"
                    }
                },
                "required": ["sessionId", "action"]
            }),
        ),
    ]
}

/// Look up a tool definition by name.
pub fn get_tool(name: &str) -> Option<ToolDefinition> {
    all_tools().into_iter().find(|t| t.name == name)
}
