//! Routes MCP tool calls into the session manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use termsense_core::parser::{ConfirmAction, ConfirmResponse, SessionState};
use termsense_core::{CreateOptions, Error, SessionManager};

use crate::server::ToolHandler;
use crate::tools::ToolResult;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Tool handler backed by a [`SessionManager`].
pub struct ManagerHandler {
    manager: Arc<SessionManager>,
    default_preset: String,
    log_dir: Option<std::path::PathBuf>,
}

impl ManagerHandler {
    /// Create a handler with a default preset for `term_create`.
    pub fn new(manager: Arc<SessionManager>, default_preset: impl Into<String>) -> Self {
        Self {
            manager,
            default_preset: default_preset.into(),
            log_dir: None,
        }
    }

    /// Write per-session logs as `<log_dir>/<session_id>.log`.
    pub fn with_log_dir(mut self, log_dir: Option<std::path::PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    fn err(e: Error) -> ToolResult {
        ToolResult::error(e.kind(), e.to_string())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArgs {
    preset: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    cols: Option<u16>,
    rows: Option<u16>,
    log_file: Option<std::path::PathBuf>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
    session_id: String,
    force: Option<bool>,
    lines: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecArgs {
    session_id: String,
    command: String,
    timeout_ms: Option<u64>,
    parse_output: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendArgs {
    session_id: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteArgs {
    session_id: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitArgs {
    session_id: String,
    state: SessionState,
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmArgs {
    session_id: String,
    action: ConfirmAction,
    option: Option<u32>,
    value: Option<String>,
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T, ToolResult> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolResult::error("invalid_arguments", e.to_string()))
}

#[async_trait::async_trait]
impl ToolHandler for ManagerHandler {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        debug!(tool = name, "dispatching tool call");
        match name {
            "term_create" => {
                let args: CreateArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                let options = CreateOptions {
                    preset: args.preset.or_else(|| Some(self.default_preset.clone())),
                    command: args.command,
                    args: args.args,
                    cwd: args.cwd,
                    env: args.env,
                    cols: args.cols,
                    rows: args.rows,
                    log_file: args.log_file,
                    log_dir: self.log_dir.clone(),
                };
                match self.manager.create(options).await {
                    Ok(id) => ToolResult::json(&json!({ "sessionId": id })),
                    Err(e) => Self::err(e),
                }
            }
            "term_destroy" => {
                let args: SessionArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                match self
                    .manager
                    .destroy(&args.session_id, args.force.unwrap_or(false))
                    .await
                {
                    Ok(()) => ToolResult::json(&json!({ "destroyed": args.session_id })),
                    Err(e) => Self::err(e),
                }
            }
            "term_destroy_all" => {
                self.manager.destroy_all().await;
                ToolResult::json(&json!({ "destroyed": "all" }))
            }
            "term_list" => {
                let sessions = self.manager.list().await;
                let count = sessions.len();
                ToolResult::json(&json!({
                    "sessions": sessions,
                    "count": count,
                }))
            }
            "term_exec" => {
                let args: ExecArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                let wait = Duration::from_millis(args.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
                match self
                    .manager
                    .exec(
                        &args.session_id,
                        &args.command,
                        wait,
                        args.parse_output.unwrap_or(true),
                    )
                    .await
                {
                    Ok(output) => ToolResult::json(&output),
                    Err(e) => Self::err(e),
                }
            }
            "term_send" => {
                let args: SendArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                match self.manager.send(&args.session_id, &args.message).await {
                    Ok(()) => ToolResult::json(&json!({ "sent": true })),
                    Err(e) => Self::err(e),
                }
            }
            "term_write" => {
                let args: WriteArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                match self
                    .manager
                    .write(&args.session_id, args.data.as_bytes())
                    .await
                {
                    Ok(()) => ToolResult::json(&json!({ "written": args.data.len() })),
                    Err(e) => Self::err(e),
                }
            }
            "term_interrupt" => {
                let args: SessionArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                match self.manager.interrupt(&args.session_id).await {
                    Ok(()) => ToolResult::json(&json!({ "interrupted": true })),
                    Err(e) => Self::err(e),
                }
            }
            "term_screen" => {
                let args: SessionArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                match self.manager.get_screen(&args.session_id, args.lines).await {
                    Ok(text) => ToolResult::json(&json!({ "screen": text })),
                    Err(e) => Self::err(e),
                }
            }
            "term_state" => {
                let args: SessionArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                match self.manager.get_state(&args.session_id).await {
                    Ok(state) => ToolResult::json(&json!({ "state": state })),
                    Err(e) => Self::err(e),
                }
            }
            "term_wait_for_state" => {
                let args: WaitArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                let wait = Duration::from_millis(args.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
                match self
                    .manager
                    .wait_for_state(&args.session_id, args.state, wait)
                    .await
                {
                    Ok(()) => ToolResult::json(&json!({ "state": args.state })),
                    Err(e) => Self::err(e),
                }
            }
            "term_pending_confirm" => {
                let args: SessionArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                match self.manager.get_pending_confirm(&args.session_id).await {
                    Ok(info) => ToolResult::json(&json!({ "pending": info })),
                    Err(e) => Self::err(e),
                }
            }
            "term_confirm" => {
                let args: ConfirmArgs = match parse_args(arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                };
                let response = ConfirmResponse {
                    action: args.action,
                    option: args.option,
                    value: args.value,
                };
                match self
                    .manager
                    .respond_to_confirm(&args.session_id, &response)
                    .await
                {
                    Ok(()) => ToolResult::json(&json!({ "confirmed": true })),
                    Err(e) => Self::err(e),
                }
            }
            other => ToolResult::error("unknown_tool", format!("unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContent;

    fn text_of(result: &ToolResult) -> Value {
        let ToolContent::Text { text } = &result.content[0];
        serde_json::from_str(text).unwrap()
    }

    fn handler() -> ManagerHandler {
        ManagerHandler::new(SessionManager::new(), "shell")
    }

    #[tokio::test]
    async fn test_list_on_empty_manager() {
        let handler = handler();
        let result = handler.call("term_list", json!({})).await;
        let value = text_of(&result);
        assert_eq!(value["count"], 0);
    }

    #[tokio::test]
    async fn test_unknown_session_propagates_kind() {
        let handler = handler();
        let result = handler
            .call("term_state", json!({ "sessionId": "session-missing" }))
            .await;
        assert_eq!(result.is_error, Some(true));
        let value = text_of(&result);
        assert_eq!(value["error"]["kind"], "unknown_session");
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let handler = handler();
        let result = handler.call("term_exec", json!({ "sessionId": 42 })).await;
        assert_eq!(result.is_error, Some(true));
        let value = text_of(&result);
        assert_eq!(value["error"]["kind"], "invalid_arguments");
    }

    #[tokio::test]
    async fn test_unknown_preset_propagates_kind() {
        let handler = handler();
        let result = handler
            .call("term_create", json!({ "preset": "fortran" }))
            .await;
        assert_eq!(result.is_error, Some(true));
        let value = text_of(&result);
        assert_eq!(value["error"]["kind"], "unknown_preset");
    }

    #[tokio::test]
    async fn test_create_and_destroy_roundtrip() {
        let handler = handler();

        let result = handler.call("term_create", json!({})).await;
        assert!(result.is_error.is_none());
        let value = text_of(&result);
        let session_id = value["sessionId"].as_str().unwrap().to_string();
        assert!(session_id.starts_with("session-"));

        let result = handler
            .call("term_state", json!({ "sessionId": session_id }))
            .await;
        assert!(result.is_error.is_none());

        let result = handler
            .call(
                "term_destroy",
                json!({ "sessionId": session_id, "force": true }),
            )
            .await;
        assert!(result.is_error.is_none());

        let result = handler.call("term_list", json!({})).await;
        assert_eq!(text_of(&result)["count"], 0);
    }

    #[tokio::test]
    async fn test_log_dir_wires_into_created_sessions() {
        let log_dir =
            std::env::temp_dir().join(format!("termsense-mcp-logs-{}", std::process::id()));
        let handler = ManagerHandler::new(SessionManager::new(), "shell")
            .with_log_dir(Some(log_dir.clone()));

        let created = handler.call("term_create", json!({})).await;
        assert!(created.is_error.is_none());
        let session_id = text_of(&created)["sessionId"].as_str().unwrap().to_string();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let log_path = log_dir.join(format!("{session_id}.log"));
        assert!(log_path.exists(), "expected session log at {log_path:?}");

        let _ = handler
            .call(
                "term_destroy",
                json!({ "sessionId": session_id, "force": true }),
            )
            .await;
        let _ = std::fs::remove_dir_all(&log_dir);
    }

    #[tokio::test]
    async fn test_confirm_without_pending_errors() {
        let handler = handler();

        let created = handler.call("term_create", json!({})).await;
        let session_id = text_of(&created)["sessionId"].as_str().unwrap().to_string();

        let result = handler
            .call(
                "term_confirm",
                json!({ "sessionId": session_id, "action": "confirm" }),
            )
            .await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text_of(&result)["error"]["kind"], "no_pending_confirmation");

        let _ = handler
            .call(
                "term_destroy",
                json!({ "sessionId": session_id, "force": true }),
            )
            .await;
    }
}
