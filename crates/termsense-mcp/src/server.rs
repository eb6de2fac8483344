//! MCP stdio server: newline-delimited JSON-RPC 2.0 over stdin/stdout.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::protocol::{self, Request, RequestId, Response, RpcError};
use crate::tools::{self, ToolResult};

const SERVER_NAME: &str = "termsense";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Handles `tools/call` requests.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the named tool with the given arguments.
    async fn call(&self, name: &str, arguments: Value) -> ToolResult;
}

/// The MCP server.
pub struct McpServer<H: ToolHandler> {
    handler: Arc<H>,
    initialized: bool,
}

impl<H: ToolHandler> McpServer<H> {
    /// Create a server around a tool handler.
    pub fn new(handler: H) -> Self {
        McpServer {
            handler: Arc::new(handler),
            initialized: false,
        }
    }

    /// Serve stdin/stdout until EOF.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("MCP server listening on stdio");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                info!("stdin closed, shutting down");
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!(request = %line, "received");

            let response = self.handle_line(line).await;
            let payload = protocol::serialize_response(&response)?;
            debug!(response = %payload, "sending");

            stdout.write_all(payload.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }

    /// Handle one newline-delimited JSON-RPC message.
    pub async fn handle_line(&mut self, message: &str) -> Response {
        match protocol::parse_request(message) {
            Ok(request) => self.handle_request(request).await,
            Err(err) => Response::from_error(RequestId::Null, err),
        }
    }

    /// Handle a parsed request.
    pub async fn handle_request(&mut self, request: Request) -> Response {
        let id = request.id.clone();
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "notifications/initialized" => Response::success(id, json!({})),
            "tools/list" => Response::success(id, json!({ "tools": tools::all_tools() })),
            "tools/call" => self.handle_tools_call(id, params).await,
            "ping" => Response::success(id, json!({})),
            method => {
                warn!(method, "unknown method");
                Response::from_error(id, RpcError::MethodNotFound(method.to_string()))
            }
        }
    }

    fn handle_initialize(&mut self, id: RequestId) -> Response {
        self.initialized = true;
        info!("MCP server initialized");
        Response::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION,
                }
            }),
        )
    }

    async fn handle_tools_call(&self, id: RequestId, params: Value) -> Response {
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return Response::from_error(
                id,
                RpcError::InvalidParams("missing 'name' field".to_string()),
            );
        };

        if tools::get_tool(name).is_none() {
            return Response::from_error(
                id,
                RpcError::InvalidParams(format!("unknown tool: {name}")),
            );
        }

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        debug!(tool = name, "calling tool");

        let result = self.handler.call(name, arguments).await;
        Response::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
    }
}
