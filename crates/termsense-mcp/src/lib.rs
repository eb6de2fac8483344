//! # termsense-mcp
//!
//! MCP (Model Context Protocol) server for termsense terminal sessions.
//!
//! - Self-contained JSON-RPC 2.0 protocol implementation
//! - Async stdio transport on tokio
//! - 13 tools mapping 1:1 onto the session-manager operations:
//!   create / destroy / destroy_all / list / exec / send / write /
//!   interrupt / screen / state / wait_for_state / pending_confirm /
//!   confirm

pub mod handler;
pub mod protocol;
pub mod server;
pub mod tools;

pub use handler::ManagerHandler;
pub use protocol::{Request, RequestId, Response, RpcError};
pub use server::{McpServer, ToolHandler};
pub use tools::{all_tools, get_tool, ToolContent, ToolDefinition, ToolResult};
