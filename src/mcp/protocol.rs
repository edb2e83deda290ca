//! MCP wire structures that are not part of the request/response stream
//!
//! Tool listings and server information are served as plain JSON over HTTP;
//! the numeric error codes here are embedded in every error response.

use serde::Serialize;
use serde_json::Value;

use crate::domain::ConcurrencyClass;
use crate::tools::ToolDescriptor;

/// MCP protocol version we advertise
pub const MCP_VERSION: &str = "2024-11-05";

/// Name reported to clients in server information
pub const SERVER_NAME: &str = "excel-mcp";

/// SSE event name carrying the POST endpoint for a new session
pub const ENDPOINT_EVENT: &str = "endpoint";

/// SSE event name carrying a serialized `Response`
pub const MESSAGE_EVENT: &str = "message";

/// MCP tool definition as returned by `GET /tools`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's input parameters
    pub input_schema: Value,
    pub concurrency: ConcurrencyClass,
}

impl From<&ToolDescriptor> for ToolDefinition {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.clone(),
            concurrency: descriptor.concurrency,
        }
    }
}

/// Body of `GET /tools`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolListing {
    pub protocol_version: &'static str,
    pub tools: Vec<ToolDefinition>,
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub name: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub in_flight: usize,
}

// JSON-RPC error codes (standard codes)
pub mod error_codes {
    /// Parse error - Invalid JSON was received by the server
    pub const PARSE_ERROR: i32 = -32700;
    /// Method not found - The requested tool doesn't exist
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid parameters - Tool exists but arguments are wrong
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error - Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Application-specific error codes (-32000 to -32099)
    /// The tool handler or its collaborator failed
    pub const HANDLER_ERROR: i32 = -32000;
    /// The session id is absent or already closed
    pub const UNKNOWN_SESSION: i32 = -32001;
    /// The request was cancelled before it completed
    pub const REQUEST_CANCELLED: i32 = -32002;
    /// The global concurrency ceiling and its wait queue are full
    pub const ADMISSION_REJECTED: i32 = -32003;
    /// A request with the same id is still outstanding in this session
    pub const DUPLICATE_REQUEST: i32 = -32004;
}
