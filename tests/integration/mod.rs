/// Integration tests for the Excel MCP server
///
/// These drive the dispatcher and the HTTP router end to end with test tools
/// and the in-memory workbook backend.
mod support;

mod sse_transport;
