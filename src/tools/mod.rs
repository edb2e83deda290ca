/// MCP tools for workbook management
///
/// This module holds the handler contract, the tool registry and the Excel
/// tools that external clients can call.

pub mod excel;
pub mod handler;
pub mod registry;
pub mod schema;

// Re-export the types the dispatcher and transport work with
pub use excel::register_excel_tools;
pub use handler::{handler_fn, run_blocking, ChunkStream, ToolContext, ToolHandler, ToolOutput};
pub use registry::{RegisteredTool, ToolDescriptor, ToolRegistry};
