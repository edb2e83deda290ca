/// MCP transport layer
///
/// This module serves the MCP session protocol over HTTP with Server-Sent
/// Events, including the bounded per-session outbound queue.

pub mod outbox;
pub mod protocol;
pub mod transport;

// Re-export main types
pub use outbox::{Outbox, OutboxClosed};
pub use transport::router;
