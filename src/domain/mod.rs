//! Domain module containing the request/response model and error taxonomy
//!
//! These types are shared by the transport, the session registry, the
//! dispatcher and the tool handlers. Nothing in here performs I/O.

pub mod message;
pub mod types;

pub use message::*;
pub use types::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mcp::protocol::error_codes;

/// Failure raised by a tool handler after normalizing its collaborator's error
///
/// `code` is a stable snake_case identifier (e.g. `sheet_not_found`) that
/// clients may match on; `detail` is meant for humans.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {detail}")]
pub struct HandlerError {
    pub code: String,
    pub detail: String,
}

impl HandlerError {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

/// Errors that can occur while accepting, scheduling or running a request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments: {message}")]
    SchemaValidation { message: String },

    #[error("Unknown session: {id}")]
    UnknownSession { id: String },

    #[error("Duplicate tool registration: {name}")]
    DuplicateTool { name: String },

    #[error("Request {request_id} is already in flight")]
    DuplicateRequest { request_id: String },

    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Admission rejected: {in_flight} requests executing and {queued} queued")]
    AdmissionRejected { in_flight: usize, queued: usize },
}

/// Flat classification of `DispatchError` as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedRequest,
    UnknownTool,
    SchemaValidationError,
    UnknownSession,
    DuplicateTool,
    DuplicateRequest,
    HandlerError,
    Cancelled,
    AdmissionRejected,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedRequest(_) => ErrorKind::MalformedRequest,
            Self::UnknownTool { .. } => ErrorKind::UnknownTool,
            Self::SchemaValidation { .. } => ErrorKind::SchemaValidationError,
            Self::UnknownSession { .. } => ErrorKind::UnknownSession,
            Self::DuplicateTool { .. } => ErrorKind::DuplicateTool,
            Self::DuplicateRequest { .. } => ErrorKind::DuplicateRequest,
            Self::Handler(_) => ErrorKind::HandlerError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AdmissionRejected { .. } => ErrorKind::AdmissionRejected,
        }
    }

    /// Numeric code in the JSON-RPC style used by MCP clients
    pub fn protocol_code(&self) -> i32 {
        match self {
            Self::MalformedRequest(_) => error_codes::PARSE_ERROR,
            Self::UnknownTool { .. } => error_codes::METHOD_NOT_FOUND,
            Self::SchemaValidation { .. } => error_codes::INVALID_PARAMS,
            Self::UnknownSession { .. } => error_codes::UNKNOWN_SESSION,
            Self::DuplicateTool { .. } => error_codes::INTERNAL_ERROR,
            Self::DuplicateRequest { .. } => error_codes::DUPLICATE_REQUEST,
            Self::Handler(_) => error_codes::HANDLER_ERROR,
            Self::Cancelled => error_codes::REQUEST_CANCELLED,
            Self::AdmissionRejected { .. } => error_codes::ADMISSION_REJECTED,
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
        }
    }
}
