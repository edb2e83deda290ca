//! Inbound requests and outbound responses as they travel between the
//! transport and the dispatcher

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{DispatchError, ErrorKind, RequestId};

/// A tool invocation sent by a client
///
/// Wire form: `{"requestId": "r1", "tool": "write_data_to_excel", "arguments": {...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolCall {
    pub request_id: RequestId,
    pub tool: String,
    /// Missing arguments are treated as an empty object
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

impl ToolCall {
    pub fn new(request_id: impl Into<RequestId>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            request_id: request_id.into(),
            tool: tool.into(),
            arguments,
        }
    }
}

/// `{"cancel": <requestId>}` cancels an outstanding request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelRequest {
    pub cancel: RequestId,
}

/// Everything a client may POST to its session endpoint
///
/// Both shapes reject unknown fields, so a body mixing a cancel with a
/// call matches neither.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Cancel(CancelRequest),
    Call(ToolCall),
}

impl InboundMessage {
    pub fn cancel(request_id: impl Into<RequestId>) -> Self {
        Self::Cancel(CancelRequest {
            cancel: request_id.into(),
        })
    }
}

impl InboundMessage {
    /// Decode one POSTed body
    ///
    /// Any failure is reported as `MalformedRequest`, which is scoped to the
    /// connection rather than to a request.
    pub fn decode(body: &[u8]) -> Result<Self, DispatchError> {
        serde_json::from_slice(body).map_err(|e| DispatchError::MalformedRequest(e.to_string()))
    }
}

/// Outcome class of a single response event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
    Partial,
}

/// Machine-readable error body carried by `error` responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    /// Numeric protocol code, see `mcp::protocol::error_codes`
    pub code: i32,
    /// Stable collaborator error code, only set for handler failures
    #[serde(rename = "handlerCode", skip_serializing_if = "Option::is_none")]
    pub handler_code: Option<String>,
    pub message: String,
}

impl From<&DispatchError> for ErrorDetail {
    fn from(error: &DispatchError) -> Self {
        let handler_code = match error {
            DispatchError::Handler(e) => Some(e.code.clone()),
            _ => None,
        };
        Self {
            kind: error.kind(),
            code: error.protocol_code(),
            handler_code,
            message: error.to_string(),
        }
    }
}

/// One event emitted towards a client
///
/// A request produces zero or more `partial` responses followed by exactly
/// one terminal `ok` or `error` response. `seq` counts from zero per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// `None` only for connection-scoped decoding failures
    pub request_id: Option<RequestId>,
    pub seq: u64,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Response {
    pub fn ok(request_id: RequestId, seq: u64, payload: Value) -> Self {
        Self {
            request_id: Some(request_id),
            seq,
            status: ResponseStatus::Ok,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn partial(request_id: RequestId, seq: u64, payload: Value) -> Self {
        Self {
            request_id: Some(request_id),
            seq,
            status: ResponseStatus::Partial,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(request_id: Option<RequestId>, seq: u64, error: &DispatchError) -> Self {
        Self {
            request_id,
            seq,
            status: ResponseStatus::Error,
            payload: None,
            error: Some(ErrorDetail::from(error)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, ResponseStatus::Partial)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
