//! HTTP + SSE transport
//!
//! `GET /sse` opens a session and streams its responses; clients post
//! messages to the endpoint announced in the first event. Dropping the SSE
//! stream closes the session.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response as HttpResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::protocol::{HealthStatus, ToolDefinition, ToolListing, ENDPOINT_EVENT, MCP_VERSION, MESSAGE_EVENT, SERVER_NAME};
use crate::dispatch::{Accepted, Dispatcher};
use crate::domain::{DispatchError, ErrorDetail, InboundMessage, SessionId};
use crate::session::{CloseReason, SessionRegistry};

/// Interval between SSE keep-alive comments
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the HTTP router
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages", post(message_handler))
        .route("/tools", get(list_tools))
        .route("/health", get(health))
        .with_state(AppState { dispatcher })
        .layer(TraceLayer::new_for_http())
}

/// Closes the session when the SSE stream is dropped
struct SessionGuard {
    sessions: Arc<SessionRegistry>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.close(&self.id, CloseReason::Disconnected) {
            debug!(session_id = %self.id, "SSE stream dropped");
        }
    }
}

/// GET /sse - open a session and stream its responses
async fn sse_handler(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sessions = state.dispatcher.sessions().clone();
    let session = sessions.open();
    let endpoint = format!("/messages?session_id={}", session.id());
    let guard = SessionGuard {
        sessions,
        id: session.id().clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Event, Infallible>(Event::default().event(ENDPOINT_EVENT).data(endpoint));

        while let Some(response) = session.outbox().recv().await {
            match Event::default().event(MESSAGE_EVENT).json_data(&response) {
                Ok(event) => yield Ok(event),
                Err(e) => warn!(session_id = %session.id(), "Failed to encode response: {}", e),
            }
        }
        debug!(session_id = %session.id(), "Session outbox closed, ending stream");
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session_id: Option<String>,
}

/// POST /messages - submit a tool call or a cancel for a session
async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> HttpResponse {
    let Some(session_id) = query.session_id.map(SessionId::from) else {
        return reject(DispatchError::UnknownSession { id: String::new() });
    };

    let message = match InboundMessage::decode(&body) {
        Ok(message) => message,
        Err(error) => {
            debug!(session_id = %session_id, "Malformed message: {}", error);
            if let Err(e) = state.dispatcher.report_malformed(&session_id, error.clone()) {
                return reject(e);
            }
            return reject(error);
        }
    };

    match state.dispatcher.handle(&session_id, message) {
        Ok(Accepted::Call(_)) => (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))).into_response(),
        Ok(Accepted::Cancel { found }) => {
            (StatusCode::ACCEPTED, Json(json!({"status": "accepted", "found": found}))).into_response()
        }
        Err(error) => reject(error),
    }
}

/// GET /tools - the registered tool catalog
async fn list_tools(State(state): State<AppState>) -> Json<ToolListing> {
    let tools = state
        .dispatcher
        .tools()
        .descriptors()
        .into_iter()
        .map(ToolDefinition::from)
        .collect();
    Json(ToolListing {
        protocol_version: MCP_VERSION,
        tools,
    })
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        name: SERVER_NAME,
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.dispatcher.sessions().active_count(),
        in_flight: state.dispatcher.admission().in_flight(),
    })
}

/// HTTP status for a message that was not accepted
pub fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::UnknownSession { .. } => StatusCode::NOT_FOUND,
        DispatchError::DuplicateRequest { .. } => StatusCode::CONFLICT,
        DispatchError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: DispatchError) -> HttpResponse {
    (status_for(&error), Json(ErrorDetail::from(&error))).into_response()
}
