//! Request dispatcher
//!
//! Every accepted request runs in its own task through
//! `Received → Validated → Scheduled → Executing → {Completed | Failed | Cancelled}`
//! and ends with exactly one terminal response. Responses of one request
//! are emitted in order by that task alone; different requests interleave.

pub mod admission;

pub use admission::Admission;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::domain::{DispatchError, HandlerError, InboundMessage, RequestId, Response, SessionId, ToolCall};
use crate::session::{Session, SessionRegistry};
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};

/// What the dispatcher did with an inbound message
#[derive(Debug)]
pub enum Accepted {
    /// The call was accepted and is running in the returned task
    Call(JoinHandle<()>),
    /// A cancel message; `found` is false if nothing was outstanding under
    /// that request id
    Cancel { found: bool },
}

/// Routes accepted requests to tool handlers
pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionRegistry>,
    admission: Arc<Admission>,
}

impl Dispatcher {
    pub fn new(tools: Arc<ToolRegistry>, sessions: Arc<SessionRegistry>, admission: Arc<Admission>) -> Self {
        Self {
            tools,
            sessions,
            admission,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Handle one decoded inbound message for a session
    pub fn handle(&self, session_id: &SessionId, message: InboundMessage) -> Result<Accepted, DispatchError> {
        match message {
            InboundMessage::Call(call) => self.submit(session_id, call).map(Accepted::Call),
            InboundMessage::Cancel(request) => {
                let found = self.cancel(session_id, &request.cancel)?;
                Ok(Accepted::Cancel { found })
            }
        }
    }

    /// Accept a tool call and start it
    ///
    /// Fails without accepting anything when the session is unknown or the
    /// request id is already outstanding. Every other failure is reported
    /// as the request's terminal response.
    pub fn submit(&self, session_id: &SessionId, call: ToolCall) -> Result<JoinHandle<()>, DispatchError> {
        let session = self.sessions.get(session_id)?;
        let cancel = session.begin_request(&call.request_id)?;

        let span = info_span!(
            "request",
            session_id = %session_id,
            request_id = %call.request_id,
            tool = %call.tool,
        );
        debug!(parent: &span, "Request received");

        let task = RequestTask {
            tools: self.tools.clone(),
            admission: self.admission.clone(),
            session,
            call,
            cancel,
        };
        Ok(tokio::spawn(task.run().instrument(span)))
    }

    /// Cancel an outstanding request of a session
    pub fn cancel(&self, session_id: &SessionId, request_id: &RequestId) -> Result<bool, DispatchError> {
        let session = self.sessions.get(session_id)?;
        session.touch();
        let found = session.cancel_request(request_id);
        debug!(session_id = %session_id, request_id = %request_id, found, "Cancel requested");
        Ok(found)
    }

    /// Report an undecodable message on the session stream
    ///
    /// The error response carries no request id. Delivery happens in the
    /// background so the caller never waits on a slow client.
    pub fn report_malformed(&self, session_id: &SessionId, error: DispatchError) -> Result<(), DispatchError> {
        let session = self.sessions.get(session_id)?;
        session.touch();
        tokio::spawn(async move {
            if session.outbox().send(Response::error(None, 0, &error)).await.is_err() {
                debug!(session_id = %session.id(), "Session gone before malformed-request error was delivered");
            }
        });
        Ok(())
    }
}

/// Slots held by a running request
#[derive(Default)]
struct Held {
    exclusive: Option<OwnedSemaphorePermit>,
    admission: Option<OwnedSemaphorePermit>,
}

/// Emits the responses of one request in sequence order
struct Emitter {
    session: Arc<Session>,
    request_id: RequestId,
    next_seq: u64,
    connected: bool,
}

impl Emitter {
    async fn partial(&mut self, payload: Value) {
        let response = Response::partial(self.request_id.clone(), self.next_seq, payload);
        self.next_seq += 1;
        self.deliver(response).await;
    }

    async fn terminal(mut self, result: &Result<Value, DispatchError>) {
        let response = match result {
            Ok(payload) => Response::ok(self.request_id.clone(), self.next_seq, payload.clone()),
            Err(error) => Response::error(Some(self.request_id.clone()), self.next_seq, error),
        };
        self.deliver(response).await;
    }

    async fn deliver(&mut self, response: Response) {
        if !self.connected {
            return;
        }
        if self.session.outbox().send(response).await.is_err() {
            debug!("Session stream is gone, discarding responses");
            self.connected = false;
        }
    }
}

struct RequestTask {
    tools: Arc<ToolRegistry>,
    admission: Arc<Admission>,
    session: Arc<Session>,
    call: ToolCall,
    cancel: CancellationToken,
}

impl RequestTask {
    async fn run(self) {
        let mut emitter = Emitter {
            session: self.session.clone(),
            request_id: self.call.request_id.clone(),
            next_seq: 0,
            connected: true,
        };
        let mut held = Held::default();

        // A panicking handler or chunk stream still ends with one terminal response
        let result = AssertUnwindSafe(self.execute(&mut emitter, &mut held))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(handler_panicked(panic)));
        match &result {
            Ok(_) => info!("Request completed"),
            Err(DispatchError::Cancelled) => info!("Request cancelled"),
            Err(error) => warn!(kind = ?error.kind(), "Request failed: {}", error),
        }

        // Free the global slot before waiting on the client; keep the
        // exclusive gate until the terminal response is queued so exclusive
        // requests finish in admission order.
        drop(held.admission.take());
        emitter.terminal(&result).await;
        self.session.finish_request(&self.call.request_id);
        drop(held);
    }

    async fn execute(&self, emitter: &mut Emitter, held: &mut Held) -> Result<Value, DispatchError> {
        let tool = self.tools.resolve(&self.call.tool)?;
        tool.descriptor.validate(&self.call.arguments)?;
        debug!("Request validated");

        if tool.descriptor.concurrency.is_exclusive() {
            held.exclusive = Some(self.admission.acquire_exclusive(&self.session, &self.cancel).await?);
        }
        held.admission = Some(self.admission.acquire(&self.cancel).await?);
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        debug!("Request scheduled, executing");

        let ctx = ToolContext {
            session_id: self.session.id().clone(),
            request_id: self.call.request_id.clone(),
            cancel: self.cancel.clone(),
        };
        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
            output = tool.handler.call(self.call.arguments.clone(), ctx) => output?,
        };

        match output {
            ToolOutput::Complete(value) => Ok(value),
            ToolOutput::Streaming(mut chunks) => {
                let mut last = None;
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
                        next = chunks.next() => next,
                    };
                    match next {
                        Some(Ok(chunk)) => {
                            if let Some(previous) = last.replace(chunk) {
                                emitter.partial(previous).await;
                            }
                        }
                        Some(Err(error)) => return Err(error.into()),
                        None => return Ok(last.unwrap_or(Value::Null)),
                    }
                }
            }
        }
    }
}

fn handler_panicked(panic: Box<dyn Any + Send>) -> DispatchError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    HandlerError::new("handler_panicked", detail).into()
}
