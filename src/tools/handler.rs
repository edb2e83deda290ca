//! Handler contract between the dispatcher and tool implementations
//!
//! A handler receives validated arguments plus the request's cancellation
//! token and either completes with a single value or hands back a lazy stream
//! of chunks. Handlers only ever fail with `HandlerError`; collaborator error
//! types are converted before they reach this boundary.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::{HandlerError, RequestId, SessionId};

/// Lazy sequence of result chunks produced by a streaming handler
pub type ChunkStream = BoxStream<'static, Result<Value, HandlerError>>;

/// What a handler produced
pub enum ToolOutput {
    Complete(Value),
    /// Every chunk but the last is forwarded as a `partial` response; the
    /// last chunk becomes the terminal `ok` payload
    Streaming(ChunkStream),
}

impl std::fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
            Self::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Per-invocation context handed to a handler
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub request_id: RequestId,
    /// Fires on explicit cancel or session close; handlers should check it
    /// at every natural suspension point
    pub cancel: CancellationToken,
}

/// A tool implementation
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, ctx: ToolContext) -> Result<ToolOutput, HandlerError>;
}

/// Adapter turning an async closure into a `ToolHandler`
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, HandlerError>> + Send + 'static,
{
    async fn call(&self, arguments: Value, ctx: ToolContext) -> Result<ToolOutput, HandlerError> {
        (self.0)(arguments, ctx).await
    }
}

/// Build a handler from an async closure
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Run a blocking collaborator call on the blocking pool
///
/// If the awaiting request is cancelled the dispatcher drops this future;
/// the blocking call then runs to completion and its result is discarded.
pub async fn run_blocking<T, F>(f: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> Result<T, HandlerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HandlerError::new("collaborator_panicked", e.to_string()))?
}
