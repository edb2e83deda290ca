//! Public library interface for the Excel MCP server
//!
//! This module exports the server, its configuration and the building
//! blocks that tests and embedders use.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod mcp;
pub mod session;
pub mod tools;
pub mod workbook;

pub use config::{ConfigError, ServerConfig};
pub use dispatch::{Accepted, Admission, Dispatcher};
pub use domain::*;
pub use session::{CloseReason, Session, SessionRegistry};
pub use tools::{register_excel_tools, ToolDescriptor, ToolRegistry};
pub use workbook::{MemoryWorkbooks, WorkbookBackend, WorkbookError};

/// Errors that stop the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Tool registration failed: {0}")]
    Registration(#[from] DispatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Excel MCP server serving workbook tools over SSE
pub struct ExcelMcpServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl ExcelMcpServer {
    /// Build a server whose Excel tools operate on `backend`
    pub fn new(config: ServerConfig, backend: Arc<dyn WorkbookBackend>) -> Result<Self, ServerError> {
        let mut tools = ToolRegistry::new();
        register_excel_tools(&mut tools, backend)?;
        Self::with_tools(config, tools)
    }

    /// Build a server around an already filled tool registry
    pub fn with_tools(config: ServerConfig, tools: ToolRegistry) -> Result<Self, ServerError> {
        config.validate()?;
        info!(tools = tools.len(), "Initializing Excel MCP server");

        let sessions = Arc::new(SessionRegistry::new(
            config.outbound_capacity,
            config.idle_timeout,
            config.close_grace,
        ));
        let admission = Arc::new(
            Admission::new(config.max_concurrency, config.admission_queue_depth)
                .with_exclusive_queue_depth(config.exclusive_queue_depth),
        );
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(tools), sessions, admission));

        Ok(Self { config, dispatcher })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// HTTP router for this server
    pub fn router(&self) -> axum::Router {
        mcp::router(self.dispatcher.clone())
    }

    /// Bind the listener and serve until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        self.serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Bind the listener and serve until `shutdown` completes
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Server listening on {}", addr);

        let sessions = self.dispatcher.sessions().clone();
        let stop_sweeper = CancellationToken::new();
        let sweeper = sessions.clone().spawn_idle_sweeper(stop_sweeper.clone());

        let close_on_shutdown = sessions.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutdown requested, closing sessions");
                // Ends open SSE streams so the graceful shutdown can finish
                close_on_shutdown.close_all();
            })
            .await?;

        stop_sweeper.cancel();
        if let Err(e) = sweeper.await {
            tracing::warn!("Idle sweeper ended abnormally: {}", e);
        }
        sessions.close_all();
        info!("Server stopped");
        Ok(())
    }
}
