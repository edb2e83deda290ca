//! Main entry point for the Excel MCP server
//!
//! This file sets up logging, parses command line arguments, and starts the
//! SSE server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use excel_mcp_server::{ExcelMcpServer, MemoryWorkbooks, ServerConfig};

/// Command line arguments for the Excel MCP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "FASTMCP_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "FASTMCP_PORT", default_value_t = 8017)]
    port: u16,

    /// Requests allowed to execute at once across all sessions
    #[arg(long, env = "EXCEL_MCP_MAX_CONCURRENCY", default_value_t = 16)]
    max_concurrency: usize,

    /// Requests allowed to wait for an execution slot
    #[arg(long, env = "EXCEL_MCP_ADMISSION_QUEUE", default_value_t = 64)]
    admission_queue_depth: usize,

    /// Exclusive requests of one session allowed to wait their turn
    #[arg(long, env = "EXCEL_MCP_EXCLUSIVE_QUEUE", default_value_t = 32)]
    exclusive_queue_depth: usize,

    /// Close sessions idle for this many seconds
    #[arg(long, env = "EXCEL_MCP_IDLE_TIMEOUT_SECS", default_value_t = 1800)]
    idle_timeout_secs: u64,

    /// Seconds a closed session waits for its cancelled requests
    #[arg(long, env = "EXCEL_MCP_CLOSE_GRACE_SECS", default_value_t = 10)]
    close_grace_secs: u64,

    /// Responses buffered per session
    #[arg(long, env = "EXCEL_MCP_OUTBOUND_CAPACITY", default_value_t = 256)]
    outbound_capacity: usize,

    /// Also write logs to this file
    #[arg(long, env = "EXCEL_MCP_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output (implies debug)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_concurrency: self.max_concurrency,
            admission_queue_depth: self.admission_queue_depth,
            exclusive_queue_depth: self.exclusive_queue_depth,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            close_grace: Duration::from_secs(self.close_grace_secs),
            outbound_capacity: self.outbound_capacity,
        }
    }
}

/// Set up stderr logging and, if requested, a non-blocking file writer
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(args: &Args) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let log_level = if args.verbose {
        "debug"
    } else if args.debug {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("excel_mcp_server={},tower_http={}", log_level, log_level)));

    // Send logs to stderr, not stdout
    let console = fmt::layer().with_writer(std::io::stderr).boxed();

    let (file, guard) = match &args.log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
            std::fs::create_dir_all(dir)?;
            let name = path
                .file_name()
                .ok_or_else(|| format!("log file path has no file name: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    info!("Starting Excel MCP server");

    let server = ExcelMcpServer::new(args.server_config(), Arc::new(MemoryWorkbooks::new()))?;
    server.run().await?;

    info!("Excel MCP server shutdown complete");
    Ok(())
}
