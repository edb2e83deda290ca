use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use excel_mcp_server::tools::{handler_fn, ToolOutput};
use excel_mcp_server::*;
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Records how the test collaborator was called
#[derive(Default)]
pub struct CallLog {
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    /// Request values in the order their executions started
    pub started: Mutex<Vec<Value>>,
}

impl CallLog {
    fn enter(&self, value: Value) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.started.lock().push(value);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub fn write_cell_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sheet": {"type": "string"},
            "row": {"type": "integer", "minimum": 1},
            "col": {"type": "integer", "minimum": 1},
            "value": {}
        },
        "required": ["sheet", "row", "col", "value"],
        "additionalProperties": false
    })
}

/// Registry with the tools the scenarios use
///
/// - `list_sheets`: concurrent, no arguments
/// - `write_cell`: exclusive per session, takes 40ms
/// - `slow`: concurrent, sleeps for `ms`
/// - `stream_rows`: concurrent, streams `n` chunks
/// - `explode`: always fails with a handler error
/// - `boom`: panics, while streaming if `stream` is set
pub fn test_tools(log: Arc<CallLog>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let p = log.clone();
    registry
        .register(
            ToolDescriptor::new(
                "list_sheets",
                "List sheets",
                tools::schema::empty_object_schema(),
                ConcurrencyClass::Concurrent,
            ),
            handler_fn(move |_args, _ctx| {
                let log = p.clone();
                async move {
                    log.enter(json!("list_sheets"));
                    log.exit();
                    Ok(ToolOutput::Complete(json!(["Sheet1"])))
                }
            }),
        )
        .unwrap();

    let p = log.clone();
    registry
        .register(
            ToolDescriptor::new(
                "write_cell",
                "Write one cell",
                write_cell_schema(),
                ConcurrencyClass::ExclusivePerSession,
            ),
            handler_fn(move |args: Value, _ctx| {
                let log = p.clone();
                async move {
                    log.enter(args["value"].clone());
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    log.exit();
                    Ok(ToolOutput::Complete(json!({"written": args["value"]})))
                }
            }),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::new(
                "slow",
                "Sleep for a while",
                json!({"type": "object", "properties": {"ms": {"type": "integer", "minimum": 0}}, "required": ["ms"]}),
                ConcurrencyClass::Concurrent,
            ),
            handler_fn(|args: Value, _ctx| async move {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ToolOutput::Complete(json!({"slept": ms})))
            }),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::new(
                "stream_rows",
                "Stream numbered rows",
                json!({"type": "object", "properties": {"n": {"type": "integer", "minimum": 0}}, "required": ["n"]}),
                ConcurrencyClass::Concurrent,
            ),
            handler_fn(|args: Value, _ctx| async move {
                let n = args["n"].as_u64().unwrap_or(0);
                let chunks = async_stream_rows(n);
                Ok(ToolOutput::Streaming(chunks))
            }),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::new(
                "explode",
                "Always fails",
                tools::schema::empty_object_schema(),
                ConcurrencyClass::Concurrent,
            ),
            handler_fn(|_args, _ctx| async {
                Err(HandlerError::new("sheet_not_found", "Sheet 'Q3' not found"))
            }),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::new(
                "boom",
                "Panics",
                json!({"type": "object", "properties": {"stream": {"type": "boolean"}}}),
                ConcurrencyClass::ExclusivePerSession,
            ),
            handler_fn(|args: Value, _ctx| async move {
                let rows: Vec<Value> = Vec::new();
                if args["stream"] == json!(true) {
                    use futures::StreamExt;
                    let chunks = futures::stream::iter(0..3usize)
                        .map(move |i| match i {
                            0 => Ok(json!({"row": 0})),
                            _ => Ok(rows[i].clone()),
                        })
                        .boxed();
                    return Ok(ToolOutput::Streaming(chunks));
                }
                Ok(ToolOutput::Complete(rows[0].clone()))
            }),
        )
        .unwrap();

    registry
}

fn async_stream_rows(n: u64) -> tools::ChunkStream {
    use futures::StreamExt;
    futures::stream::iter(0..n)
        .then(|i| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!({"row": i}))
        })
        .boxed()
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub log: Arc<CallLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(16, 64, 64)
    }

    pub fn with_limits(ceiling: usize, queue_depth: usize, outbound_capacity: usize) -> Self {
        let log = Arc::new(CallLog::default());
        let sessions = Arc::new(SessionRegistry::new(
            outbound_capacity,
            Duration::from_secs(60),
            Duration::from_millis(500),
        ));
        let admission = Arc::new(Admission::new(ceiling, queue_depth));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(test_tools(log.clone())),
            sessions,
            admission,
        ));
        Self { dispatcher, log }
    }

    pub fn open(&self) -> Arc<Session> {
        self.dispatcher.sessions().open()
    }

    pub fn submit(&self, session: &Session, id: &str, tool: &str, arguments: Value) -> tokio::task::JoinHandle<()> {
        self.dispatcher
            .submit(session.id(), ToolCall::new(id, tool, arguments))
            .expect("request should be accepted")
    }
}

/// Next response queued for `session`, failing the test after two seconds
pub async fn next_response(session: &Session) -> Response {
    tokio::time::timeout(Duration::from_secs(2), session.outbox().recv())
        .await
        .expect("timed out waiting for a response")
        .expect("outbox closed")
}

/// Read responses until `terminals` terminal responses have arrived
pub async fn collect_terminals(session: &Session, terminals: usize) -> Vec<Response> {
    let mut seen = Vec::new();
    let mut remaining = terminals;
    while remaining > 0 {
        let response = next_response(session).await;
        if response.is_terminal() {
            remaining -= 1;
        }
        seen.push(response);
    }
    seen
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn request_id(id: &str) -> Option<RequestId> {
    Some(RequestId::from(id))
}
