use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use excel_mcp_server::*;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::support::*;

fn server() -> ExcelMcpServer {
    ExcelMcpServer::new(ServerConfig::default(), Arc::new(MemoryWorkbooks::new())).unwrap()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(app: &Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn endpoint(session: &Session) -> String {
    format!("/messages?session_id={}", session.id())
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let server = server();
    let app = server.router();

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "excel-mcp");
    assert_eq!(body["sessions"], 0);

    server.dispatcher().sessions().open();
    let (_, body) = get(&app, "/health").await;
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["inFlight"], 0);
}

#[tokio::test]
async fn test_tools_lists_excel_catalog() {
    let app = server().router();

    let (status, body) = get(&app, "/tools").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["protocolVersion"], mcp::protocol::MCP_VERSION);

    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 19);
    assert_eq!(tools[0]["name"], "copy_range");

    let write = tools
        .iter()
        .find(|t| t["name"] == "write_data_to_excel")
        .unwrap();
    assert_eq!(write["concurrency"], "exclusive-per-session");
    assert_eq!(write["inputSchema"]["type"], "object");
}

#[tokio::test]
async fn test_post_to_unknown_session_is_not_found() {
    let app = server().router();
    let call = json!({"requestId": 1, "tool": "list_backend_files"}).to_string();

    let (status, body) = post(&app, "/messages?session_id=nope", call.clone()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "UnknownSession");

    let (status, _) = post(&app, "/messages", call).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_call_is_accepted_and_answered_on_stream() {
    let server = server();
    let app = server.router();
    let session = server.dispatcher().sessions().open();

    let call = json!({"requestId": "c1", "tool": "create_workbook", "arguments": {"filepath": "book.xlsx"}});
    let (status, body) = post(&app, &endpoint(&session), call.to_string()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");

    let response = next_response(&session).await;
    assert_eq!(response.request_id, request_id("c1"));
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.payload.unwrap()["filepath"], "book.xlsx");
}

#[tokio::test]
async fn test_malformed_body_is_rejected_and_reported() {
    let server = server();
    let app = server.router();
    let session = server.dispatcher().sessions().open();

    let (status, body) = post(&app, &endpoint(&session), "{\"tool\": ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "MalformedRequest");
    assert_eq!(body["code"], -32700);

    let response = next_response(&session).await;
    assert_eq!(response.request_id, None);
    assert_eq!(response.error_kind(), Some(ErrorKind::MalformedRequest));
}

#[tokio::test]
async fn test_cancel_mixed_with_call_is_malformed() {
    let server = server();
    let app = server.router();
    let session = server.dispatcher().sessions().open();

    let body = json!({"cancel": 1, "requestId": 2, "tool": "list_backend_files"}).to_string();
    let (status, body) = post(&app, &endpoint(&session), body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "MalformedRequest");
    assert_eq!(session.outstanding(), 0);
}

#[tokio::test]
async fn test_reused_request_id_conflicts() {
    let server = server();
    let app = server.router();
    let session = server.dispatcher().sessions().open();
    session.begin_request(&RequestId::from("r1")).unwrap();

    let call = json!({"requestId": "r1", "tool": "list_backend_files"}).to_string();
    let (status, body) = post(&app, &endpoint(&session), call).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "DuplicateRequest");
}

#[tokio::test]
async fn test_cancel_message_reports_whether_found() {
    let server = server();
    let app = server.router();
    let session = server.dispatcher().sessions().open();

    let (status, body) = post(&app, &endpoint(&session), json!({"cancel": "ghost"}).to_string()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["found"], false);
}

#[tokio::test]
async fn test_sse_stream_round_trip() {
    let server = server();
    let app = server.router();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut frames = response.into_body().into_data_stream();
    let first = next_frame(&mut frames).await;
    assert!(first.starts_with("event: endpoint"), "unexpected first event {:?}", first);

    let path = first
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap()
        .to_string();
    assert!(path.starts_with("/messages?session_id="));
    assert_eq!(server.dispatcher().sessions().active_count(), 1);

    let call = json!({"requestId": 5, "tool": "list_backend_files", "arguments": {"pattern": "*"}});
    let (status, _) = post(&app, &path, call.to_string()).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let message = next_frame(&mut frames).await;
    assert!(message.starts_with("event: message"));
    let data = message
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let event: Value = serde_json::from_str(data).unwrap();
    assert_eq!(event["requestId"], 5);
    assert_eq!(event["seq"], 0);
    assert_eq!(event["status"], "ok");
    assert_eq!(event["payload"]["files"], json!([]));

    // Dropping the stream closes the session
    drop(frames);
    wait_until(|| server.dispatcher().sessions().active_count() == 0).await;
}

async fn next_frame(frames: &mut axum::body::BodyDataStream) -> String {
    let bytes = tokio::time::timeout(Duration::from_secs(2), frames.next())
        .await
        .expect("timed out waiting for an SSE frame")
        .expect("stream ended")
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
