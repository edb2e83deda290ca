use std::sync::Arc;

use excel_mcp_server::tools::{ToolContext, ToolOutput};
use excel_mcp_server::workbook::names::logical_name;
use excel_mcp_server::*;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn context() -> ToolContext {
    ToolContext {
        session_id: SessionId::new(),
        request_id: RequestId::from("t"),
        cancel: CancellationToken::new(),
    }
}

async fn run(registry: &ToolRegistry, tool: &str, arguments: Value) -> Result<Value, HandlerError> {
    let tool = registry.resolve(tool).unwrap();
    tool.descriptor.validate(&arguments).unwrap();
    match tool.handler.call(arguments, context()).await? {
        ToolOutput::Complete(value) => Ok(value),
        ToolOutput::Streaming(_) => panic!("expected a complete result"),
    }
}

/// Every chunk a streaming tool produces, the summary last
async fn read_all(registry: &ToolRegistry, arguments: Value) -> Result<Vec<Value>, HandlerError> {
    let tool = registry.resolve("read_data_from_excel").unwrap();
    tool.descriptor.validate(&arguments).unwrap();
    match tool.handler.call(arguments, context()).await? {
        ToolOutput::Streaming(chunks) => chunks.collect::<Vec<_>>().await.into_iter().collect(),
        ToolOutput::Complete(_) => panic!("expected a stream"),
    }
}

async fn workbook_with(registry: &ToolRegistry, data: Value) {
    run(registry, "create_workbook", json!({"filepath": "t.xlsx"})).await.unwrap();
    run(
        registry,
        "write_data_to_excel",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "data": data}),
    )
    .await
    .unwrap();
}

fn excel_registry() -> (ToolRegistry, Arc<MemoryWorkbooks>) {
    let store = Arc::new(MemoryWorkbooks::new());
    let mut registry = ToolRegistry::new();
    register_excel_tools(&mut registry, store.clone()).unwrap();
    (registry, store)
}

#[test]
fn test_paths_map_to_one_logical_workbook() {
    let store = MemoryWorkbooks::new();
    let backend: &dyn WorkbookBackend = &store;

    backend.create_workbook(&logical_name("/srv/excel_files/sales.xlsx").unwrap()).unwrap();
    let err = backend
        .create_workbook(&logical_name("sales.xlsx").unwrap())
        .unwrap_err();
    assert_eq!(err.code(), "workbook_exists");
}

#[tokio::test]
async fn test_worksheet_tools_round_trip() {
    let (registry, store) = excel_registry();
    run(&registry, "create_workbook", json!({"filepath": "ops.xlsx"})).await.unwrap();
    run(&registry, "create_worksheet", json!({"filepath": "ops.xlsx", "sheet_name": "Raw"}))
        .await
        .unwrap();
    run(
        &registry,
        "copy_worksheet",
        json!({"filepath": "ops.xlsx", "source_sheet": "Raw", "target_sheet": "Copy"}),
    )
    .await
    .unwrap();
    run(
        &registry,
        "rename_worksheet",
        json!({"filepath": "ops.xlsx", "old_name": "Raw", "new_name": "Clean"}),
    )
    .await
    .unwrap();
    let deleted = run(&registry, "delete_worksheet", json!({"filepath": "ops.xlsx", "sheet_name": "Sheet"}))
        .await
        .unwrap();
    assert_eq!(deleted["message"], "Sheet 'Sheet' deleted");

    let info = store.metadata("ops.xlsx", false).unwrap();
    let names: Vec<_> = info.sheets.iter().map(|s| s.name.clone()).collect();
    assert_eq!(names, vec!["Clean", "Copy"]);
}

#[tokio::test]
async fn test_metadata_tool_reports_ranges() {
    let (registry, _store) = excel_registry();
    run(&registry, "create_workbook", json!({"filepath": "m.xlsx"})).await.unwrap();
    run(
        &registry,
        "write_data_to_excel",
        json!({"filepath": "m.xlsx", "sheet_name": "Sheet", "data": [[1, 2, 3], [4]]}),
    )
    .await
    .unwrap();

    let plain = run(&registry, "get_workbook_metadata", json!({"filepath": "m.xlsx"})).await.unwrap();
    assert!(plain["sheets"][0].get("dimensions").is_none());

    let ranged = run(
        &registry,
        "get_workbook_metadata",
        json!({"filepath": "m.xlsx", "include_ranges": true}),
    )
    .await
    .unwrap();
    assert_eq!(ranged["filename"], "m.xlsx");
    assert_eq!(ranged["sheets"][0]["dimensions"], "A1:C2");
    assert_eq!(ranged["sheets"][0]["max_row"], 2);
}

#[tokio::test]
async fn test_missing_sheet_is_a_handler_error() {
    let (registry, _store) = excel_registry();
    run(&registry, "create_workbook", json!({"filepath": "w.xlsx"})).await.unwrap();

    let err = run(
        &registry,
        "write_data_to_excel",
        json!({"filepath": "w.xlsx", "sheet_name": "Nope", "data": [[1]]}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, "sheet_not_found");

    let err = run(&registry, "create_workbook", json!({"filepath": "../escape.xlsx"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_workbook_name");
}

#[tokio::test]
async fn test_read_clips_range_to_used_area() {
    let (registry, _store) = excel_registry();
    workbook_with(&registry, json!([[1, 2], [3, 4]])).await;

    let chunks = read_all(
        &registry,
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "end_cell": "XFD1048576"}),
    )
    .await
    .unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1]["cells"][1]["value"], 4);
    assert_eq!(chunks[2]["range"], "A1:B2");

    run(&registry, "create_worksheet", json!({"filepath": "t.xlsx", "sheet_name": "Empty"}))
        .await
        .unwrap();
    let chunks = read_all(
        &registry,
        json!({"filepath": "t.xlsx", "sheet_name": "Empty", "end_cell": "CV20000"}),
    )
    .await
    .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["rows"], 0);
    assert_eq!(chunks[0]["range"], Value::Null);
    assert_eq!(chunks[0]["message"], "No data found in specified range");
}

#[tokio::test]
async fn test_read_refuses_sparse_sheet_spanning_the_grid() {
    let (registry, _store) = excel_registry();
    workbook_with(&registry, json!([[1]])).await;
    run(
        &registry,
        "write_data_to_excel",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "data": [[2]], "start_cell": "XFD1048576"}),
    )
    .await
    .unwrap();

    let err = read_all(&registry, json!({"filepath": "t.xlsx", "sheet_name": "Sheet"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_range");

    // A preview keeps the first rows only, which fits
    let chunks = read_all(
        &registry,
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "end_cell": "C1048576", "preview_only": true}),
    )
    .await
    .unwrap();
    assert_eq!(chunks.len(), 11);
    assert_eq!(chunks[10]["range"], "A1:C10");
    assert_eq!(chunks[10]["preview"], true);
}

#[tokio::test]
async fn test_read_spans_several_batches() {
    let (registry, _store) = excel_registry();
    let rows: Vec<Value> = (0..3000).map(|i| json!([i, i * 2])).collect();
    workbook_with(&registry, Value::Array(rows)).await;

    let chunks = read_all(&registry, json!({"filepath": "t.xlsx", "sheet_name": "Sheet"}))
        .await
        .unwrap();
    assert_eq!(chunks.len(), 3001);
    assert_eq!(chunks[2999]["row"], 3000);
    assert_eq!(chunks[2999]["cells"][1]["value"], 5998);
    assert_eq!(chunks[3000]["rows"], 3000);
}

#[tokio::test]
async fn test_merge_tools() {
    let (registry, _store) = excel_registry();
    workbook_with(&registry, json!([[1, 2], [3, 4]])).await;
    let range = json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_cell": "A1", "end_cell": "B1"});

    let merged = run(&registry, "merge_cells", range.clone()).await.unwrap();
    assert_eq!(merged["message"], "Range 'A1:B1' merged in sheet 'Sheet'");

    let listed = run(&registry, "get_merged_cells", json!({"filepath": "t.xlsx", "sheet_name": "Sheet"}))
        .await
        .unwrap();
    assert_eq!(listed["merged"], json!(["A1:B1"]));

    run(&registry, "unmerge_cells", range.clone()).await.unwrap();
    let err = run(&registry, "unmerge_cells", range).await.unwrap_err();
    assert_eq!(err.code, "range_not_merged");
}

#[tokio::test]
async fn test_copy_and_delete_range_tools() {
    let (registry, store) = excel_registry();
    workbook_with(&registry, json!([[1, 2], [3, 4]])).await;

    let copied = run(
        &registry,
        "copy_range",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "source_start": "A1", "source_end": "B2", "target_start": "D1"}),
    )
    .await
    .unwrap();
    assert_eq!(copied["range"], "D1:E2");

    run(
        &registry,
        "delete_range",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_cell": "A1", "end_cell": "A2", "shift_direction": "left"}),
    )
    .await
    .unwrap();
    let rows = store
        .read_range("t.xlsx", "Sheet", "A1:E1".parse().unwrap())
        .unwrap();
    let values: Vec<Value> = rows[0].cells.iter().map(|c| c.value.clone()).collect();
    assert_eq!(values, vec![json!(2), Value::Null, json!(1), json!(2), Value::Null]);

    let delete = &registry.resolve("delete_range").unwrap().descriptor;
    let err = delete
        .validate(&json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_cell": "A1", "end_cell": "A2", "shift_direction": "down"}))
        .unwrap_err();
    assert!(err.to_string().contains("shift_direction"));
}

#[tokio::test]
async fn test_validate_range_tool() {
    let (registry, _store) = excel_registry();
    workbook_with(&registry, json!([[1, 2], [3, 4]])).await;

    let inside = run(
        &registry,
        "validate_excel_range",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_cell": "A1", "end_cell": "B2"}),
    )
    .await
    .unwrap();
    assert_eq!(inside["message"], "Range 'A1:B2' is valid. Sheet data range is A1:B2");
    assert_eq!(inside["within_data"], true);

    let outside = run(
        &registry,
        "validate_excel_range",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_cell": "C5"}),
    )
    .await
    .unwrap();
    assert_eq!(outside["within_data"], false);

    let err = run(
        &registry,
        "validate_excel_range",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_cell": "B2", "end_cell": "A1"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, "invalid_range");
}

#[tokio::test]
async fn test_row_and_column_tools() {
    let (registry, store) = excel_registry();
    workbook_with(&registry, json!([[1, 2], [3, 4]])).await;

    let inserted = run(
        &registry,
        "insert_rows",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_row": 1}),
    )
    .await
    .unwrap();
    assert_eq!(inserted["message"], "Inserted 1 rows starting at row 1 in sheet 'Sheet'");
    run(
        &registry,
        "insert_columns",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_col": 2, "count": 2}),
    )
    .await
    .unwrap();
    assert_eq!(store.used_range("t.xlsx", "Sheet").unwrap().unwrap().to_string(), "A1:D3");

    run(
        &registry,
        "delete_sheet_columns",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_col": 2, "count": 2}),
    )
    .await
    .unwrap();
    run(
        &registry,
        "delete_sheet_rows",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_row": 1}),
    )
    .await
    .unwrap();
    let rows = store.read_range("t.xlsx", "Sheet", "A1:B2".parse().unwrap()).unwrap();
    assert_eq!(rows[1].cells[1].value, json!(4));

    let err = run(
        &registry,
        "delete_sheet_rows",
        json!({"filepath": "t.xlsx", "sheet_name": "Sheet", "start_row": 0}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, "invalid_range");
}
