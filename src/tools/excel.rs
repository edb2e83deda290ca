//! Excel tools exposed to MCP clients
//!
//! Each tool deserializes its typed arguments, runs one blocking
//! `WorkbookBackend` call on the blocking pool and shapes the result as JSON.
//! `read_data_from_excel` is the exception: it streams rows in small batches,
//! each batch read only when the previous one has been forwarded.
//! `WorkbookError` is converted to `HandlerError` here and nowhere else.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::handler::{run_blocking, ToolContext, ToolHandler, ToolOutput};
use super::registry::{ToolDescriptor, ToolRegistry};
use crate::domain::{ConcurrencyClass, DispatchError, HandlerError};
use crate::workbook::names::{logical_name, wildcard};
use crate::workbook::{Axis, CellRange, CellRef, ShiftDirection, WorkbookBackend, WorkbookError, MAX_READ_CELLS};

/// Rows returned when `preview_only` is set
pub const PREVIEW_ROWS: u32 = 10;

/// Cells read from the backend per streamed batch
const READ_BATCH_CELLS: u32 = 4096;

impl From<WorkbookError> for HandlerError {
    fn from(error: WorkbookError) -> Self {
        HandlerError::new(error.code(), error.to_string())
    }
}

fn default_start_cell() -> String {
    "A1".to_string()
}

fn default_count() -> u32 {
    1
}

fn default_pattern() -> Option<String> {
    Some("*.xlsx".to_string())
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateWorkbookArgs {
    /// Path or logical name of the workbook
    pub filepath: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SheetArgs {
    pub filepath: String,
    pub sheet_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenameWorksheetArgs {
    pub filepath: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CopyWorksheetArgs {
    pub filepath: String,
    pub source_sheet: String,
    pub target_sheet: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteDataArgs {
    pub filepath: String,
    pub sheet_name: String,
    /// Rows of cell values; each inner list is one row
    pub data: Vec<Vec<Value>>,
    #[serde(default = "default_start_cell")]
    pub start_cell: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadDataArgs {
    pub filepath: String,
    pub sheet_name: String,
    #[serde(default = "default_start_cell")]
    pub start_cell: String,
    /// Defaults to the end of the sheet's used range
    pub end_cell: Option<String>,
    /// Only return the first rows of the range
    #[serde(default)]
    pub preview_only: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RangeArgs {
    pub filepath: String,
    pub sheet_name: String,
    pub start_cell: String,
    pub end_cell: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CopyRangeArgs {
    pub filepath: String,
    pub sheet_name: String,
    pub source_start: String,
    pub source_end: String,
    pub target_start: String,
    /// Defaults to `sheet_name`
    pub target_sheet: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteRangeArgs {
    pub filepath: String,
    pub sheet_name: String,
    pub start_cell: String,
    pub end_cell: String,
    #[serde(default)]
    pub shift_direction: ShiftDirection,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateRangeArgs {
    pub filepath: String,
    pub sheet_name: String,
    pub start_cell: String,
    pub end_cell: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RowsArgs {
    pub filepath: String,
    pub sheet_name: String,
    pub start_row: u32,
    #[serde(default = "default_count")]
    pub count: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ColumnsArgs {
    pub filepath: String,
    pub sheet_name: String,
    pub start_col: u32,
    #[serde(default = "default_count")]
    pub count: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkbookMetadataArgs {
    pub filepath: String,
    #[serde(default)]
    pub include_ranges: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Wildcard pattern such as `*.xlsx`
    #[serde(default = "default_pattern")]
    pub pattern: Option<String>,
}

fn parse_range(start: &str, end: &str) -> Result<CellRange, WorkbookError> {
    CellRange::new(start.parse()?, end.parse()?)
}

fn parse_args<A: DeserializeOwned>(arguments: Value) -> Result<A, HandlerError> {
    serde_json::from_value(arguments).map_err(|e| HandlerError::new("invalid_arguments", e.to_string()))
}

/// Tool whose whole body is one blocking backend call
struct BlockingTool<A, F> {
    backend: Arc<dyn WorkbookBackend>,
    op: F,
    _args: PhantomData<fn() -> A>,
}

#[async_trait]
impl<A, F> ToolHandler for BlockingTool<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(&dyn WorkbookBackend, A) -> Result<Value, WorkbookError> + Clone + Send + Sync + 'static,
{
    async fn call(&self, arguments: Value, _ctx: ToolContext) -> Result<ToolOutput, HandlerError> {
        let args: A = parse_args(arguments)?;
        let backend = self.backend.clone();
        let op = self.op.clone();
        let value = run_blocking(move || op(backend.as_ref(), args).map_err(HandlerError::from)).await?;
        Ok(ToolOutput::Complete(value))
    }
}

fn blocking<A, F>(backend: &Arc<dyn WorkbookBackend>, op: F) -> Arc<dyn ToolHandler>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(&dyn WorkbookBackend, A) -> Result<Value, WorkbookError> + Clone + Send + Sync + 'static,
{
    Arc::new(BlockingTool {
        backend: backend.clone(),
        op,
        _args: PhantomData,
    })
}

/// Streams the requested range one row per chunk, then a summary
///
/// The range is clipped to the sheet's used area before anything is read,
/// and refused if it still covers more than `MAX_READ_CELLS`.
struct ReadDataTool {
    backend: Arc<dyn WorkbookBackend>,
}

#[async_trait]
impl ToolHandler for ReadDataTool {
    async fn call(&self, arguments: Value, ctx: ToolContext) -> Result<ToolOutput, HandlerError> {
        let args: ReadDataArgs = parse_args(arguments)?;
        let name = logical_name(&args.filepath)?;
        let start: CellRef = args.start_cell.parse()?;
        let requested = match args.end_cell.as_deref() {
            Some(end) => Some(CellRange::new(start, end.parse()?)?),
            None => None,
        };

        let backend = self.backend.clone();
        let (book, sheet) = (name.clone(), args.sheet_name.clone());
        let used = run_blocking(move || backend.used_range(&book, &sheet).map_err(HandlerError::from)).await?;

        let mut range = used.and_then(|used| {
            let wanted = match requested {
                Some(requested) => requested,
                None => CellRange::new(start, used.end).ok()?,
            };
            wanted.clamp_to(&used)
        });
        if args.preview_only {
            if let Some(range) = range.as_mut() {
                range.end.row = range.end.row.min(range.start.row + PREVIEW_ROWS - 1);
            }
        }
        if let Some(range) = range {
            if range.cell_count() > MAX_READ_CELLS {
                return Err(WorkbookError::InvalidRange(format!(
                    "{} covers {} cells, more than the {} a read may return",
                    range,
                    range.cell_count(),
                    MAX_READ_CELLS
                ))
                .into());
            }
        }

        let mut summary = json!({
            "filepath": name,
            "sheet_name": args.sheet_name,
            "range": range.map(|range| range.to_string()),
            "rows": range.map_or(0, |range| range.height()),
            "preview": args.preview_only,
        });
        if range.is_none() {
            summary["message"] = json!("No data found in specified range");
        }

        let backend = self.backend.clone();
        let sheet = args.sheet_name;
        let cancel = ctx.cancel;
        let chunks = async_stream::stream! {
            if let Some(range) = range {
                let batch_rows = (READ_BATCH_CELLS / range.width()).max(1);
                let mut first = range.start.row;
                while first <= range.end.row {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let last = range.end.row.min(first.saturating_add(batch_rows - 1));
                    let batch = CellRange {
                        start: CellRef { row: first, col: range.start.col },
                        end: CellRef { row: last, col: range.end.col },
                    };
                    let (backend, book, sheet) = (backend.clone(), name.clone(), sheet.clone());
                    let rows = run_blocking(move || {
                        backend.read_range(&book, &sheet, batch).map_err(HandlerError::from)
                    })
                    .await;
                    match rows {
                        Ok(rows) => {
                            for row in rows {
                                if cancel.is_cancelled() {
                                    return;
                                }
                                yield serde_json::to_value(&row)
                                    .map_err(|e| HandlerError::new("serialization_failed", e.to_string()));
                            }
                        }
                        Err(error) => {
                            yield Err(error);
                            return;
                        }
                    }
                    first = last + 1;
                }
            }
            yield Ok(summary);
        };
        Ok(ToolOutput::Streaming(Box::pin(chunks)))
    }
}

/// Register the Excel tool catalog against `backend`
pub fn register_excel_tools(
    registry: &mut ToolRegistry,
    backend: Arc<dyn WorkbookBackend>,
) -> Result<(), DispatchError> {
    use ConcurrencyClass::{Concurrent, ExclusivePerSession};

    registry.register(
        ToolDescriptor::for_args::<CreateWorkbookArgs>("create_workbook", "Create new Excel workbook.", ExclusivePerSession),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: CreateWorkbookArgs| {
            let name = logical_name(&args.filepath)?;
            backend.create_workbook(&name)?;
            Ok(json!({"message": format!("Created workbook at {}", args.filepath), "filepath": name}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<SheetArgs>("create_worksheet", "Create new worksheet in workbook.", ExclusivePerSession),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: SheetArgs| {
            let name = logical_name(&args.filepath)?;
            backend.create_sheet(&name, &args.sheet_name)?;
            Ok(json!({"message": format!("Sheet {} created", args.sheet_name)}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<RenameWorksheetArgs>("rename_worksheet", "Rename worksheet in workbook.", ExclusivePerSession),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: RenameWorksheetArgs| {
            let name = logical_name(&args.filepath)?;
            backend.rename_sheet(&name, &args.old_name, &args.new_name)?;
            Ok(json!({"message": format!("Sheet '{}' renamed to '{}'", args.old_name, args.new_name)}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<SheetArgs>("delete_worksheet", "Delete worksheet from workbook.", ExclusivePerSession),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: SheetArgs| {
            let name = logical_name(&args.filepath)?;
            backend.delete_sheet(&name, &args.sheet_name)?;
            Ok(json!({"message": format!("Sheet '{}' deleted", args.sheet_name)}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<CopyWorksheetArgs>("copy_worksheet", "Copy worksheet within workbook.", ExclusivePerSession),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: CopyWorksheetArgs| {
            let name = logical_name(&args.filepath)?;
            backend.copy_sheet(&name, &args.source_sheet, &args.target_sheet)?;
            Ok(json!({"message": format!("Sheet '{}' copied to '{}'", args.source_sheet, args.target_sheet)}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<WriteDataArgs>(
            "write_data_to_excel",
            "Write rows of data to a worksheet starting at a cell (default A1).",
            ExclusivePerSession,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: WriteDataArgs| {
            let name = logical_name(&args.filepath)?;
            let start: CellRef = args.start_cell.parse()?;
            let range = backend.write_rows(&name, &args.sheet_name, start, &args.data)?;
            Ok(json!({"message": format!("Data written to {}", args.sheet_name), "range": range}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<ReadDataArgs>(
            "read_data_from_excel",
            "Read a range of cells, streaming one row at a time.",
            Concurrent,
        ),
        Arc::new(ReadDataTool { backend: backend.clone() }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<WorkbookMetadataArgs>(
            "get_workbook_metadata",
            "Get metadata about workbook including sheets and used ranges.",
            Concurrent,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: WorkbookMetadataArgs| {
            let name = logical_name(&args.filepath)?;
            let info = backend.metadata(&name, args.include_ranges)?;
            Ok(json!(info))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<RangeArgs>("merge_cells", "Merge a range of cells.", ExclusivePerSession),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: RangeArgs| {
            let name = logical_name(&args.filepath)?;
            let range = parse_range(&args.start_cell, &args.end_cell)?;
            backend.merge_range(&name, &args.sheet_name, range)?;
            Ok(json!({"message": format!("Range '{}' merged in sheet '{}'", range, args.sheet_name)}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<RangeArgs>("unmerge_cells", "Unmerge a range of cells.", ExclusivePerSession),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: RangeArgs| {
            let name = logical_name(&args.filepath)?;
            let range = parse_range(&args.start_cell, &args.end_cell)?;
            backend.unmerge_range(&name, &args.sheet_name, range)?;
            Ok(json!({"message": format!("Range '{}' unmerged successfully", range)}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<SheetArgs>("get_merged_cells", "Get merged cells in a worksheet.", Concurrent),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: SheetArgs| {
            let name = logical_name(&args.filepath)?;
            let merged: Vec<String> = backend
                .merged_ranges(&name, &args.sheet_name)?
                .iter()
                .map(ToString::to_string)
                .collect();
            Ok(json!({"sheet_name": args.sheet_name, "merged": merged}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<CopyRangeArgs>(
            "copy_range",
            "Copy a range of cells to another location.",
            ExclusivePerSession,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: CopyRangeArgs| {
            let name = logical_name(&args.filepath)?;
            let source = parse_range(&args.source_start, &args.source_end)?;
            let target: CellRef = args.target_start.parse()?;
            let target_sheet = args.target_sheet.as_deref().unwrap_or(&args.sheet_name);
            let written = backend.copy_range(&name, &args.sheet_name, source, target_sheet, target)?;
            Ok(json!({"message": "Range copied successfully", "range": written.to_string()}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<DeleteRangeArgs>(
            "delete_range",
            "Delete a range of cells and shift remaining cells.",
            ExclusivePerSession,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: DeleteRangeArgs| {
            let name = logical_name(&args.filepath)?;
            let range = parse_range(&args.start_cell, &args.end_cell)?;
            backend.delete_range(&name, &args.sheet_name, range, args.shift_direction)?;
            Ok(json!({"message": format!("Range {} deleted successfully", range)}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<ValidateRangeArgs>(
            "validate_excel_range",
            "Validate if a range exists and is properly formatted.",
            Concurrent,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: ValidateRangeArgs| {
            let name = logical_name(&args.filepath)?;
            let range = match args.end_cell.as_deref() {
                Some(end) => parse_range(&args.start_cell, end)?,
                None => CellRange::single(args.start_cell.parse()?),
            };
            let used = backend.used_range(&name, &args.sheet_name)?;
            let within = used.is_some_and(|used| used.clamp_to(&range) == Some(range));
            let message = match used {
                Some(used) if within => format!("Range '{}' is valid. Sheet data range is {}", range, used),
                Some(used) => format!("Range '{}' is valid but extends beyond the sheet data range {}", range, used),
                None => format!("Range '{}' is valid but the sheet holds no data", range),
            };
            Ok(json!({
                "message": message,
                "valid": true,
                "range": range.to_string(),
                "data_range": used.map(|used| used.to_string()),
                "within_data": within,
            }))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<RowsArgs>(
            "insert_rows",
            "Insert one or more rows starting at the specified row.",
            ExclusivePerSession,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: RowsArgs| {
            let name = logical_name(&args.filepath)?;
            backend.insert_lines(&name, &args.sheet_name, Axis::Rows, args.start_row, args.count)?;
            Ok(json!({"message": format!(
                "Inserted {} rows starting at row {} in sheet '{}'",
                args.count, args.start_row, args.sheet_name
            )}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<ColumnsArgs>(
            "insert_columns",
            "Insert one or more columns starting at the specified column.",
            ExclusivePerSession,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: ColumnsArgs| {
            let name = logical_name(&args.filepath)?;
            backend.insert_lines(&name, &args.sheet_name, Axis::Columns, args.start_col, args.count)?;
            Ok(json!({"message": format!(
                "Inserted {} columns starting at column {} in sheet '{}'",
                args.count, args.start_col, args.sheet_name
            )}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<RowsArgs>(
            "delete_sheet_rows",
            "Delete one or more rows starting at the specified row.",
            ExclusivePerSession,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: RowsArgs| {
            let name = logical_name(&args.filepath)?;
            backend.delete_lines(&name, &args.sheet_name, Axis::Rows, args.start_row, args.count)?;
            Ok(json!({"message": format!(
                "Deleted {} rows starting at row {} in sheet '{}'",
                args.count, args.start_row, args.sheet_name
            )}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<ColumnsArgs>(
            "delete_sheet_columns",
            "Delete one or more columns starting at the specified column.",
            ExclusivePerSession,
        ),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: ColumnsArgs| {
            let name = logical_name(&args.filepath)?;
            backend.delete_lines(&name, &args.sheet_name, Axis::Columns, args.start_col, args.count)?;
            Ok(json!({"message": format!(
                "Deleted {} columns starting at column {} in sheet '{}'",
                args.count, args.start_col, args.sheet_name
            )}))
        }),
    )?;

    registry.register(
        ToolDescriptor::for_args::<ListFilesArgs>("list_backend_files", "List workbooks held by the backend.", Concurrent),
        blocking(&backend, |backend: &dyn WorkbookBackend, args: ListFilesArgs| {
            let names = backend.list_names()?;
            let names: Vec<String> = match args.pattern.as_deref() {
                Some(pattern) if !pattern.is_empty() => {
                    let matcher = wildcard(pattern)?;
                    names.into_iter().filter(|n| matcher.is_match(n)).collect()
                }
                _ => names,
            };
            Ok(json!({"files": names}))
        }),
    )?;

    Ok(())
}
