//! Workbook collaborator boundary
//!
//! The dispatcher core never touches spreadsheet bytes. Tool handlers call a
//! `WorkbookBackend`, whose calls are blocking and are run on the blocking
//! thread pool. `MemoryWorkbooks` is the in-process backend shipped with the
//! server; a backend that reads and writes real `.xlsx` files plugs in behind
//! the same trait.

pub mod cell;
pub mod memory;
pub mod names;

pub use cell::{CellRange, CellRef};
pub use memory::MemoryWorkbooks;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a workbook backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkbookError {
    #[error("Workbook not found: {0}")]
    WorkbookNotFound(String),

    #[error("Workbook already exists: {0}")]
    WorkbookExists(String),

    #[error("Sheet '{sheet}' not found in {workbook}")]
    SheetNotFound { workbook: String, sheet: String },

    #[error("Sheet '{sheet}' already exists in {workbook}")]
    SheetExists { workbook: String, sheet: String },

    #[error("Cannot delete '{0}': a workbook needs at least one sheet")]
    LastSheet(String),

    #[error("Invalid cell reference: {0}")]
    InvalidCell(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid workbook name: {0}")]
    InvalidName(String),

    #[error("Invalid sheet name: {0}")]
    InvalidSheetName(String),

    #[error("Invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("Range {0} is not merged")]
    NotMerged(String),

    #[error("No data provided")]
    EmptyData,
}

impl WorkbookError {
    /// Stable identifier exposed to clients as the handler error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkbookNotFound(_) => "workbook_not_found",
            Self::WorkbookExists(_) => "workbook_exists",
            Self::SheetNotFound { .. } => "sheet_not_found",
            Self::SheetExists { .. } => "sheet_exists",
            Self::LastSheet(_) => "last_sheet",
            Self::InvalidCell(_) => "invalid_cell",
            Self::InvalidRange(_) => "invalid_range",
            Self::InvalidName(_) => "invalid_workbook_name",
            Self::InvalidSheetName(_) => "invalid_sheet_name",
            Self::InvalidPattern(_) => "invalid_pattern",
            Self::NotMerged(_) => "range_not_merged",
            Self::EmptyData => "empty_data",
        }
    }
}

/// Most cells a single range read may cover
pub const MAX_READ_CELLS: u64 = 1_000_000;

/// Rows or columns, for structural edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Rows,
    Columns,
}

impl Axis {
    pub fn label(self) -> &'static str {
        match self {
            Self::Rows => "row",
            Self::Columns => "column",
        }
    }
}

/// Where the cells after a deleted range move to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ShiftDirection {
    #[default]
    Up,
    Left,
}

/// One cell as returned by range reads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellData {
    pub address: String,
    pub row: u32,
    pub column: u32,
    pub value: Value,
}

/// One row of a range read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowData {
    pub row: u32,
    pub cells: Vec<CellData>,
}

/// Summary of one sheet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetInfo {
    pub name: String,
    pub max_row: u32,
    pub max_column: u32,
    /// Used range such as `A1:D20`; only reported when ranges are requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
}

/// Summary of a workbook
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkbookInfo {
    pub filename: String,
    pub sheets: Vec<SheetInfo>,
}

/// Blocking workbook operations the Excel tools delegate to
///
/// Names passed in are already normalized logical names.
pub trait WorkbookBackend: Send + Sync {
    fn create_workbook(&self, name: &str) -> Result<(), WorkbookError>;

    fn create_sheet(&self, name: &str, sheet: &str) -> Result<(), WorkbookError>;

    fn rename_sheet(&self, name: &str, old_name: &str, new_name: &str) -> Result<(), WorkbookError>;

    fn delete_sheet(&self, name: &str, sheet: &str) -> Result<(), WorkbookError>;

    fn copy_sheet(&self, name: &str, source: &str, target: &str) -> Result<(), WorkbookError>;

    /// Write rows starting at `start`; returns the written range label
    fn write_rows(
        &self,
        name: &str,
        sheet: &str,
        start: CellRef,
        rows: &[Vec<Value>],
    ) -> Result<String, WorkbookError>;

    /// `A1` to the last used row and column, `None` for an empty sheet
    fn used_range(&self, name: &str, sheet: &str) -> Result<Option<CellRange>, WorkbookError>;

    /// Read every cell of `range`, empty cells as null
    ///
    /// Ranges above `MAX_READ_CELLS` are refused.
    fn read_range(&self, name: &str, sheet: &str, range: CellRange) -> Result<Vec<RowData>, WorkbookError>;

    fn metadata(&self, name: &str, include_ranges: bool) -> Result<WorkbookInfo, WorkbookError>;

    /// All logical names held by the backend, sorted
    fn list_names(&self) -> Result<Vec<String>, WorkbookError>;

    fn merge_range(&self, name: &str, sheet: &str, range: CellRange) -> Result<(), WorkbookError>;

    /// `range` must match a merged range exactly
    fn unmerge_range(&self, name: &str, sheet: &str, range: CellRange) -> Result<(), WorkbookError>;

    fn merged_ranges(&self, name: &str, sheet: &str) -> Result<Vec<CellRange>, WorkbookError>;

    /// Copy the values of `source` so they start at `target` on
    /// `target_sheet`; returns the range written
    fn copy_range(
        &self,
        name: &str,
        sheet: &str,
        source: CellRange,
        target_sheet: &str,
        target: CellRef,
    ) -> Result<CellRange, WorkbookError>;

    /// Clear `range` and close the gap from below or from the right
    fn delete_range(
        &self,
        name: &str,
        sheet: &str,
        range: CellRange,
        shift: ShiftDirection,
    ) -> Result<(), WorkbookError>;

    /// Insert `count` empty rows or columns before index `at`
    fn insert_lines(&self, name: &str, sheet: &str, axis: Axis, at: u32, count: u32) -> Result<(), WorkbookError>;

    /// Remove `count` rows or columns starting at index `at`
    fn delete_lines(&self, name: &str, sheet: &str, axis: Axis, at: u32, count: u32) -> Result<(), WorkbookError>;
}
