//! In-process workbook store
//!
//! Workbooks live in memory as ordered sheets of JSON cell values. Nothing is
//! persisted; the store exists so the server and its tools run without an
//! external spreadsheet library.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;

use super::cell::{range_label, CellRange, CellRef, MAX_COLUMN, MAX_ROW};
use super::{
    Axis, CellData, RowData, ShiftDirection, SheetInfo, WorkbookBackend, WorkbookError, WorkbookInfo, MAX_READ_CELLS,
};

/// Title given to the first sheet of a new workbook
pub const DEFAULT_SHEET: &str = "Sheet";

const MAX_SHEET_NAME: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['\\', '/', '*', '?', ':', '[', ']'];

type Cells = BTreeMap<(u32, u32), Value>;

#[derive(Debug, Clone, Default)]
struct Sheet {
    name: String,
    /// Keyed by (row, column)
    cells: Cells,
    merged: Vec<CellRange>,
}

impl Sheet {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn used_range(&self) -> Option<CellRange> {
        let (max_row, max_col) = (self.max_row(), self.max_column());
        (max_row > 0).then(|| CellRange {
            start: CellRef { row: 1, col: 1 },
            end: CellRef { row: max_row, col: max_col },
        })
    }

    fn max_row(&self) -> u32 {
        self.cells.keys().map(|(row, _)| *row).max().unwrap_or(0)
    }

    fn max_column(&self) -> u32 {
        self.cells.keys().map(|(_, col)| *col).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    fn position(&self, sheet: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name == sheet)
    }
}

/// Thread-safe in-memory `WorkbookBackend`
#[derive(Debug, Default)]
pub struct MemoryWorkbooks {
    books: RwLock<HashMap<String, Workbook>>,
}

impl MemoryWorkbooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_book<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Workbook) -> Result<T, WorkbookError>,
    ) -> Result<T, WorkbookError> {
        let mut books = self.books.write();
        let book = books
            .get_mut(name)
            .ok_or_else(|| WorkbookError::WorkbookNotFound(name.to_string()))?;
        f(book)
    }

    fn with_sheet_mut<T>(
        &self,
        name: &str,
        sheet: &str,
        f: impl FnOnce(&mut Sheet) -> Result<T, WorkbookError>,
    ) -> Result<T, WorkbookError> {
        self.with_book(name, |book| {
            let index = book.position(sheet).ok_or_else(|| sheet_not_found(name, sheet))?;
            f(&mut book.sheets[index])
        })
    }

    fn with_sheet<T>(
        &self,
        name: &str,
        sheet: &str,
        f: impl FnOnce(&Sheet) -> Result<T, WorkbookError>,
    ) -> Result<T, WorkbookError> {
        let books = self.books.read();
        let book = books
            .get(name)
            .ok_or_else(|| WorkbookError::WorkbookNotFound(name.to_string()))?;
        let sheet = book
            .sheets
            .iter()
            .find(|s| s.name == sheet)
            .ok_or_else(|| sheet_not_found(name, sheet))?;
        f(sheet)
    }
}

fn sheet_not_found(workbook: &str, sheet: &str) -> WorkbookError {
    WorkbookError::SheetNotFound {
        workbook: workbook.to_string(),
        sheet: sheet.to_string(),
    }
}

fn sheet_exists(workbook: &str, sheet: &str) -> WorkbookError {
    WorkbookError::SheetExists {
        workbook: workbook.to_string(),
        sheet: sheet.to_string(),
    }
}

fn axis_of(axis: Axis, (row, col): (u32, u32)) -> u32 {
    match axis {
        Axis::Rows => row,
        Axis::Columns => col,
    }
}

fn with_axis(axis: Axis, (row, col): (u32, u32), index: u32) -> (u32, u32) {
    match axis {
        Axis::Rows => (index, col),
        Axis::Columns => (row, index),
    }
}

fn axis_limit(axis: Axis) -> u32 {
    match axis {
        Axis::Rows => MAX_ROW,
        Axis::Columns => MAX_COLUMN,
    }
}

fn span(range: &CellRange, axis: Axis) -> (u32, u32) {
    (
        axis_of(axis, (range.start.row, range.start.col)),
        axis_of(axis, (range.end.row, range.end.col)),
    )
}

fn with_span(range: &CellRange, axis: Axis, lo: u32, hi: u32) -> CellRange {
    let (row, col) = with_axis(axis, (range.start.row, range.start.col), lo);
    let start = CellRef { row, col };
    let (row, col) = with_axis(axis, (range.end.row, range.end.col), hi);
    CellRange { start, end: CellRef { row, col } }
}

/// Check `at`/`count` of a structural edit and return the first index past it
fn line_band(axis: Axis, at: u32, count: u32) -> Result<u32, WorkbookError> {
    let limit = axis_limit(axis);
    if at == 0 || at > limit || count == 0 {
        return Err(WorkbookError::InvalidRange(format!(
            "{} {} with count {}",
            axis.label(),
            at,
            count
        )));
    }
    Ok(at.saturating_add(count))
}

fn check_sheet_name(sheet: &str) -> Result<(), WorkbookError> {
    if sheet.trim().is_empty()
        || sheet.chars().count() > MAX_SHEET_NAME
        || sheet.contains(FORBIDDEN_SHEET_CHARS)
    {
        return Err(WorkbookError::InvalidSheetName(sheet.to_string()));
    }
    Ok(())
}

impl WorkbookBackend for MemoryWorkbooks {
    fn create_workbook(&self, name: &str) -> Result<(), WorkbookError> {
        let mut books = self.books.write();
        if books.contains_key(name) {
            return Err(WorkbookError::WorkbookExists(name.to_string()));
        }
        books.insert(
            name.to_string(),
            Workbook {
                sheets: vec![Sheet::named(DEFAULT_SHEET)],
            },
        );
        Ok(())
    }

    fn create_sheet(&self, name: &str, sheet: &str) -> Result<(), WorkbookError> {
        check_sheet_name(sheet)?;
        self.with_book(name, |book| {
            if book.position(sheet).is_some() {
                return Err(sheet_exists(name, sheet));
            }
            book.sheets.push(Sheet::named(sheet));
            Ok(())
        })
    }

    fn rename_sheet(&self, name: &str, old_name: &str, new_name: &str) -> Result<(), WorkbookError> {
        check_sheet_name(new_name)?;
        self.with_book(name, |book| {
            let index = book.position(old_name).ok_or_else(|| sheet_not_found(name, old_name))?;
            if old_name != new_name && book.position(new_name).is_some() {
                return Err(sheet_exists(name, new_name));
            }
            book.sheets[index].name = new_name.to_string();
            Ok(())
        })
    }

    fn delete_sheet(&self, name: &str, sheet: &str) -> Result<(), WorkbookError> {
        self.with_book(name, |book| {
            let index = book.position(sheet).ok_or_else(|| sheet_not_found(name, sheet))?;
            if book.sheets.len() == 1 {
                return Err(WorkbookError::LastSheet(sheet.to_string()));
            }
            book.sheets.remove(index);
            Ok(())
        })
    }

    fn copy_sheet(&self, name: &str, source: &str, target: &str) -> Result<(), WorkbookError> {
        check_sheet_name(target)?;
        self.with_book(name, |book| {
            let index = book.position(source).ok_or_else(|| sheet_not_found(name, source))?;
            if book.position(target).is_some() {
                return Err(sheet_exists(name, target));
            }
            let mut copy = book.sheets[index].clone();
            copy.name = target.to_string();
            book.sheets.push(copy);
            Ok(())
        })
    }

    fn write_rows(
        &self,
        name: &str,
        sheet: &str,
        start: CellRef,
        rows: &[Vec<Value>],
    ) -> Result<String, WorkbookError> {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        if width == 0 {
            return Err(WorkbookError::EmptyData);
        }
        let end = start.offset(rows.len() - 1, width - 1)?;

        self.with_book(name, |book| {
            let index = book.position(sheet).ok_or_else(|| sheet_not_found(name, sheet))?;
            let cells = &mut book.sheets[index].cells;
            for (r, row) in rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    let at = start.offset(r, c)?;
                    if value.is_null() {
                        cells.remove(&(at.row, at.col));
                    } else {
                        cells.insert((at.row, at.col), value.clone());
                    }
                }
            }
            Ok(range_label(start, end))
        })
    }

    fn used_range(&self, name: &str, sheet: &str) -> Result<Option<CellRange>, WorkbookError> {
        self.with_sheet(name, sheet, |sheet| Ok(sheet.used_range()))
    }

    fn read_range(&self, name: &str, sheet: &str, range: CellRange) -> Result<Vec<RowData>, WorkbookError> {
        if range.cell_count() > MAX_READ_CELLS {
            return Err(WorkbookError::InvalidRange(format!(
                "{} covers {} cells, more than the {} a read may return",
                range,
                range.cell_count(),
                MAX_READ_CELLS
            )));
        }

        self.with_sheet(name, sheet, |sheet| {
            let rows = (range.start.row..=range.end.row)
                .map(|row| RowData {
                    row,
                    cells: (range.start.col..=range.end.col)
                        .map(|col| CellData {
                            address: CellRef { row, col }.to_string(),
                            row,
                            column: col,
                            value: sheet.cells.get(&(row, col)).cloned().unwrap_or(Value::Null),
                        })
                        .collect(),
                })
                .collect();
            Ok(rows)
        })
    }

    fn metadata(&self, name: &str, include_ranges: bool) -> Result<WorkbookInfo, WorkbookError> {
        let books = self.books.read();
        let book = books
            .get(name)
            .ok_or_else(|| WorkbookError::WorkbookNotFound(name.to_string()))?;

        let sheets = book
            .sheets
            .iter()
            .map(|sheet| {
                let (max_row, max_column) = (sheet.max_row(), sheet.max_column());
                let dimensions = (include_ranges && max_row > 0).then(|| {
                    range_label(CellRef { row: 1, col: 1 }, CellRef { row: max_row, col: max_column })
                });
                SheetInfo {
                    name: sheet.name.clone(),
                    max_row,
                    max_column,
                    dimensions,
                }
            })
            .collect();

        Ok(WorkbookInfo {
            filename: name.to_string(),
            sheets,
        })
    }

    fn list_names(&self) -> Result<Vec<String>, WorkbookError> {
        let mut names: Vec<String> = self.books.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn merge_range(&self, name: &str, sheet: &str, range: CellRange) -> Result<(), WorkbookError> {
        if range.cell_count() < 2 {
            return Err(WorkbookError::InvalidRange(format!("{} is a single cell", range)));
        }
        self.with_sheet_mut(name, sheet, |sheet| {
            if let Some(existing) = sheet.merged.iter().find(|m| m.intersects(&range)) {
                return Err(WorkbookError::InvalidRange(format!(
                    "{} overlaps merged range {}",
                    range, existing
                )));
            }
            // Only the top-left value survives a merge
            sheet
                .cells
                .retain(|&(row, col), _| !range.contains(row, col) || (row, col) == (range.start.row, range.start.col));
            sheet.merged.push(range);
            Ok(())
        })
    }

    fn unmerge_range(&self, name: &str, sheet: &str, range: CellRange) -> Result<(), WorkbookError> {
        self.with_sheet_mut(name, sheet, |sheet| {
            let index = sheet
                .merged
                .iter()
                .position(|m| *m == range)
                .ok_or_else(|| WorkbookError::NotMerged(range.to_string()))?;
            sheet.merged.remove(index);
            Ok(())
        })
    }

    fn merged_ranges(&self, name: &str, sheet: &str) -> Result<Vec<CellRange>, WorkbookError> {
        self.with_sheet(name, sheet, |sheet| Ok(sheet.merged.clone()))
    }

    fn copy_range(
        &self,
        name: &str,
        sheet: &str,
        source: CellRange,
        target_sheet: &str,
        target: CellRef,
    ) -> Result<CellRange, WorkbookError> {
        let end = target.offset(source.height() as usize - 1, source.width() as usize - 1)?;
        let written = CellRange::new(target, end)?;

        self.with_book(name, |book| {
            let from = book.position(sheet).ok_or_else(|| sheet_not_found(name, sheet))?;
            let to = book
                .position(target_sheet)
                .ok_or_else(|| sheet_not_found(name, target_sheet))?;

            let values: Vec<((u32, u32), Value)> = book.sheets[from]
                .cells
                .range((source.start.row, 0)..=(source.end.row, u32::MAX))
                .filter(|((_, col), _)| (source.start.col..=source.end.col).contains(col))
                .map(|(&(row, col), value)| {
                    let at = (row - source.start.row + target.row, col - source.start.col + target.col);
                    (at, value.clone())
                })
                .collect();

            let cells = &mut book.sheets[to].cells;
            cells.retain(|&(row, col), _| !written.contains(row, col));
            cells.extend(values);
            Ok(written)
        })
    }

    fn delete_range(
        &self,
        name: &str,
        sheet: &str,
        range: CellRange,
        shift: ShiftDirection,
    ) -> Result<(), WorkbookError> {
        self.with_sheet_mut(name, sheet, |sheet| {
            let (axis, gap) = match shift {
                ShiftDirection::Up => (Axis::Rows, range.height()),
                ShiftDirection::Left => (Axis::Columns, range.width()),
            };
            let (_, last) = span(&range, axis);
            // Cells in the band beside the range along the shift axis
            let in_lane = |key: (u32, u32)| match axis {
                Axis::Rows => (range.start.col..=range.end.col).contains(&key.1),
                Axis::Columns => (range.start.row..=range.end.row).contains(&key.0),
            };

            let cells = std::mem::take(&mut sheet.cells);
            sheet.cells = cells
                .into_iter()
                .filter(|((row, col), _)| !range.contains(*row, *col))
                .map(|(key, value)| {
                    let index = axis_of(axis, key);
                    if in_lane(key) && index > last {
                        (with_axis(axis, key, index - gap), value)
                    } else {
                        (key, value)
                    }
                })
                .collect();
            sheet.merged.retain(|m| !m.intersects(&range));
            Ok(())
        })
    }

    fn insert_lines(&self, name: &str, sheet: &str, axis: Axis, at: u32, count: u32) -> Result<(), WorkbookError> {
        line_band(axis, at, count)?;
        self.with_sheet_mut(name, sheet, |sheet| {
            let furthest = sheet
                .cells
                .keys()
                .map(|&key| axis_of(axis, key))
                .chain(sheet.merged.iter().map(|m| span(m, axis).1))
                .filter(|&index| index >= at)
                .max();
            if let Some(furthest) = furthest {
                if u64::from(furthest) + u64::from(count) > u64::from(axis_limit(axis)) {
                    return Err(WorkbookError::InvalidRange(format!(
                        "inserting {} {}s would push data past the last {}",
                        count,
                        axis.label(),
                        axis.label()
                    )));
                }
            }

            let cells = std::mem::take(&mut sheet.cells);
            sheet.cells = cells
                .into_iter()
                .map(|(key, value)| {
                    let index = axis_of(axis, key);
                    if index >= at {
                        (with_axis(axis, key, index + count), value)
                    } else {
                        (key, value)
                    }
                })
                .collect();

            for merged in sheet.merged.iter_mut() {
                let (lo, hi) = span(merged, axis);
                if lo >= at {
                    *merged = with_span(merged, axis, lo + count, hi + count);
                } else if hi >= at {
                    *merged = with_span(merged, axis, lo, hi + count);
                }
            }
            Ok(())
        })
    }

    fn delete_lines(&self, name: &str, sheet: &str, axis: Axis, at: u32, count: u32) -> Result<(), WorkbookError> {
        let past = line_band(axis, at, count)?;
        let removed = past - at;
        self.with_sheet_mut(name, sheet, |sheet| {
            let cells = std::mem::take(&mut sheet.cells);
            sheet.cells = cells
                .into_iter()
                .filter_map(|(key, value)| {
                    let index = axis_of(axis, key);
                    if index < at {
                        Some((key, value))
                    } else if index >= past {
                        Some((with_axis(axis, key, index - removed), value))
                    } else {
                        None
                    }
                })
                .collect();

            // Merged ranges shrink around the removed band and vanish once
            // they cover a single cell
            let merged = std::mem::take(&mut sheet.merged);
            sheet.merged = merged
                .into_iter()
                .filter_map(|m| {
                    let (lo, hi) = span(&m, axis);
                    let lo = if lo < at { lo } else if lo >= past { lo - removed } else { at };
                    let hi = if hi < at {
                        hi
                    } else if hi >= past {
                        hi - removed
                    } else {
                        at.checked_sub(1)?
                    };
                    let shrunk = with_span(&m, axis, lo, hi);
                    (hi >= lo && shrunk.cell_count() > 1).then_some(shrunk)
                })
                .collect();
            Ok(())
        })
    }
}
