//! A1-style cell references

use std::fmt;
use std::str::FromStr;

use super::WorkbookError;

/// Largest column index Excel allows (`XFD`)
pub const MAX_COLUMN: u32 = 16_384;
/// Largest row index Excel allows
pub const MAX_ROW: u32 = 1_048_576;

/// A 1-based (row, column) position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Result<Self, WorkbookError> {
        if row == 0 || row > MAX_ROW || col == 0 || col > MAX_COLUMN {
            return Err(WorkbookError::InvalidCell(format!("R{}C{}", row, col)));
        }
        Ok(Self { row, col })
    }

    /// Move by a row/column offset, staying inside the sheet bounds
    pub fn offset(self, rows: usize, cols: usize) -> Result<Self, WorkbookError> {
        let row = u32::try_from(rows).ok().and_then(|r| self.row.checked_add(r));
        let col = u32::try_from(cols).ok().and_then(|c| self.col.checked_add(c));
        match (row, col) {
            (Some(row), Some(col)) => Self::new(row, col),
            _ => Err(WorkbookError::InvalidCell(format!("{} offset by {}x{}", self, rows, cols))),
        }
    }
}

/// Convert a 1-based column index to letters (`1 → A`, `28 → AB`)
pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

impl FromStr for CellRef {
    type Err = WorkbookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WorkbookError::InvalidCell(s.to_string());
        let trimmed = s.trim().trim_start_matches('$');
        let split = trimmed
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(invalid)?;
        let (letters, digits) = trimmed.split_at(split);
        let digits = digits.trim_start_matches('$');
        if letters.is_empty() || letters.len() > 3 || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let col = letters
            .bytes()
            .fold(0u32, |acc, b| acc * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1));
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        Self::new(row, col).map_err(|_| invalid())
    }
}

/// Render an inclusive range as `A1:C3` (or `A1` for a single cell)
pub fn range_label(start: CellRef, end: CellRef) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}:{}", start, end)
    }
}

/// Inclusive rectangle of cells with `start` at the top left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    /// Fails unless `start` is above and left of `end`
    pub fn new(start: CellRef, end: CellRef) -> Result<Self, WorkbookError> {
        if end.row < start.row || end.col < start.col {
            return Err(WorkbookError::InvalidRange(format!("{}:{}", start, end)));
        }
        Ok(Self { start, end })
    }

    pub fn single(cell: CellRef) -> Self {
        Self { start: cell, end: cell }
    }

    pub fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Number of cells covered, without overflow for any valid range
    pub fn cell_count(&self) -> u64 {
        u64::from(self.height()) * u64::from(self.width())
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.start.row..=self.end.row).contains(&row) && (self.start.col..=self.end.col).contains(&col)
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// The part of this range inside `bounds`, if any
    pub fn clamp_to(&self, bounds: &CellRange) -> Option<CellRange> {
        if !self.intersects(bounds) {
            return None;
        }
        Some(CellRange {
            start: CellRef {
                row: self.start.row.max(bounds.start.row),
                col: self.start.col.max(bounds.start.col),
            },
            end: CellRef {
                row: self.end.row.min(bounds.end.row),
                col: self.end.col.min(bounds.end.col),
            },
        })
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&range_label(self.start, self.end))
    }
}

impl FromStr for CellRange {
    type Err = WorkbookError;

    /// Accepts `A1:C3` or a single cell such as `B2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((start, end)) => {
                let invalid = |_| WorkbookError::InvalidRange(s.to_string());
                Self::new(start.parse().map_err(invalid)?, end.parse().map_err(invalid)?)
            }
            None => s
                .parse()
                .map(Self::single)
                .map_err(|_| WorkbookError::InvalidRange(s.to_string())),
        }
    }
}
