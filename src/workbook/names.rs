//! Logical workbook names
//!
//! Clients pass file paths; the backend only ever sees a normalized logical
//! name. An absolute path is reduced to its file name, Windows separators
//! become `/` and leading slashes are dropped.

use std::path::Path;

use regex::Regex;

use super::WorkbookError;

pub fn logical_name(filepath: &str) -> Result<String, WorkbookError> {
    let trimmed = filepath.trim();
    let reduced = if Path::new(trimmed).is_absolute() || trimmed.starts_with('/') {
        Path::new(trimmed)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        trimmed.to_string()
    };

    let name = reduced.replace('\\', "/").trim_start_matches('/').to_string();
    if name.is_empty() || name.split('/').any(|part| part == "..") {
        return Err(WorkbookError::InvalidName(filepath.to_string()));
    }
    Ok(name)
}

/// Compile a `*` wildcard pattern (e.g. `*.xlsx`) into an anchored matcher
pub fn wildcard(pattern: &str) -> Result<Regex, WorkbookError> {
    let body = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| WorkbookError::InvalidPattern(e.to_string()))
}
