//! Tabula - File Ingestion
//!
//! Turns uploaded files into a [`DataTable`]. Dispatch is by file
//! extension; each format has its own parser module.

pub mod csv_file;
pub mod worksheet_xml;

use std::path::Path;

use crate::error::IngestError;
use crate::table::DataTable;
use crate::types::Cell;

/// Parse an uploaded file based on its extension.
pub fn ingest_file(path: &Path) -> Result<DataTable, IngestError> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext != "csv" && ext != "xml" {
        return Err(IngestError::UnsupportedType(ext));
    }
    let raw = std::fs::read_to_string(path)?;
    if ext == "csv" {
        csv_file::parse_csv(&name, &raw)
    } else {
        worksheet_xml::parse_worksheet(&name, &raw)
    }
}

/// Type inference for a raw text value. Integers before floats, a few
/// boolean spellings, empty string is null.
pub(crate) fn infer_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Cell::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Cell::Float(f);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Cell::Bool(true),
        "false" => Cell::Bool(false),
        _ => Cell::Text(raw.to_string()),
    }
}
