//! CSV ingestion.

use crate::error::IngestError;
use crate::ingest::infer_cell;
use crate::table::DataTable;
use crate::types::Cell;

/// Parse CSV text into a table. The first record is the header row;
/// short records are padded with nulls so every row has one cell per
/// column.
pub fn parse_csv(name: &str, raw: &str) -> Result<DataTable, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        return Err(IngestError::Structure("csv has no header row".into()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row: Vec<Cell> = record.iter().map(infer_cell).collect();
        row.resize(headers.len(), Cell::Null);
        row.truncate(headers.len());
        rows.push(row);
    }

    Ok(DataTable::new(name, headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_columns() {
        let t = parse_csv("sales", "Date,Sales,Active\n2024-01-01,100,true\n2024-01-02,2.5,false\n").unwrap();
        assert_eq!(t.headers, vec!["Date", "Sales", "Active"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[0][1], Cell::Int(100));
        assert_eq!(t.rows[1][1], Cell::Float(2.5));
        assert_eq!(t.rows[0][2], Cell::Bool(true));
    }

    #[test]
    fn pads_short_records_with_nulls() {
        let t = parse_csv("t", "a,b,c\n1,2\n").unwrap();
        assert_eq!(t.rows[0], vec![Cell::Int(1), Cell::Int(2), Cell::Null]);
    }

    #[test]
    fn empty_header_is_structural_error() {
        assert!(parse_csv("t", "").is_err());
    }
}
