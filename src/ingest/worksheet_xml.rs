//! Worksheet-export XML ingestion.
//!
//! The format is a flat dump of a query worksheet:
//!
//! ```text
//! <worksheetExport>
//!   <metadata columnCount="2">
//!     <columnDef id="c1">Date</columnDef>
//!     <columnDef id="c2">Sales</columnDef>
//!   </metadata>
//!   <qbeExpressions>
//!     <qbeExpression id="c2">&gt; 100</qbeExpression>
//!   </qbeExpressions>
//!   <rows rowCount="1">
//!     <row><value id="c1">2024-01-01</value><value id="c2">100</value></row>
//!   </rows>
//! </worksheetExport>
//! ```
//!
//! Structural violations are fatal: the column count must match the
//! declared `columnCount`, column ids must be unique, every row cell
//! must reference a known column, and every column must end up with
//! exactly `rowCount` values. A qbe expression referencing an unknown
//! column is only warned about.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

use crate::error::IngestError;
use crate::ingest::infer_cell;
use crate::table::DataTable;
use crate::types::Cell;

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Root,
    Metadata,
    QbeExpressions,
    Rows,
    Row,
}

pub fn parse_worksheet(name: &str, raw: &str) -> Result<DataTable, IngestError> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut section = Section::Root;
    let mut saw_root = false;

    let mut column_count: Option<usize> = None;
    let mut row_count: Option<usize> = None;

    // Column order follows <columnDef> order; ids map to that order.
    let mut column_names: Vec<String> = Vec::new();
    let mut id_to_index: HashMap<String, usize> = HashMap::new();
    // Column-major collection, checked against rowCount at the end.
    let mut columns: Vec<Vec<Cell>> = Vec::new();

    // Text accumulator for the element currently being read.
    let mut pending_id: Option<String> = None;
    let mut pending_text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = e.name().as_ref().to_vec();
                match (section, tag.as_slice()) {
                    (Section::Root, b"worksheetExport") if !saw_root => saw_root = true,
                    (Section::Root, b"metadata") => {
                        column_count = Some(required_count(&e, "columnCount")?);
                        section = Section::Metadata;
                    }
                    (Section::Root, b"qbeExpressions") => section = Section::QbeExpressions,
                    (Section::Root, b"rows") => {
                        row_count = Some(required_count(&e, "rowCount")?);
                        section = Section::Rows;
                    }
                    (Section::Metadata, b"columnDef") | (Section::QbeExpressions, b"qbeExpression") => {
                        pending_id = Some(required_id(&e)?);
                        pending_text.clear();
                    }
                    (Section::Rows, _) => {
                        // Any element directly under <rows> starts a row.
                        section = Section::Row;
                    }
                    (Section::Row, _) => {
                        pending_id = Some(required_id(&e)?);
                        pending_text.clear();
                    }
                    (Section::Root, other) if saw_root => {
                        return Err(IngestError::Structure(format!(
                            "unrecognized tag <{}> under <worksheetExport>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                    (Section::Root, _) => {
                        return Err(IngestError::Structure(
                            "root tag is not <worksheetExport>".into(),
                        ));
                    }
                    (Section::Metadata, other) => {
                        return Err(IngestError::Structure(format!(
                            "unrecognized tag in <metadata>: <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                    (Section::QbeExpressions, other) => {
                        return Err(IngestError::Structure(format!(
                            "unrecognized tag in <qbeExpressions>: <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                }
            }
            Event::Empty(e) => {
                // Self-closing cell, value is the empty string.
                if section == Section::Row {
                    let id = required_id(&e)?;
                    push_cell(&id, "", &id_to_index, &mut columns)?;
                } else if section == Section::Rows {
                    // An empty row element contributes no cells.
                }
            }
            Event::Text(t) => {
                if pending_id.is_some() {
                    pending_text.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => {
                let tag = e.name().as_ref().to_vec();
                match (section, tag.as_slice()) {
                    (Section::Metadata, b"metadata") => section = Section::Root,
                    (Section::QbeExpressions, b"qbeExpressions") => section = Section::Root,
                    (Section::Rows, b"rows") => section = Section::Root,
                    (Section::Metadata, b"columnDef") => {
                        let id = pending_id.take().unwrap_or_default();
                        if id_to_index.contains_key(&id) {
                            return Err(IngestError::Structure(format!(
                                "duplicate columnDef id: {id}"
                            )));
                        }
                        let mut colname = pending_text.trim().to_string();
                        if colname.is_empty() {
                            warn!(id, "columnDef has no display name, using id");
                            colname = id.clone();
                        } else if column_names.contains(&colname) {
                            warn!(id, name = %colname, "duplicate column name, using id");
                            colname = id.clone();
                        }
                        id_to_index.insert(id, column_names.len());
                        column_names.push(colname);
                        columns.push(Vec::new());
                    }
                    (Section::QbeExpressions, b"qbeExpression") => {
                        let id = pending_id.take().unwrap_or_default();
                        if !id_to_index.contains_key(&id) {
                            warn!(id, "qbeExpression refers to an unknown columnDef id");
                        }
                        pending_text.clear();
                    }
                    (Section::Row, _) if pending_id.is_some() => {
                        let id = pending_id.take().unwrap_or_default();
                        push_cell(&id, &pending_text, &id_to_index, &mut columns)?;
                        pending_text.clear();
                    }
                    (Section::Row, _) => {
                        // Row element itself closed.
                        section = Section::Rows;
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(IngestError::Structure(
            "root tag is not <worksheetExport>".into(),
        ));
    }
    let column_count =
        column_count.ok_or_else(|| IngestError::Structure("no <metadata> tag found".into()))?;
    let row_count =
        row_count.ok_or_else(|| IngestError::Structure("no <rows> tag found".into()))?;
    if column_names.len() != column_count {
        return Err(IngestError::Structure(format!(
            "columnCount is {} but found {} <columnDef> tags",
            column_count,
            column_names.len()
        )));
    }
    for (i, col) in columns.iter().enumerate() {
        if col.len() != row_count {
            return Err(IngestError::Structure(format!(
                "column '{}' has {} values, expected rowCount {}",
                column_names[i],
                col.len(),
                row_count
            )));
        }
    }

    // Column-major to row-major.
    let rows: Vec<Vec<Cell>> = (0..row_count)
        .map(|r| columns.iter().map(|col| col[r].clone()).collect())
        .collect();

    Ok(DataTable::new(name, column_names, rows))
}

fn required_id(e: &BytesStart<'_>) -> Result<String, IngestError> {
    let attr = e
        .try_get_attribute("id")
        .map_err(|err| IngestError::Structure(err.to_string()))?
        .ok_or_else(|| {
            IngestError::Structure(format!(
                "<{}> is missing the \"id\" attribute",
                String::from_utf8_lossy(e.name().as_ref())
            ))
        })?;
    let value = attr
        .unescape_value()
        .map_err(|err| IngestError::Structure(err.to_string()))?;
    Ok(value.into_owned())
}

fn required_count(e: &BytesStart<'_>, attr_name: &str) -> Result<usize, IngestError> {
    let attr = e
        .try_get_attribute(attr_name)
        .map_err(|err| IngestError::Structure(err.to_string()))?
        .ok_or_else(|| {
            IngestError::Structure(format!(
                "<{}> is missing the \"{}\" attribute",
                String::from_utf8_lossy(e.name().as_ref()),
                attr_name
            ))
        })?;
    let value = attr
        .unescape_value()
        .map_err(|err| IngestError::Structure(err.to_string()))?;
    value.parse::<usize>().map_err(|_| {
        IngestError::Structure(format!("attribute \"{attr_name}\" is not an integer"))
    })
}

fn push_cell(
    id: &str,
    text: &str,
    id_to_index: &HashMap<String, usize>,
    columns: &mut [Vec<Cell>],
) -> Result<(), IngestError> {
    let index = *id_to_index.get(id).ok_or_else(|| {
        IngestError::Structure(format!("row cell refers to unknown column id: {id}"))
    })?;
    columns[index].push(infer_cell(text));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<worksheetExport>
  <metadata columnCount="2">
    <columnDef id="c1">Date</columnDef>
    <columnDef id="c2">Sales</columnDef>
  </metadata>
  <qbeExpressions>
    <qbeExpression id="c2">&gt; 100</qbeExpression>
  </qbeExpressions>
  <rows rowCount="2">
    <row><value id="c1">2024-01-01</value><value id="c2">100</value></row>
    <row><value id="c2">250</value><value id="c1">2024-01-02</value></row>
  </rows>
</worksheetExport>"#;

    #[test]
    fn round_trips_declared_shape() {
        let t = parse_worksheet("ws", SAMPLE).unwrap();
        assert_eq!(t.headers, vec!["Date", "Sales"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[0][0], Cell::Text("2024-01-01".into()));
        assert_eq!(t.rows[0][1], Cell::Int(100));
    }

    #[test]
    fn cells_bind_by_id_not_position() {
        let t = parse_worksheet("ws", SAMPLE).unwrap();
        assert_eq!(t.rows[1][0], Cell::Text("2024-01-02".into()));
        assert_eq!(t.rows[1][1], Cell::Int(250));
    }

    #[test]
    fn row_count_mismatch_is_fatal() {
        let bad = SAMPLE.replace(r#"rowCount="2""#, r#"rowCount="3""#);
        let err = parse_worksheet("ws", &bad).unwrap_err();
        assert!(matches!(err, IngestError::Structure(_)));
    }

    #[test]
    fn column_count_mismatch_is_fatal() {
        let bad = SAMPLE.replace(r#"columnCount="2""#, r#"columnCount="5""#);
        assert!(parse_worksheet("ws", &bad).is_err());
    }

    #[test]
    fn duplicate_column_id_is_fatal() {
        let bad = SAMPLE.replace(r#"<columnDef id="c2">Sales"#, r#"<columnDef id="c1">Sales"#);
        assert!(parse_worksheet("ws", &bad).is_err());
    }

    #[test]
    fn unknown_cell_id_is_fatal() {
        let bad = SAMPLE.replace(r#"<value id="c2">100"#, r#"<value id="zz">100"#);
        assert!(parse_worksheet("ws", &bad).is_err());
    }

    #[test]
    fn unknown_qbe_id_is_tolerated() {
        let odd = SAMPLE.replace(r#"<qbeExpression id="c2">"#, r#"<qbeExpression id="zz">"#);
        assert!(parse_worksheet("ws", &odd).is_ok());
    }

    #[test]
    fn self_closing_cell_is_null() {
        let sparse = SAMPLE.replace(
            r#"<value id="c2">100</value>"#,
            r#"<value id="c2"/>"#,
        );
        let t = parse_worksheet("ws", &sparse).unwrap();
        assert_eq!(t.rows[0][1], Cell::Null);
    }

    #[test]
    fn wrong_root_tag_is_fatal() {
        assert!(parse_worksheet("ws", "<export></export>").is_err());
    }
}
