//! Tabula - In-Memory Table
//!
//! The active dataset for a code-mode session, plus the fast-path
//! parser that answers plain "show me rows" questions without a
//! model round trip.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{Cell, TabularResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataTable {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl DataTable {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    }

    /// First `n` rows, optionally restricted to named columns.
    pub fn head(&self, n: usize, columns: Option<&[String]>) -> TabularResult {
        self.slice(0, n.min(self.rows.len()), columns)
    }

    /// Last `n` rows, optionally restricted to named columns.
    pub fn tail(&self, n: usize, columns: Option<&[String]>) -> TabularResult {
        let start = self.rows.len().saturating_sub(n);
        self.slice(start, self.rows.len(), columns)
    }

    fn slice(&self, start: usize, end: usize, columns: Option<&[String]>) -> TabularResult {
        let indices: Vec<usize> = match columns {
            Some(names) => names
                .iter()
                .filter_map(|name| self.column_index(name))
                .collect(),
            None => (0..self.headers.len()).collect(),
        };
        let headers = indices.iter().map(|&i| self.headers[i].clone()).collect();
        let rows = self.rows[start..end]
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();
        TabularResult { headers, rows }
    }

    /// Answer a parsed row request directly from the table. Returns
    /// `None` when the request names a column the table does not have;
    /// those questions go to the model instead.
    pub fn answer_row_request(&self, req: &RowRequest) -> Option<TabularResult> {
        if let Some(ref cols) = req.columns {
            if cols.iter().any(|c| self.column_index(c).is_none()) {
                return None;
            }
        }
        let cols = req.columns.as_deref();
        Some(if req.from_end {
            self.tail(req.count, cols)
        } else {
            self.head(req.count, cols)
        })
    }

    /// Plain-text rendering for prompts and tool results. Column widths
    /// are padded to the widest value, capped so a single long cell
    /// cannot blow up the prompt.
    pub fn preview_text(&self, max_rows: usize) -> String {
        render_text(&self.headers, &self.rows, max_rows)
    }

    /// CSV serialization, used to materialize the table into a sandbox
    /// working directory.
    pub fn to_csv_string(&self) -> Result<String, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            let record: Vec<String> = row.iter().map(|c| c.display()).collect();
            writer.write_record(&record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

const MAX_CELL_WIDTH: usize = 40;

pub fn render_text(headers: &[String], rows: &[Vec<Cell>], max_rows: usize) -> String {
    let shown = rows.len().min(max_rows);
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len().min(MAX_CELL_WIDTH)).collect();
    let mut cells: Vec<Vec<String>> = Vec::with_capacity(shown);
    for row in rows.iter().take(shown) {
        let mut line = Vec::with_capacity(headers.len());
        for (i, cell) in row.iter().enumerate() {
            let mut text = cell.display();
            if text.chars().count() > MAX_CELL_WIDTH {
                text = text.chars().take(MAX_CELL_WIDTH - 3).collect();
                text.push_str("...");
            }
            if i < widths.len() {
                widths[i] = widths[i].max(text.chars().count());
            }
            line.push(text);
        }
        cells.push(line);
    }

    let mut out = String::new();
    for (i, h) in headers.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&format!("{:width$}", h, width = widths[i]));
    }
    out.push('\n');
    for line in &cells {
        for (i, text) in line.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            let width = widths.get(i).copied().unwrap_or(0);
            out.push_str(&format!("{:width$}", text, width = width));
        }
        out.push('\n');
    }
    if rows.len() > shown {
        out.push_str(&format!("... ({} rows total)\n", rows.len()));
    }
    out
}

/// A row-display request recognized without calling the model.
#[derive(Clone, Debug, PartialEq)]
pub struct RowRequest {
    pub from_end: bool,
    pub count: usize,
    pub columns: Option<Vec<String>>,
}

/// Detect questions of the form "show the first 5 rows" or
/// "[Date, Sales] last 3 rows". Returns `None` when the question needs
/// the model; matching is deliberately narrow so anything with extra
/// analytical intent falls through.
pub fn parse_row_request(question: &str) -> Option<RowRequest> {
    // A bracketed column list anywhere in the question restricts output.
    let col_re = Regex::new(r"\[([^\]]+)\]").ok()?;
    let columns = col_re.captures(question).map(|cap| {
        cap[1]
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>()
    });
    let stripped = col_re.replace_all(question, " ");

    let req_re =
        Regex::new(r"(?i)\b(first|last|top|bottom)\s+(\d+)\s+(rows?|records?|lines?|entries)\b")
            .ok()?;
    let caps = req_re.captures(&stripped)?;

    // Reject if the remainder carries analytical words; those questions
    // are for the model.
    let remainder = stripped.replace(&caps[0], " ").to_lowercase();
    const ANALYTICAL: &[&str] = &[
        "average", "mean", "sum", "count", "group", "where", "filter", "sort", "plot", "chart",
        "why", "compare", "trend",
    ];
    if ANALYTICAL.iter().any(|w| remainder.contains(w)) {
        return None;
    }

    let keyword = caps[1].to_lowercase();
    let count: usize = caps[2].parse().ok()?;
    if count == 0 {
        return None;
    }
    Some(RowRequest {
        from_end: keyword == "last" || keyword == "bottom",
        count,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DataTable {
        DataTable::new(
            "sales",
            vec!["Date".into(), "Sales".into(), "Region".into()],
            (1..=5)
                .map(|i| {
                    vec![
                        Cell::Text(format!("2024-01-0{i}")),
                        Cell::Int(i * 100),
                        Cell::Text("north".into()),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn head_and_tail_slice_rows() {
        let t = table();
        let h = t.head(2, None);
        assert_eq!(h.rows.len(), 2);
        assert_eq!(h.rows[0][1], Cell::Int(100));
        let l = t.tail(2, None);
        assert_eq!(l.rows.len(), 2);
        assert_eq!(l.rows[1][1], Cell::Int(500));
    }

    #[test]
    fn tail_larger_than_table_returns_everything() {
        let t = table();
        assert_eq!(t.tail(50, None).rows.len(), 5);
    }

    #[test]
    fn slice_respects_column_selection() {
        let t = table();
        let cols = vec!["Sales".to_string()];
        let h = t.head(1, Some(&cols));
        assert_eq!(h.headers, vec!["Sales"]);
        assert_eq!(h.rows[0], vec![Cell::Int(100)]);
    }

    #[test]
    fn parses_simple_row_requests() {
        let req = parse_row_request("show me the first 5 rows").unwrap();
        assert_eq!(req.count, 5);
        assert!(!req.from_end);
        assert!(req.columns.is_none());

        let req = parse_row_request("last 3 records please").unwrap();
        assert!(req.from_end);
        assert_eq!(req.count, 3);
    }

    #[test]
    fn parses_column_restricted_request() {
        let req = parse_row_request("[Date, Sales] last 3 rows").unwrap();
        assert!(req.from_end);
        assert_eq!(req.count, 3);
        assert_eq!(req.columns, Some(vec!["Date".into(), "Sales".into()]));
    }

    #[test]
    fn row_request_with_unknown_column_falls_through() {
        let t = table();
        let req = parse_row_request("[Nope] first 3 rows").unwrap();
        assert!(t.answer_row_request(&req).is_none());

        let req = parse_row_request("[Date, Sales] last 3 rows").unwrap();
        let result = t.answer_row_request(&req).unwrap();
        assert_eq!(result.headers, vec!["Date", "Sales"]);
        assert_eq!(result.rows.len(), 3);
    }

    #[test]
    fn analytical_questions_fall_through() {
        assert!(parse_row_request("average of the first 5 rows").is_none());
        assert!(parse_row_request("what drives sales?").is_none());
        assert!(parse_row_request("first 0 rows").is_none());
    }

    #[test]
    fn preview_marks_truncation() {
        let t = table();
        let text = t.preview_text(2);
        assert!(text.contains("Date"));
        assert!(text.contains("(5 rows total)"));
    }
}
