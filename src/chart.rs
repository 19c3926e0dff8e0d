//! Chart Renderer
//!
//! Turns the session's last query result into an SVG artifact in the
//! asset directory. Axis columns are validated against the result and
//! values can be aggregated per x value before drawing.

use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::types::TabularResult;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 400.0;
const MARGIN: f64 = 48.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    Pie,
}

impl FromStr for ChartKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "scatter" => Ok(ChartKind::Scatter),
            "pie" => Ok(ChartKind::Pie),
            other => anyhow::bail!("unknown chart type: {other}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl FromStr for Aggregation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "mean" | "avg" | "average" => Ok(Aggregation::Mean),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "count" => Ok(Aggregation::Count),
            other => anyhow::bail!("unknown aggregation: {other}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChartRequest {
    pub kind: ChartKind,
    pub x_column: String,
    pub y_column: String,
    pub aggregation: Option<Aggregation>,
    pub title: Option<String>,
}

/// Render a chart from `result` into `asset_dir`. Returns the artifact
/// file name (`{uuid}.svg`). Fails before any file is written when the
/// requested columns are missing or no numeric data remains.
pub fn render_chart(
    result: &TabularResult,
    request: &ChartRequest,
    asset_dir: &Path,
) -> Result<String> {
    let x_idx = result
        .column_index(&request.x_column)
        .with_context(|| format!("column '{}' not found in the result", request.x_column))?;
    let y_idx = result
        .column_index(&request.y_column)
        .with_context(|| format!("column '{}' not found in the result", request.y_column))?;

    let points = collect_points(result, x_idx, y_idx, request.aggregation)?;
    if points.is_empty() {
        anyhow::bail!("no plottable data in columns '{}'/'{}'", request.x_column, request.y_column);
    }

    let svg = match request.kind {
        ChartKind::Bar => draw_bar(&points, request),
        ChartKind::Line => draw_line(&points, request, false),
        ChartKind::Scatter => draw_line(&points, request, true),
        ChartKind::Pie => draw_pie(&points, request),
    };

    let name = format!("{}.svg", Uuid::new_v4());
    std::fs::create_dir_all(asset_dir)
        .with_context(|| format!("failed to create asset dir {}", asset_dir.display()))?;
    std::fs::write(asset_dir.join(&name), svg)
        .with_context(|| format!("failed to write chart {name}"))?;
    Ok(name)
}

/// One labelled y value per distinct x value, in first-seen order.
fn collect_points(
    result: &TabularResult,
    x_idx: usize,
    y_idx: usize,
    aggregation: Option<Aggregation>,
) -> Result<Vec<(String, f64)>> {
    let agg = aggregation.unwrap_or(Aggregation::Sum);
    let mut order: Vec<String> = Vec::new();
    let mut buckets: std::collections::HashMap<String, Vec<f64>> =
        std::collections::HashMap::new();

    for row in &result.rows {
        let Some(x_cell) = row.get(x_idx) else { continue };
        let label = x_cell.display();
        let value = row.get(y_idx).and_then(|c| c.as_f64());
        let entry = buckets.entry(label.clone()).or_insert_with(|| {
            order.push(label);
            Vec::new()
        });
        if let Some(v) = value {
            entry.push(v);
        } else if agg == Aggregation::Count {
            // count counts rows, not parseable values
            entry.push(f64::NAN);
        }
    }

    let mut points = Vec::with_capacity(order.len());
    for label in order {
        let values = &buckets[&label];
        if values.is_empty() {
            continue;
        }
        let y = match agg {
            Aggregation::Sum => values.iter().filter(|v| !v.is_nan()).sum(),
            Aggregation::Mean => {
                let clean: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
                if clean.is_empty() {
                    continue;
                }
                clean.iter().sum::<f64>() / clean.len() as f64
            }
            Aggregation::Min => {
                match values.iter().copied().filter(|v| !v.is_nan()).fold(None, |m: Option<f64>, v| {
                    Some(m.map_or(v, |m| m.min(v)))
                }) {
                    Some(v) => v,
                    None => continue,
                }
            }
            Aggregation::Max => {
                match values.iter().copied().filter(|v| !v.is_nan()).fold(None, |m: Option<f64>, v| {
                    Some(m.map_or(v, |m| m.max(v)))
                }) {
                    Some(v) => v,
                    None => continue,
                }
            }
            Aggregation::Count => values.len() as f64,
        };
        points.push((label, y));
    }
    Ok(points)
}

fn svg_header(title: Option<&str>) -> String {
    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n\
         <rect width=\"{WIDTH}\" height=\"{HEIGHT}\" fill=\"white\"/>\n"
    );
    if let Some(title) = title {
        let _ = write!(
            svg,
            "<text x=\"{}\" y=\"24\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"16\">{}</text>\n",
            WIDTH / 2.0,
            escape_xml(title)
        );
    }
    svg
}

fn axes() -> String {
    format!(
        "<line x1=\"{m}\" y1=\"{b}\" x2=\"{r}\" y2=\"{b}\" stroke=\"black\"/>\n\
         <line x1=\"{m}\" y1=\"{t}\" x2=\"{m}\" y2=\"{b}\" stroke=\"black\"/>\n",
        m = MARGIN,
        t = MARGIN,
        b = HEIGHT - MARGIN,
        r = WIDTH - MARGIN,
    )
}

fn y_scale(points: &[(String, f64)]) -> (f64, f64) {
    let max = points.iter().map(|(_, v)| *v).fold(f64::MIN, f64::max);
    let min = points.iter().map(|(_, v)| *v).fold(f64::MAX, f64::min);
    let min = min.min(0.0);
    let span = (max - min).abs().max(1e-9);
    (min, span)
}

fn plot_y(v: f64, min: f64, span: f64) -> f64 {
    let usable = HEIGHT - 2.0 * MARGIN;
    HEIGHT - MARGIN - ((v - min) / span) * usable
}

fn x_label(svg: &mut String, x: f64, label: &str) {
    let _ = write!(
        svg,
        "<text x=\"{x}\" y=\"{}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"10\">{}</text>\n",
        HEIGHT - MARGIN + 14.0,
        escape_xml(label)
    );
}

fn draw_bar(points: &[(String, f64)], request: &ChartRequest) -> String {
    let mut svg = svg_header(request.title.as_deref());
    svg.push_str(&axes());
    let (min, span) = y_scale(points);
    let usable = WIDTH - 2.0 * MARGIN;
    let slot = usable / points.len() as f64;
    let bar_w = (slot * 0.7).max(1.0);
    let zero_y = plot_y(0.0f64.max(min), min, span);

    for (i, (label, value)) in points.iter().enumerate() {
        let x = MARGIN + slot * i as f64 + (slot - bar_w) / 2.0;
        let y = plot_y(*value, min, span);
        let (top, h) = if y <= zero_y {
            (y, zero_y - y)
        } else {
            (zero_y, y - zero_y)
        };
        let _ = write!(
            svg,
            "<rect x=\"{x:.1}\" y=\"{top:.1}\" width=\"{bar_w:.1}\" height=\"{h:.1}\" fill=\"#4a78b8\"/>\n"
        );
        x_label(&mut svg, x + bar_w / 2.0, label);
    }
    svg.push_str("</svg>\n");
    svg
}

fn draw_line(points: &[(String, f64)], request: &ChartRequest, scatter_only: bool) -> String {
    let mut svg = svg_header(request.title.as_deref());
    svg.push_str(&axes());
    let (min, span) = y_scale(points);
    let usable = WIDTH - 2.0 * MARGIN;
    let step = if points.len() > 1 {
        usable / (points.len() - 1) as f64
    } else {
        0.0
    };

    let coords: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, (_, v))| (MARGIN + step * i as f64, plot_y(*v, min, span)))
        .collect();

    if !scatter_only && coords.len() > 1 {
        let path: Vec<String> = coords.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
        let _ = write!(
            svg,
            "<polyline points=\"{}\" fill=\"none\" stroke=\"#4a78b8\" stroke-width=\"2\"/>\n",
            path.join(" ")
        );
    }
    for ((x, y), (label, _)) in coords.iter().zip(points) {
        let _ = write!(svg, "<circle cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"3\" fill=\"#274b76\"/>\n");
        x_label(&mut svg, *x, label);
    }
    svg.push_str("</svg>\n");
    svg
}

fn draw_pie(points: &[(String, f64)], request: &ChartRequest) -> String {
    const PALETTE: [&str; 8] = [
        "#4a78b8", "#d9823b", "#5a9e5a", "#c05a5a", "#8a6bb8", "#b8a04a", "#4aa8a8", "#999999",
    ];
    let mut svg = svg_header(request.title.as_deref());
    let total: f64 = points.iter().map(|(_, v)| v.abs()).sum();
    let cx = WIDTH / 2.0;
    let cy = HEIGHT / 2.0;
    let r = (HEIGHT / 2.0 - MARGIN).max(10.0);

    let mut angle = -std::f64::consts::FRAC_PI_2;
    for (i, (label, value)) in points.iter().enumerate() {
        let frac = if total > 0.0 { value.abs() / total } else { 0.0 };
        let sweep = frac * std::f64::consts::TAU;
        let end = angle + sweep;
        let (x1, y1) = (cx + r * angle.cos(), cy + r * angle.sin());
        let (x2, y2) = (cx + r * end.cos(), cy + r * end.sin());
        let large = if sweep > std::f64::consts::PI { 1 } else { 0 };
        let _ = write!(
            svg,
            "<path d=\"M {cx:.1} {cy:.1} L {x1:.1} {y1:.1} A {r:.1} {r:.1} 0 {large} 1 {x2:.1} {y2:.1} Z\" fill=\"{}\"/>\n",
            PALETTE[i % PALETTE.len()]
        );
        let mid = angle + sweep / 2.0;
        let (lx, ly) = (cx + (r + 16.0) * mid.cos(), cy + (r + 16.0) * mid.sin());
        let _ = write!(
            svg,
            "<text x=\"{lx:.1}\" y=\"{ly:.1}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"10\">{}</text>\n",
            escape_xml(label)
        );
        angle = end;
    }
    svg.push_str("</svg>\n");
    svg
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    fn result() -> TabularResult {
        TabularResult {
            headers: vec!["Region".into(), "Sales".into()],
            rows: vec![
                vec![Cell::Text("north".into()), Cell::Int(100)],
                vec![Cell::Text("south".into()), Cell::Int(250)],
                vec![Cell::Text("north".into()), Cell::Int(50)],
            ],
        }
    }

    fn request(kind: ChartKind, x: &str, y: &str) -> ChartRequest {
        ChartRequest {
            kind,
            x_column: x.into(),
            y_column: y.into(),
            aggregation: None,
            title: None,
        }
    }

    #[test]
    fn unknown_column_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_chart(&result(), &request(ChartKind::Bar, "Nope", "Sales"), dir.path());
        assert!(err.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn valid_request_writes_exactly_one_asset() {
        let dir = tempfile::tempdir().unwrap();
        let name = render_chart(&result(), &request(ChartKind::Bar, "Region", "Sales"), dir.path())
            .unwrap();
        assert!(name.ends_with(".svg"));
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let second =
            render_chart(&result(), &request(ChartKind::Line, "Region", "Sales"), dir.path())
                .unwrap();
        assert_ne!(name, second);
    }

    #[test]
    fn default_aggregation_sums_duplicate_labels() {
        let points = collect_points(&result(), 0, 1, None).unwrap();
        assert_eq!(points, vec![("north".to_string(), 150.0), ("south".to_string(), 250.0)]);
    }

    #[test]
    fn mean_and_count_aggregations() {
        let mean = collect_points(&result(), 0, 1, Some(Aggregation::Mean)).unwrap();
        assert_eq!(mean[0], ("north".to_string(), 75.0));
        let count = collect_points(&result(), 0, 1, Some(Aggregation::Count)).unwrap();
        assert_eq!(count[0], ("north".to_string(), 2.0));
    }

    #[test]
    fn chart_kind_parses_case_insensitively() {
        assert_eq!(ChartKind::from_str("BAR").unwrap(), ChartKind::Bar);
        assert!(ChartKind::from_str("donut").is_err());
    }
}
