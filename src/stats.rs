//! Statistics Helpers
//!
//! Closed-form helpers behind the /forecast endpoint and the regression
//! API: a least-squares linear trend over a date column, and
//! multivariate linear regression via normal equations with an 80/20
//! train/test split.

use chrono::NaiveDate;

use crate::table::DataTable;
use crate::types::{Cell, TabularResult};

/// Forecast `periods` future values of `value_column` ordered by
/// `date_column`. Fits a linear trend over the observed points and
/// extends it day by day past the last date; the bounds widen with the
/// residual spread. Returns an error string when columns are missing or
/// unusable, matching the tool-level error convention.
pub fn forecast_time_series(
    table: &DataTable,
    date_column: &str,
    value_column: &str,
    periods: usize,
) -> Result<TabularResult, String> {
    let date_idx = table
        .column_index(date_column)
        .ok_or_else(|| format!("Column '{date_column}' does not exist in the dataframe."))?;
    let value_idx = table
        .column_index(value_column)
        .ok_or_else(|| format!("Column '{value_column}' does not exist in the dataframe."))?;

    // Parse observations as (day ordinal, value).
    let mut points: Vec<(NaiveDate, f64)> = Vec::new();
    for row in &table.rows {
        let date = row.get(date_idx).and_then(|c| parse_date(&c.display()));
        let value = row.get(value_idx).and_then(|c| c.as_f64());
        if let (Some(d), Some(v)) = (date, value) {
            points.push((d, v));
        }
    }
    if points.len() < 2 {
        return Err(format!(
            "Not enough parsable rows in '{date_column}'/'{value_column}' to fit a trend."
        ));
    }
    points.sort_by_key(|(d, _)| *d);

    let origin = points[0].0;
    let xs: Vec<f64> = points
        .iter()
        .map(|(d, _)| (*d - origin).num_days() as f64)
        .collect();
    let ys: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let (slope, intercept) = fit_line(&xs, &ys);

    // Residual spread gives the uncertainty band.
    let residual_sd = {
        let n = xs.len() as f64;
        let sse: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| {
                let e = y - (slope * x + intercept);
                e * e
            })
            .sum();
        (sse / n).sqrt()
    };
    let band = 1.96 * residual_sd;

    let last = points[points.len() - 1].0;
    let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(points.len() + periods);
    for (date, _) in &points {
        let x = (*date - origin).num_days() as f64;
        let yhat = slope * x + intercept;
        rows.push(forecast_row(*date, yhat, band));
    }
    for i in 1..=periods {
        let date = last + chrono::Duration::days(i as i64);
        let x = (date - origin).num_days() as f64;
        let yhat = slope * x + intercept;
        rows.push(forecast_row(date, yhat, band));
    }

    Ok(TabularResult {
        headers: vec![
            "ds".to_string(),
            "yhat".to_string(),
            "yhat_lower".to_string(),
            "yhat_upper".to_string(),
        ],
        rows,
    })
}

fn forecast_row(date: NaiveDate, yhat: f64, band: f64) -> Vec<Cell> {
    vec![
        Cell::Text(date.format("%Y-%m-%d").to_string()),
        Cell::Float(yhat),
        Cell::Float(yhat - band),
        Cell::Float(yhat + band),
    ]
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(d);
        }
    }
    // Timestamps with a time part keep their date prefix.
    trimmed
        .split_whitespace()
        .next()
        .filter(|p| *p != trimmed)
        .and_then(parse_date)
}

/// Least-squares slope and intercept.
fn fit_line(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x) * (x - mean_x);
    }
    let slope = if den.abs() < 1e-12 { 0.0 } else { num / den };
    (slope, mean_y - slope * mean_x)
}

/// Outcome of a regression fit: test-set MSE plus the test predictions.
#[derive(Debug)]
pub struct RegressionReport {
    pub mse: f64,
    pub predictions: Vec<f64>,
}

/// Fit a multivariate linear regression of `target_column` on
/// `feature_columns` and report the mean squared error on a held-out
/// 20% test split. The split is deterministic: the first 80% of rows
/// train, the rest test.
pub fn predict_with_regression(
    table: &DataTable,
    feature_columns: &[String],
    target_column: &str,
) -> Result<RegressionReport, String> {
    let mut indices = Vec::with_capacity(feature_columns.len());
    for col in feature_columns {
        indices.push(
            table
                .column_index(col)
                .ok_or_else(|| format!("Column '{col}' does not exist in the dataframe."))?,
        );
    }
    let target_idx = table
        .column_index(target_column)
        .ok_or_else(|| format!("Column '{target_column}' does not exist in the dataframe."))?;

    // Keep only fully numeric rows; design matrix gets a bias column.
    let mut x_rows: Vec<Vec<f64>> = Vec::new();
    let mut y_vals: Vec<f64> = Vec::new();
    for row in &table.rows {
        let features: Option<Vec<f64>> = indices
            .iter()
            .map(|&i| row.get(i).and_then(|c| c.as_f64()))
            .collect();
        let target = row.get(target_idx).and_then(|c| c.as_f64());
        if let (Some(mut f), Some(t)) = (features, target) {
            f.insert(0, 1.0);
            x_rows.push(f);
            y_vals.push(t);
        }
    }

    let n = x_rows.len();
    let k = feature_columns.len() + 1;
    if n < k + 2 {
        return Err("Not enough numeric rows to fit the regression.".to_string());
    }

    let split = ((n as f64) * 0.8).round() as usize;
    let split = split.clamp(k, n - 1);
    let (x_train, x_test) = x_rows.split_at(split);
    let (y_train, y_test) = y_vals.split_at(split);

    let beta = normal_equations(x_train, y_train, k)
        .ok_or_else(|| "Regression system is singular for these columns.".to_string())?;

    let predictions: Vec<f64> = x_test
        .iter()
        .map(|row| row.iter().zip(&beta).map(|(x, b)| x * b).sum())
        .collect();
    let mse = predictions
        .iter()
        .zip(y_test)
        .map(|(p, y)| (p - y) * (p - y))
        .sum::<f64>()
        / predictions.len() as f64;

    Ok(RegressionReport { mse, predictions })
}

/// Solve (XᵀX)β = Xᵀy by Gaussian elimination with partial pivoting.
fn normal_equations(x: &[Vec<f64>], y: &[f64], k: usize) -> Option<Vec<f64>> {
    // Build XᵀX and Xᵀy.
    let mut a = vec![vec![0.0; k + 1]; k];
    for (row, &target) in x.iter().zip(y) {
        for i in 0..k {
            for j in 0..k {
                a[i][j] += row[i] * row[j];
            }
            a[i][k] += row[i] * target;
        }
    }

    for col in 0..k {
        let pivot = (col..k).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-10 {
            return None;
        }
        a.swap(col, pivot);
        for row in 0..k {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            for j in col..=k {
                a[row][j] -= factor * a[col][j];
            }
        }
    }

    Some((0..k).map(|i| a[i][k] / a[i][i]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date_table() -> DataTable {
        DataTable::new(
            "series",
            vec!["Date".into(), "Sales".into()],
            (0..10)
                .map(|i| {
                    vec![
                        Cell::Text(format!("2024-01-{:02}", i + 1)),
                        Cell::Float(10.0 + 2.0 * i as f64),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn forecast_extends_a_linear_trend() {
        let forecast = forecast_time_series(&date_table(), "Date", "Sales", 3).unwrap();
        assert_eq!(forecast.headers, vec!["ds", "yhat", "yhat_lower", "yhat_upper"]);
        assert_eq!(forecast.rows.len(), 13);

        // Perfectly linear input: day 10 (2024-01-11) predicts 30.
        let last = forecast.rows.last().unwrap();
        assert_eq!(last[0], Cell::Text("2024-01-13".into()));
        let yhat = last[1].as_f64().unwrap();
        assert!((yhat - 34.0).abs() < 1e-6);
    }

    #[test]
    fn forecast_reports_missing_columns() {
        let err = forecast_time_series(&date_table(), "When", "Sales", 3).unwrap_err();
        assert!(err.contains("'When'"));
    }

    #[test]
    fn regression_recovers_exact_linear_relation() {
        let table = DataTable::new(
            "lin",
            vec!["x".into(), "y".into()],
            (0..20)
                .map(|i| vec![Cell::Float(i as f64), Cell::Float(3.0 * i as f64 + 1.0)])
                .collect(),
        );
        let report = predict_with_regression(&table, &["x".to_string()], "y").unwrap();
        assert!(report.mse < 1e-12);
        assert_eq!(report.predictions.len(), 4);
    }

    #[test]
    fn regression_rejects_unknown_column() {
        let table = date_table();
        let err = predict_with_regression(&table, &["Nope".to_string()], "Sales").unwrap_err();
        assert!(err.contains("'Nope'"));
    }
}
