//! Small DataFrame/series helpers shared by detection and analytical
//! strategies. Grounded on the teacher's `column_to_f64`/`pad_series` idiom
//! (referenced throughout `signals/*.rs`) and on `engine/event_sim.rs`'s
//! `extract_date_from_column` for pulling a `NaiveDateTime` out of a Date or
//! Datetime column regardless of stored time unit.

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::{Result, ZoneError};

/// Read a numeric column as `Vec<f64>`, erroring if the column is missing.
pub fn column_to_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let col = df
        .column(name)
        .map_err(|_| ZoneError::data(format!("column '{name}' not found")))?;
    let ca = col
        .cast(&DataType::Float64)
        .map_err(|e| ZoneError::data(format!("column '{name}' is not numeric: {e}")))?;
    let ca = ca.f64()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Left-pad a shorter indicator output (warm-up period consumed) with NaN so
/// it aligns index-for-index with the original series length.
pub fn pad_series(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() >= target_len {
        return values[values.len() - target_len..].to_vec();
    }
    let mut padded = vec![f64::NAN; target_len - values.len()];
    padded.extend_from_slice(values);
    padded
}

/// Read a Date or Datetime column's value at `idx` as a `NaiveDateTime`.
pub fn naive_datetime_at(df: &DataFrame, time_col: &str, idx: usize) -> Result<NaiveDateTime> {
    let col = df
        .column(time_col)
        .map_err(|_| ZoneError::data(format!("time column '{time_col}' not found")))?;
    match col.dtype() {
        DataType::Date => {
            let days = col.date()?.phys.get(idx);
            let days = days.ok_or_else(|| ZoneError::data(format!("null date at row {idx}")))?;
            let date = NaiveDate::from_num_days_from_ce_opt(days + 719_163)
                .ok_or_else(|| ZoneError::data(format!("invalid date at row {idx}")))?;
            Ok(date.and_hms_opt(0, 0, 0).unwrap())
        }
        DataType::Datetime(tu, _) => {
            let val = col.datetime()?.phys.get(idx);
            let val = val.ok_or_else(|| ZoneError::data(format!("null datetime at row {idx}")))?;
            let ndt = match tu {
                TimeUnit::Milliseconds => chrono::DateTime::from_timestamp_millis(val),
                TimeUnit::Microseconds => chrono::DateTime::from_timestamp_micros(val),
                TimeUnit::Nanoseconds => {
                    chrono::DateTime::from_timestamp(val / 1_000_000_000, (val % 1_000_000_000) as u32)
                }
            }
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| ZoneError::data(format!("invalid datetime at row {idx}")))?;
            Ok(ndt)
        }
        other => Err(ZoneError::data(format!(
            "time column '{time_col}' has unsupported dtype {other:?}"
        ))),
    }
}

/// Find the bar index whose timestamp is closest to `target`, by scanning
/// `time_col` (a Date or Datetime column). Used by preloaded-zone detection
/// (§4.2d) to snap externally supplied `start_time`/`end_time` onto the
/// loaded bar grid.
pub fn nearest_bar_index(df: &DataFrame, time_col: &str, target: NaiveDateTime) -> Result<usize> {
    let n = df.height();
    if n == 0 {
        return Err(ZoneError::data("cannot snap a timestamp against an empty frame"));
    }
    let mut best = 0usize;
    let mut best_delta = i64::MAX;
    for idx in 0..n {
        let candidate = naive_datetime_at(df, time_col, idx)?;
        let delta = (candidate - target).num_seconds().abs();
        if delta < best_delta {
            best_delta = delta;
            best = idx;
        }
    }
    Ok(best)
}

/// Turn a per-bar label sequence into contiguous `(start_idx, end_idx, label)`
/// runs, the state machine every detection strategy reduces to per §4.2: "each
/// bar is classified against the strategy's predicate, and contiguous
/// same-class runs become zones."
pub fn contiguous_runs(labels: &[String]) -> Vec<(usize, usize, String)> {
    let mut runs = Vec::new();
    if labels.is_empty() {
        return runs;
    }
    let mut start = 0;
    for i in 1..labels.len() {
        if labels[i] != labels[start] {
            runs.push((start, i - 1, labels[start].clone()));
            start = i;
        }
    }
    runs.push((start, labels.len() - 1, labels[start].clone()));
    runs
}

/// Pearson correlation coefficient; `None` if either series has zero variance
/// or fewer than 2 paired finite observations.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1 denominator), matching the teacher's
/// `engine/metrics.rs::std_dev` convention.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Linear-interpolated percentile, matching polars' default `QuantileMethod::Linear`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
