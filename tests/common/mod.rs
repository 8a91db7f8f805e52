#![allow(dead_code)]

use chrono::NaiveDate;
use polars::prelude::*;

fn dates(n: usize) -> Vec<i32> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    (0..n as i32)
        .map(|i| {
            (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
                .signed_duration_since(epoch)
                .num_days() as i32
        })
        .collect()
}

/// A trending OHLC series plus one oscillator column, the shared base every
/// detection-scenario fixture below builds on (spec scenario 1's "trivial OHLC").
fn base_ohlc(n: usize) -> (Vec<i32>, Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let close: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.01).collect();
    let high: Vec<f64> = close.iter().map(|v| v + 1.0).collect();
    let low: Vec<f64> = close.iter().map(|v| v - 1.0).collect();
    let open = close.clone();
    (dates(n), open, high, low, close)
}

fn with_date_cast(mut df: DataFrame) -> DataFrame {
    df.try_apply("date", |s| s.cast(&DataType::Date)).unwrap();
    df
}

/// Scenario 1: `osc[i] = sin(2*pi*i/50)` over 200 bars.
pub fn sine_oscillator_series(n: usize, period: f64) -> DataFrame {
    let (date, open, high, low, close) = base_ohlc(n);
    let osc: Vec<f64> = (0..n).map(|i| (2.0 * std::f64::consts::PI * i as f64 / period).sin()).collect();
    with_date_cast(
        df! {
            "date" => date,
            "open" => open,
            "high" => high,
            "low" => low,
            "close" => close,
            "osc" => osc,
        }
        .unwrap(),
    )
}

/// Scenario 2: `rsi[i] = i` over `n` bars (a monotone ramp through the
/// threshold bands).
pub fn rsi_ramp_series(n: usize) -> DataFrame {
    let (date, open, high, low, close) = base_ohlc(n);
    let rsi: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    with_date_cast(
        df! {
            "date" => date,
            "open" => open,
            "high" => high,
            "low" => low,
            "close" => close,
            "rsi" => rsi,
        }
        .unwrap(),
    )
}

/// Scenario 3: two lines, `fast` oscillating faster than `slow`, crossing
/// repeatedly over `n` bars.
pub fn dual_line_series(n: usize) -> DataFrame {
    let (date, open, high, low, close) = base_ohlc(n);
    let fast: Vec<f64> = (0..n).map(|i| (2.0 * std::f64::consts::PI * i as f64 / 30.0).sin()).collect();
    let slow: Vec<f64> = (0..n).map(|i| 0.5 * (2.0 * std::f64::consts::PI * i as f64 / 90.0).sin()).collect();
    with_date_cast(
        df! {
            "date" => date,
            "open" => open,
            "high" => high,
            "low" => low,
            "close" => close,
            "fast" => fast,
            "slow" => slow,
        }
        .unwrap(),
    )
}

/// Scenario 4: an arbitrarily named indicator column with no special meaning
/// anywhere in the crate, to exercise indicator-agnosticism end to end.
pub fn agnostic_column_series(n: usize, column_name: &str) -> DataFrame {
    let (date, open, high, low, close) = base_ohlc(n);
    let values: Vec<f64> = (0..n).map(|i| (2.0 * std::f64::consts::PI * i as f64 / 40.0).sin()).collect();
    let mut df = df! {
        "date" => date,
        "open" => open,
        "high" => high,
        "low" => low,
        "close" => close,
    }
    .unwrap();
    df.with_column(Series::new(PlSmallStr::from(column_name), values)).unwrap();
    with_date_cast(df)
}

/// A flat oscillator: every bar identical, so detection finds no crossings
/// and feature extraction sees a constant series (boundary behaviors).
pub fn constant_series(n: usize) -> DataFrame {
    let (date, open, high, low, close) = base_ohlc(n);
    let osc = vec![0.0_f64; n];
    with_date_cast(
        df! {
            "date" => date,
            "open" => open,
            "high" => high,
            "low" => low,
            "close" => close,
            "osc" => osc,
        }
        .unwrap(),
    )
}

/// Same columns as [`sine_oscillator_series`] but with the columns declared
/// in reverse order, for the cache-key column-order scenario.
pub fn sine_oscillator_series_reordered(n: usize, period: f64) -> DataFrame {
    let (date, open, high, low, close) = base_ohlc(n);
    let osc: Vec<f64> = (0..n).map(|i| (2.0 * std::f64::consts::PI * i as f64 / period).sin()).collect();
    with_date_cast(
        df! {
            "osc" => osc,
            "close" => close,
            "low" => low,
            "high" => high,
            "open" => open,
            "date" => date,
        }
        .unwrap(),
    )
}
