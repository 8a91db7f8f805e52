//! Swing-structure analysis (§4.3.1): three interchangeable algorithms over
//! `open/high/low/close` producing the same record shape. `compute_swings`
//! is also called directly by the pipeline builder when `swing_scope ==
//! global` (spec §4.6 step 2) to build the series-wide `SwingContext`.

use polars::prelude::*;
use serde_json::{json, Value};

use super::{AnalysisContext, AnalyticalStrategy};
use crate::error::{Result, ZoneError};
use crate::features::swing_context::SwingPoint;
use crate::util::{column_to_f64, mean, percentile, std_dev};

#[derive(Debug, Clone, Copy)]
pub enum SwingAlgorithm {
    ZigZag { legs: usize, deviation_pct: f64 },
    PeakFinding {
        prominence: Option<f64>,
        distance: usize,
        min_amplitude_pct: f64,
    },
    PivotPoints {
        left_bars: usize,
        right_bars: usize,
        min_amplitude_pct: f64,
    },
}

impl SwingAlgorithm {
    fn name(&self) -> &'static str {
        match self {
            Self::ZigZag { .. } => "zigzag",
            Self::PeakFinding { .. } => "peak_finding",
            Self::PivotPoints { .. } => "pivot_points",
        }
    }

    fn params(&self) -> Value {
        match self {
            Self::ZigZag { legs, deviation_pct } => json!({"legs": legs, "deviation": deviation_pct}),
            Self::PeakFinding {
                prominence,
                distance,
                min_amplitude_pct,
            } => json!({
                "prominence": prominence,
                "distance": distance,
                "min_amplitude_pct": min_amplitude_pct,
            }),
            Self::PivotPoints {
                left_bars,
                right_bars,
                min_amplitude_pct,
            } => json!({
                "left_bars": left_bars,
                "right_bars": right_bars,
                "min_amplitude_pct": min_amplitude_pct,
            }),
        }
    }
}

/// Resolve a swing registry name to the algorithm+defaults `registry::build_strategy`
/// would wrap in a [`SwingStrategy`], for callers (the pipeline builder,
/// building a global `SwingContext`) that need the bare algorithm rather than
/// the `AnalyticalStrategy` trait object.
pub fn algorithm_for_name(name: &str) -> Result<SwingAlgorithm> {
    match name {
        "swing" | "swing_zigzag" | "zigzag" => Ok(SwingAlgorithm::ZigZag { legs: 3, deviation_pct: 1.0 }),
        "swing_peak_finding" | "peak_finding" => Ok(SwingAlgorithm::PeakFinding {
            prominence: None,
            distance: 1,
            min_amplitude_pct: 0.0,
        }),
        "swing_pivot_points" | "pivot_points" => Ok(SwingAlgorithm::PivotPoints {
            left_bars: 2,
            right_bars: 2,
            min_amplitude_pct: 0.0,
        }),
        other => Err(ZoneError::config(format!("unknown swing algorithm '{other}'"))),
    }
}

/// ZigZag: a swing confirms once price reverses by at least `deviation_pct`
/// and the reversal has held for `legs` bars.
fn zigzag_swings(high: &[f64], low: &[f64], legs: usize, deviation_pct: f64) -> Vec<SwingPoint> {
    let n = high.len();
    if n < 2 {
        return Vec::new();
    }
    let mut swings = Vec::new();
    let mut pivot_idx = 0usize;
    let mut pivot_price = low[0];
    let mut looking_for_high = true;
    let mut extreme_idx = 0usize;
    let mut extreme_price = if looking_for_high { high[0] } else { low[0] };

    for i in 1..n {
        if looking_for_high {
            if high[i] > extreme_price {
                extreme_price = high[i];
                extreme_idx = i;
            }
            let retrace = if extreme_price > 0.0 {
                (extreme_price - low[i]) / extreme_price * 100.0
            } else {
                0.0
            };
            if retrace >= deviation_pct && i.saturating_sub(extreme_idx) >= legs.max(1) {
                swings.push(SwingPoint {
                    start_idx: pivot_idx,
                    end_idx: extreme_idx,
                    start_price: pivot_price,
                    end_price: extreme_price,
                    is_rally: true,
                });
                pivot_idx = extreme_idx;
                pivot_price = extreme_price;
                looking_for_high = false;
                extreme_idx = i;
                extreme_price = low[i];
            }
        } else {
            if low[i] < extreme_price {
                extreme_price = low[i];
                extreme_idx = i;
            }
            let retrace = if extreme_price > 0.0 {
                (high[i] - extreme_price) / extreme_price * 100.0
            } else {
                0.0
            };
            if retrace >= deviation_pct && i.saturating_sub(extreme_idx) >= legs.max(1) {
                swings.push(SwingPoint {
                    start_idx: pivot_idx,
                    end_idx: extreme_idx,
                    start_price: pivot_price,
                    end_price: extreme_price,
                    is_rally: false,
                });
                pivot_idx = extreme_idx;
                pivot_price = extreme_price;
                looking_for_high = true;
                extreme_idx = i;
                extreme_price = high[i];
            }
        }
    }
    swings
}

/// Local maxima of `high` / minima of `low` with a minimum bar `distance`
/// and a `prominence` floor (defaults to ~1% of the price range when null),
/// then paired consecutively into rally/drop legs.
fn peak_finding_swings(
    high: &[f64],
    low: &[f64],
    prominence: Option<f64>,
    distance: usize,
    min_amplitude_pct: f64,
) -> Vec<SwingPoint> {
    let n = high.len();
    if n < 3 {
        return Vec::new();
    }
    let range = high.iter().cloned().fold(f64::MIN, f64::max) - low.iter().cloned().fold(f64::MAX, f64::min);
    let prom = prominence.unwrap_or((range * 0.01).max(0.0));

    let mut extrema: Vec<(usize, f64, bool)> = Vec::new();
    let mut last_idx: Option<usize> = None;
    for i in 1..n - 1 {
        if let Some(li) = last_idx {
            if i - li < distance {
                continue;
            }
        }
        if high[i] > high[i - 1] && high[i] >= high[i + 1] && (high[i] - low[i]) >= prom {
            extrema.push((i, high[i], true));
            last_idx = Some(i);
        } else if low[i] < low[i - 1] && low[i] <= low[i + 1] && (high[i] - low[i]) >= prom {
            extrema.push((i, low[i], false));
            last_idx = Some(i);
        }
    }

    let mut swings = Vec::new();
    for w in extrema.windows(2) {
        let (i0, p0, is_peak0) = w[0];
        let (i1, p1, _) = w[1];
        let amp = if p0 != 0.0 { (p1 - p0).abs() / p0 * 100.0 } else { 0.0 };
        if amp < min_amplitude_pct {
            continue;
        }
        let _ = is_peak0;
        swings.push(SwingPoint {
            start_idx: i0,
            end_idx: i1,
            start_price: p0,
            end_price: p1,
            is_rally: p1 >= p0,
        });
    }
    swings
}

/// N-bar pivot pattern: `high[i]` is a pivot high iff it exceeds every
/// `high[i±j]` for `j` in `1..=left_bars`/`1..=right_bars`; symmetric for
/// pivot lows on `low`.
fn pivot_point_swings(high: &[f64], low: &[f64], left_bars: usize, right_bars: usize, min_amplitude_pct: f64) -> Vec<SwingPoint> {
    let n = high.len();
    if n < left_bars + right_bars + 1 {
        return Vec::new();
    }
    let mut extrema: Vec<(usize, f64, bool)> = Vec::new();
    for i in left_bars..n - right_bars {
        let is_pivot_high = (1..=left_bars).all(|j| high[i] > high[i - j])
            && (1..=right_bars).all(|j| high[i] > high[i + j]);
        let is_pivot_low = (1..=left_bars).all(|j| low[i] < low[i - j])
            && (1..=right_bars).all(|j| low[i] < low[i + j]);
        if is_pivot_high {
            extrema.push((i, high[i], true));
        } else if is_pivot_low {
            extrema.push((i, low[i], false));
        }
    }
    let mut swings = Vec::new();
    for w in extrema.windows(2) {
        let (i0, p0, _) = w[0];
        let (i1, p1, _) = w[1];
        let amp = if p0 != 0.0 { (p1 - p0).abs() / p0 * 100.0 } else { 0.0 };
        if amp < min_amplitude_pct {
            continue;
        }
        swings.push(SwingPoint {
            start_idx: i0,
            end_idx: i1,
            start_price: p0,
            end_price: p1,
            is_rally: p1 >= p0,
        });
    }
    swings
}

pub fn compute_swings(df: &DataFrame, algorithm: SwingAlgorithm) -> Result<Vec<SwingPoint>> {
    let high = column_to_f64(df, "high")?;
    let low = column_to_f64(df, "low")?;
    Ok(match algorithm {
        SwingAlgorithm::ZigZag { legs, deviation_pct } => zigzag_swings(&high, &low, legs, deviation_pct),
        SwingAlgorithm::PeakFinding {
            prominence,
            distance,
            min_amplitude_pct,
        } => peak_finding_swings(&high, &low, prominence, distance.max(1), min_amplitude_pct),
        SwingAlgorithm::PivotPoints {
            left_bars,
            right_bars,
            min_amplitude_pct,
        } => pivot_point_swings(&high, &low, left_bars, right_bars, min_amplitude_pct),
    })
}

fn stat_or_null(values: &[f64]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    json!({
        "avg": mean(values),
        "max": sorted.last().copied(),
        "min": sorted.first().copied(),
        "median": percentile(&sorted, 0.5),
        "std": std_dev(values),
    })
}

/// Reduce a swing list (from either per-zone computation or a sliced global
/// `SwingContext`) to the record shape shared by all three algorithms.
pub fn swing_metrics_record(swings: &[SwingPoint], strategy_name: &str, params: Value) -> Value {
    let rallies: Vec<&SwingPoint> = swings.iter().filter(|s| s.is_rally).collect();
    let drops: Vec<&SwingPoint> = swings.iter().filter(|s| !s.is_rally).collect();

    if swings.is_empty() {
        return json!({
            "num_swings": 0,
            "rally_count": 0,
            "drop_count": 0,
            "amplitude_pct": Value::Null,
            "duration_bars": Value::Null,
            "speed_pct_per_bar": Value::Null,
            "rally_to_drop_ratio": Value::Null,
            "duration_symmetry": Value::Null,
            "strategy_name": strategy_name,
            "strategy_params": params,
        });
    }

    let rally_amps: Vec<f64> = rallies.iter().map(|s| s.amplitude_pct()).collect();
    let drop_amps: Vec<f64> = drops.iter().map(|s| s.amplitude_pct()).collect();
    let rally_durs: Vec<f64> = rallies.iter().map(|s| s.duration_bars() as f64).collect();
    let drop_durs: Vec<f64> = drops.iter().map(|s| s.duration_bars() as f64).collect();
    let rally_speeds: Vec<f64> = rallies.iter().map(|s| s.speed_pct_per_bar()).collect();
    let drop_speeds: Vec<f64> = drops.iter().map(|s| s.speed_pct_per_bar()).collect();

    let rally_to_drop_ratio = if !drop_amps.is_empty() && mean(&drop_amps) != 0.0 {
        Some(mean(&rally_amps).abs() / mean(&drop_amps).abs())
    } else {
        None
    };
    let duration_symmetry = if !rally_durs.is_empty() && !drop_durs.is_empty() {
        let total = mean(&rally_durs) + mean(&drop_durs);
        if total > 0.0 {
            Some(1.0 - (mean(&rally_durs) - mean(&drop_durs)).abs() / total)
        } else {
            None
        }
    } else {
        None
    };

    let rally_amp_stats = stat_or_null(&rally_amps);
    let drop_amp_stats = stat_or_null(&drop_amps);
    let rally_dur_stats = stat_or_null(&rally_durs);
    let drop_dur_stats = stat_or_null(&drop_durs);
    let rally_speed_stats = stat_or_null(&rally_speeds);
    let drop_speed_stats = stat_or_null(&drop_speeds);
    let field = |stats: &Value, key: &str| stats.get(key).cloned().unwrap_or(Value::Null);

    json!({
        "num_swings": swings.len(),
        "rally_count": rallies.len(),
        "drop_count": drops.len(),

        "avg_rally_pct": field(&rally_amp_stats, "avg"),
        "max_rally_pct": field(&rally_amp_stats, "max"),
        "min_rally_pct": field(&rally_amp_stats, "min"),
        "median_rally_pct": field(&rally_amp_stats, "median"),
        "std_rally_pct": field(&rally_amp_stats, "std"),
        "avg_drop_pct": field(&drop_amp_stats, "avg"),
        "max_drop_pct": field(&drop_amp_stats, "max"),
        "min_drop_pct": field(&drop_amp_stats, "min"),
        "median_drop_pct": field(&drop_amp_stats, "median"),
        "std_drop_pct": field(&drop_amp_stats, "std"),
        "rally_amplitude": rally_amp_stats,
        "drop_amplitude": drop_amp_stats,

        "avg_rally_duration_bars": field(&rally_dur_stats, "avg"),
        "max_rally_duration_bars": field(&rally_dur_stats, "max"),
        "avg_drop_duration_bars": field(&drop_dur_stats, "avg"),
        "max_drop_duration_bars": field(&drop_dur_stats, "max"),
        "rally_duration": rally_dur_stats,
        "drop_duration": drop_dur_stats,

        "avg_rally_speed_pct_per_bar": field(&rally_speed_stats, "avg"),
        "max_rally_speed_pct_per_bar": field(&rally_speed_stats, "max"),
        "avg_drop_speed_pct_per_bar": field(&drop_speed_stats, "avg"),
        "max_drop_speed_pct_per_bar": field(&drop_speed_stats, "max"),

        "rally_to_drop_ratio": rally_to_drop_ratio,
        "duration_symmetry": duration_symmetry,
        "strategy_name": strategy_name,
        "strategy_params": params,
    })
}

pub struct SwingStrategy {
    algorithm: SwingAlgorithm,
}

impl SwingStrategy {
    pub fn new(algorithm: SwingAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl AnalyticalStrategy for SwingStrategy {
    fn name(&self) -> &'static str {
        "swing"
    }

    fn calculate(&self, zone_data: &DataFrame, ctx: &AnalysisContext) -> Result<Value> {
        let swings = if ctx.swing_points.is_empty() {
            compute_swings(zone_data, self.algorithm)?
        } else {
            ctx.swing_points.clone()
        };
        if zone_data.column("high").is_err() || zone_data.column("low").is_err() {
            return Err(ZoneError::data("swing strategy requires open/high/low/close columns"));
        }
        Ok(swing_metrics_record(&swings, self.algorithm.name(), self.algorithm.params()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_df() -> DataFrame {
        let n = 40;
        let high: Vec<f64> = (0..n)
            .map(|i| 100.0 + (i as f64 / 5.0).sin() * 10.0 + i as f64 * 0.2)
            .collect();
        let low: Vec<f64> = high.iter().map(|h| h - 1.5).collect();
        df! { "high" => high, "low" => low }.unwrap()
    }

    #[test]
    fn no_swings_found_returns_zeroed_record() {
        let record = swing_metrics_record(&[], "zigzag", json!({}));
        assert_eq!(record["num_swings"], 0);
        assert!(record["amplitude_pct"].is_null());
    }

    #[test]
    fn peak_finding_detects_some_swings_on_trending_series() {
        let df = trending_df();
        let swings = compute_swings(
            &df,
            SwingAlgorithm::PeakFinding {
                prominence: Some(0.1),
                distance: 2,
                min_amplitude_pct: 0.0,
            },
        )
        .unwrap();
        assert!(!swings.is_empty());
    }

    #[test]
    fn strategy_requires_high_low_columns() {
        let df = df! { "close" => &[1.0, 2.0, 3.0] }.unwrap();
        let ctx = AnalysisContext::default();
        let strategy = SwingStrategy::new(SwingAlgorithm::ZigZag { legs: 1, deviation_pct: 1.0 });
        assert!(strategy.calculate(&df, &ctx).is_err());
    }
}
