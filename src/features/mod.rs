//! Feature extraction orchestrator (C4): turns a bare `Zone` plus the parent
//! series into `Zone.features`, by running basic primitives, universal
//! indicator metrics, and the configured analytical strategies in turn.

pub mod swing_context;

use polars::prelude::*;
use serde_json::{json, Map, Value};

use crate::analysis::{build_strategy, AnalysisContext};
use crate::error::Result;
use crate::util::{column_to_f64, pearson_correlation};
use crate::zone::Zone;
use swing_context::SwingContext;

/// Columns never treated as a generic fallback primary indicator (spec §4.4
/// step 2).
const EXCLUDED_FALLBACK_COLUMNS: &[&str] = &["open", "high", "low", "close", "volume", "atr", "date", "timestamp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingScope {
    PerZone,
    Global,
}

/// Which analytical strategies to run, by registry name; `None` disables
/// the family entirely (spec §4.6 `with_strategies`).
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractionConfig {
    pub swing: Option<String>,
    pub shape: Option<String>,
    pub divergence: Option<String>,
    pub volatility: Option<String>,
    pub volume: Option<String>,
    pub swing_scope: Option<SwingScope>,
    pub baseline_volume: Option<f64>,
}

impl FeatureExtractionConfig {
    pub fn swing_scope_or_default(&self) -> SwingScope {
        self.swing_scope.unwrap_or(SwingScope::PerZone)
    }
}

fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn local_extrema_count(values: &[f64], want_highs: bool) -> usize {
    if values.len() < 3 {
        return 0;
    }
    (1..values.len() - 1)
        .filter(|&i| {
            if want_highs {
                values[i] > values[i - 1] && values[i] >= values[i + 1]
            } else {
                values[i] < values[i - 1] && values[i] <= values[i + 1]
            }
        })
        .count()
}

/// Resolve `primary`/`signal` per spec §4.4 step 2. The fallback never
/// references a specific indicator name: it picks the first numeric,
/// non-excluded column.
fn resolve_primary_signal(zone: &Zone, data: &DataFrame) -> (Option<String>, Option<String>) {
    let primary = zone
        .primary_indicator_column()
        .filter(|col| data.column(col).is_ok())
        .map(str::to_string)
        .or_else(|| {
            data.get_column_names().into_iter().find_map(|name| {
                let name_str = name.to_string();
                if EXCLUDED_FALLBACK_COLUMNS.contains(&name_str.as_str()) {
                    return None;
                }
                let col = data.column(&name_str).ok()?;
                if is_numeric_dtype(col.dtype()) {
                    Some(name_str)
                } else {
                    None
                }
            })
        });
    let signal = zone
        .signal_line_column()
        .filter(|col| data.column(col).is_ok())
        .map(str::to_string);
    (primary, signal)
}

/// Populate `zone.features` in place. Analytical-strategy failures degrade
/// gracefully to `null` under `features.metadata.<name>` rather than
/// propagating (spec §4.4 step 7 / §7 `StrategyFailure`).
pub fn extract_zone_features(
    zone: &mut Zone,
    config: &FeatureExtractionConfig,
    swing_context: Option<&SwingContext>,
) -> Result<()> {
    let zone_data = zone.data.clone();
    let mut features = Map::new();

    let close = column_to_f64(&zone_data, "close")?;
    let duration = zone.duration();
    let start_price = *close.first().unwrap_or(&f64::NAN);
    let end_price = *close.last().unwrap_or(&f64::NAN);
    let price_return = if start_price != 0.0 && start_price.is_finite() {
        (end_price - start_price) / start_price
    } else {
        f64::NAN
    };
    let price_max = close.iter().cloned().fold(f64::MIN, f64::max);
    let price_min = close.iter().cloned().fold(f64::MAX, f64::min);
    let price_range_pct = if start_price != 0.0 && start_price.is_finite() {
        (price_max - price_min) / start_price.abs() * 100.0
    } else {
        f64::NAN
    };
    let num_peaks = local_extrema_count(&close, true);
    let num_troughs = local_extrema_count(&close, false);

    features.insert("duration".to_string(), json!(duration));
    features.insert("start_price".to_string(), json!(start_price));
    features.insert("end_price".to_string(), json!(end_price));
    features.insert("price_return".to_string(), json!(price_return));
    features.insert("price_range_pct".to_string(), json!(price_range_pct));
    features.insert("num_peaks".to_string(), json!(num_peaks));
    features.insert("num_troughs".to_string(), json!(num_troughs));

    let peak_idx = close
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i);
    let trough_idx = close
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i);
    let span = (close.len().saturating_sub(1)).max(1) as f64;

    if zone.zone_type == "bull" || zone.zone_type == "above" || zone.zone_type == "overbought" || zone.zone_type == "active" {
        let drawdown_from_peak = if let Some(pi) = peak_idx {
            let peak = close[pi];
            let after_peak_min = close[pi..].iter().cloned().fold(f64::MAX, f64::min);
            if peak != 0.0 { (after_peak_min - peak) / peak } else { f64::NAN }
        } else {
            f64::NAN
        };
        features.insert("drawdown_from_peak".to_string(), json!(drawdown_from_peak));
        features.insert(
            "peak_time_ratio".to_string(),
            json!(peak_idx.map(|i| i as f64 / span)),
        );
    } else {
        let rally_from_trough = if let Some(ti) = trough_idx {
            let trough = close[ti];
            let after_trough_max = close[ti..].iter().cloned().fold(f64::MIN, f64::max);
            if trough != 0.0 { (after_trough_max - trough) / trough } else { f64::NAN }
        } else {
            f64::NAN
        };
        features.insert("rally_from_trough".to_string(), json!(rally_from_trough));
        features.insert(
            "trough_time_ratio".to_string(),
            json!(trough_idx.map(|i| i as f64 / span)),
        );
    }

    let (primary, signal) = resolve_primary_signal(zone, &zone_data);
    if let Some(primary_col) = primary.clone() {
        if let Ok(primary_values) = column_to_f64(&zone_data, &primary_col) {
            let finite: Vec<f64> = primary_values.iter().copied().filter(|v| v.is_finite()).collect();
            if !finite.is_empty() {
                let hist_amplitude = finite.iter().cloned().fold(f64::MIN, f64::max)
                    - finite.iter().cloned().fold(f64::MAX, f64::min);
                let hist_slope = primary_values
                    .windows(2)
                    .filter_map(|w| if w[0].is_finite() && w[1].is_finite() { Some((w[1] - w[0]).abs()) } else { None })
                    .fold(0.0_f64, f64::max);
                let correlation_price_hist = pearson_correlation(&close, &primary_values);

                features.insert("hist_amplitude".to_string(), json!(hist_amplitude));
                features.insert("hist_slope".to_string(), json!(hist_slope));
                features.insert("correlation_price_hist".to_string(), json!(correlation_price_hist));

                // Legacy aliases: only populated when the detection strategy
                // explicitly flagged a legacy alias prefix in the context
                // (never inferred from the column name itself).
                if let Some(prefix) = zone.indicator_context.0.get("legacy_alias_prefix").and_then(Value::as_str) {
                    features.insert(format!("{prefix}_amplitude"), json!(hist_amplitude));
                    features.insert(format!("{prefix}_slope"), json!(hist_slope));
                }
            }
        }
    }

    let mut metadata = Map::new();
    let analysis_ctx = AnalysisContext {
        primary: primary.clone(),
        signal: signal.clone(),
        baseline_volume: config.baseline_volume,
        swing_points: match config.swing_scope_or_default() {
            SwingScope::Global => swing_context
                .map(|ctx| ctx.slice(zone.start_idx, zone.end_idx))
                .unwrap_or_default(),
            SwingScope::PerZone => Vec::new(),
        },
    };

    let strategy_selection: [(&str, &Option<String>); 5] = [
        ("swing_metrics", &config.swing),
        ("shape_metrics", &config.shape),
        ("divergence_metrics", &config.divergence),
        ("volatility_metrics", &config.volatility),
        ("volume_metrics", &config.volume),
    ];

    for (metadata_key, registry_name) in strategy_selection {
        let Some(name) = registry_name else { continue };
        let record = match build_strategy(name).and_then(|s| s.calculate(&zone_data, &analysis_ctx)) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("analytical strategy '{name}' failed for zone: {e}");
                Value::Null
            }
        };
        metadata.insert(metadata_key.to_string(), record);
    }
    features.insert("metadata".to_string(), Value::Object(metadata));

    zone.features = features;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{IndicatorContext, ZoneId};
    use chrono::NaiveDate;

    fn t(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn sample_zone() -> Zone {
        let df = df! {
            "close" => &[100.0, 105.0, 110.0, 108.0, 112.0],
            "high" => &[101.0, 106.0, 111.0, 109.0, 113.0],
            "low" => &[99.0, 104.0, 109.0, 107.0, 111.0],
            "osc" => &[0.1, 0.3, 0.5, 0.2, 0.6],
        }
        .unwrap();
        let ctx = IndicatorContext::new()
            .with("detection_strategy", "zero_crossing")
            .with("detection_indicator", "osc");
        Zone::new(ZoneId::Int(0), "bull", 0, 4, t(1), t(5), df, ctx).unwrap()
    }

    #[test]
    fn basic_primitives_are_populated() {
        let mut zone = sample_zone();
        let config = FeatureExtractionConfig::default();
        extract_zone_features(&mut zone, &config, None).unwrap();
        assert_eq!(zone.features["duration"], 5);
        assert!(zone.features["price_return"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn hist_amplitude_is_nonnegative_when_primary_resolves() {
        let mut zone = sample_zone();
        let config = FeatureExtractionConfig::default();
        extract_zone_features(&mut zone, &config, None).unwrap();
        assert!(zone.features["hist_amplitude"].as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn shape_strategy_echoes_generic_column_name() {
        let mut zone = sample_zone();
        let config = FeatureExtractionConfig {
            shape: Some("shape".to_string()),
            ..Default::default()
        };
        extract_zone_features(&mut zone, &config, None).unwrap();
        assert_eq!(
            zone.features["metadata"]["shape_metrics"]["strategy_params"]["indicator_col"],
            "osc"
        );
    }

    #[test]
    fn fallback_primary_never_hardcodes_an_indicator_name() {
        let df = df! {
            "close" => &[100.0, 101.0, 102.0],
            "high" => &[101.0, 102.0, 103.0],
            "low" => &[99.0, 100.0, 101.0],
            "WHATEVER_42" => &[0.1, 0.2, 0.3],
        }
        .unwrap();
        let ctx = IndicatorContext::new();
        let mut zone = Zone::new(ZoneId::Int(0), "bull", 0, 2, t(1), t(3), df, ctx).unwrap();
        let config = FeatureExtractionConfig {
            shape: Some("shape".to_string()),
            ..Default::default()
        };
        extract_zone_features(&mut zone, &config, None).unwrap();
        assert_eq!(
            zone.features["metadata"]["shape_metrics"]["strategy_params"]["indicator_col"],
            "WHATEVER_42"
        );
    }
}
