//! Zero-crossing detection (§4.2a): the classic oscillator zone rule.
//! `value > 0` bars become one zone type, `value < 0` another, `value == 0`
//! (exactly, pre-smoothing) is folded into whichever side the prior bar was
//! on so a flat tick never spuriously splits a run.

use polars::prelude::*;

use super::{filter_by_min_duration, DetectionConfig, DetectionRules, DetectionStrategy};
use crate::error::{Result, ZoneError};
use crate::util::{column_to_f64, contiguous_runs, naive_datetime_at};
use crate::zone::{IndicatorContext, Zone, ZoneId};

pub struct ZeroCrossingStrategy;

/// Simple moving average, used only as the optional pre-smoothing step.
fn smooth(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return values.to_vec();
    }
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let lo = i.saturating_sub(window - 1);
        let slice = &values[lo..=i];
        let finite: Vec<f64> = slice.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            out.push(f64::NAN);
        } else {
            out.push(finite.iter().sum::<f64>() / finite.len() as f64);
        }
    }
    out
}

fn classify(values: &[f64]) -> Vec<String> {
    let mut labels = Vec::with_capacity(values.len());
    let mut last = "bull".to_string();
    for &v in values {
        let label = if v.is_finite() {
            if v > 0.0 {
                "bull".to_string()
            } else if v < 0.0 {
                "bear".to_string()
            } else {
                last.clone()
            }
        } else {
            last.clone()
        };
        last = label.clone();
        labels.push(label);
    }
    labels
}

impl DetectionStrategy for ZeroCrossingStrategy {
    fn name(&self) -> &'static str {
        "zero_crossing"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        &["bull", "bear"]
    }

    fn detect(&self, data: &DataFrame, config: &DetectionConfig) -> Result<Vec<Zone>> {
        let (indicator_col, smooth_window) = match &config.rules {
            DetectionRules::ZeroCrossing {
                indicator_col,
                smooth_window,
            } => (indicator_col, *smooth_window),
            _ => {
                return Err(ZoneError::config(
                    "ZeroCrossingStrategy requires DetectionRules::ZeroCrossing",
                ))
            }
        };

        let raw = column_to_f64(data, indicator_col)?;
        let values = match smooth_window {
            Some(w) if w > 1 => smooth(&raw, w),
            _ => raw,
        };
        let labels = classify(&values);
        let runs = contiguous_runs(&labels);

        let mut zones = Vec::with_capacity(runs.len());
        for (seq, (start, end, zone_type)) in runs.into_iter().enumerate() {
            let slice = data.slice(start as i64, end - start + 1);
            let start_time = naive_datetime_at(data, "timestamp", start)
                .or_else(|_| naive_datetime_at(data, "date", start))?;
            let end_time = naive_datetime_at(data, "timestamp", end)
                .or_else(|_| naive_datetime_at(data, "date", end))?;
            let mut ctx = IndicatorContext::new()
                .with("detection_strategy", "zero_crossing")
                .with("detection_indicator", indicator_col.as_str());
            if let Some(w) = smooth_window {
                ctx = ctx.with("smooth_window", w as i64);
            }
            zones.push(Zone::new(
                ZoneId::Int(seq as i64),
                zone_type,
                start,
                end,
                start_time,
                end_time,
                slice,
                ctx,
            )?);
        }
        Ok(filter_by_min_duration(zones, config.min_duration)
            .into_iter()
            .filter(|z| config.keep_type(&z.zone_type))
            .collect())
    }
}
