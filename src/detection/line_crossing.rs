//! Line-crossing detection (§4.2c): MACD-line/signal-line style zones. A
//! bar is `bull` when `line1 > line2`, `bear` otherwise; `indicator_context`
//! carries both column names so downstream analytical strategies (e.g.
//! divergence) can recover which line is "primary" vs. "signal" without
//! hardcoding MACD.

use polars::prelude::*;

use super::{filter_by_min_duration, DetectionConfig, DetectionRules, DetectionStrategy};
use crate::error::{Result, ZoneError};
use crate::util::{column_to_f64, contiguous_runs, naive_datetime_at};
use crate::zone::{IndicatorContext, Zone, ZoneId};

pub struct LineCrossingStrategy;

fn classify(line1: &[f64], line2: &[f64]) -> Vec<String> {
    line1
        .iter()
        .zip(line2.iter())
        .map(|(&a, &b)| {
            if a.is_finite() && b.is_finite() && a > b {
                "bull".to_string()
            } else {
                "bear".to_string()
            }
        })
        .collect()
}

impl DetectionStrategy for LineCrossingStrategy {
    fn name(&self) -> &'static str {
        "line_crossing"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        &["bull", "bear"]
    }

    fn detect(&self, data: &DataFrame, config: &DetectionConfig) -> Result<Vec<Zone>> {
        let (line1_col, line2_col) = match &config.rules {
            DetectionRules::LineCrossing { line1_col, line2_col } => (line1_col, line2_col),
            _ => {
                return Err(ZoneError::config(
                    "LineCrossingStrategy requires DetectionRules::LineCrossing",
                ))
            }
        };

        let line1 = column_to_f64(data, line1_col)?;
        let line2 = column_to_f64(data, line2_col)?;
        if line1.len() != line2.len() {
            return Err(ZoneError::data("line1 and line2 columns have different lengths"));
        }
        let labels = classify(&line1, &line2);
        let runs = contiguous_runs(&labels);

        let mut zones = Vec::with_capacity(runs.len());
        for (seq, (start, end, zone_type)) in runs.into_iter().enumerate() {
            let slice = data.slice(start as i64, end - start + 1);
            let start_time = naive_datetime_at(data, "timestamp", start)
                .or_else(|_| naive_datetime_at(data, "date", start))?;
            let end_time = naive_datetime_at(data, "timestamp", end)
                .or_else(|_| naive_datetime_at(data, "date", end))?;
            let ctx = IndicatorContext::new()
                .with("detection_strategy", "line_crossing")
                .with("detection_indicator", line1_col.as_str())
                .with("signal_line", line2_col.as_str());
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
