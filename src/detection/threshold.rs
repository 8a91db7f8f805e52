//! Threshold-band detection (§4.2b): classic overbought/oversold zones for
//! bounded oscillators (RSI, stochastic). Three-way classification —
//! `overbought` above the upper band, `oversold` below the lower band,
//! `neutral` in between — with the same contiguous-run reduction as
//! zero-crossing.

use polars::prelude::*;

use super::{filter_by_min_duration, DetectionConfig, DetectionRules, DetectionStrategy};
use crate::error::{Result, ZoneError};
use crate::util::{column_to_f64, contiguous_runs, naive_datetime_at};
use crate::zone::{IndicatorContext, Zone, ZoneId};

pub struct ThresholdStrategy;

fn classify(values: &[f64], upper: f64, lower: f64) -> Vec<String> {
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                "neutral".to_string()
            } else if v >= upper {
                "overbought".to_string()
            } else if v <= lower {
                "oversold".to_string()
            } else {
                "neutral".to_string()
            }
        })
        .collect()
}

impl DetectionStrategy for ThresholdStrategy {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        &["overbought", "oversold", "neutral"]
    }

    fn detect(&self, data: &DataFrame, config: &DetectionConfig) -> Result<Vec<Zone>> {
        let (indicator_col, upper, lower) = match &config.rules {
            DetectionRules::Threshold {
                indicator_col,
                upper_threshold,
                lower_threshold,
            } => (indicator_col, *upper_threshold, *lower_threshold),
            _ => {
                return Err(ZoneError::config(
                    "ThresholdStrategy requires DetectionRules::Threshold",
                ))
            }
        };

        let values = column_to_f64(data, indicator_col)?;
        let labels = classify(&values, upper, lower);
        let runs = contiguous_runs(&labels);

        let mut zones = Vec::with_capacity(runs.len());
        for (seq, (start, end, zone_type)) in runs.into_iter().enumerate() {
            let slice = data.slice(start as i64, end - start + 1);
            let start_time = naive_datetime_at(data, "timestamp", start)
                .or_else(|_| naive_datetime_at(data, "date", start))?;
            let end_time = naive_datetime_at(data, "timestamp", end)
                .or_else(|_| naive_datetime_at(data, "date", end))?;
            let ctx = IndicatorContext::new()
                .with("detection_strategy", "threshold")
                .with("detection_indicator", indicator_col.as_str())
                .with("thresholds", serde_json::json!({ "upper": upper, "lower": lower }));
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(values: &[f64]) -> DataFrame {
        let dates: Vec<i32> = (0..values.len() as i32)
            .map(|i| {
                (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
                    .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
                    .num_days() as i32
            })
            .collect();
        let mut df = df! {
            "date" => dates,
            "rsi" => values,
        }
        .unwrap();
        df.try_apply("date", |s| s.cast(&DataType::Date)).unwrap();
        df
    }

    #[test]
    fn rsi_ramp_produces_oversold_neutral_overbought() {
        let values = vec![10.0, 15.0, 50.0, 55.0, 50.0, 85.0, 90.0];
        let df = bars(&values);
        let config = DetectionConfig::new(
            "threshold",
            DetectionRules::threshold("rsi", 70.0, 30.0).unwrap(),
        );
        let zones = ThresholdStrategy.detect(&df, &config).unwrap();
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[0].zone_type, "oversold");
        assert_eq!(zones[1].zone_type, "neutral");
        assert_eq!(zones[2].zone_type, "overbought");
    }

    #[test]
    fn zone_type_filter_keeps_only_requested_types() {
        let values = vec![10.0, 50.0, 90.0];
        let df = bars(&values);
        let config = DetectionConfig::new(
            "threshold",
            DetectionRules::threshold("rsi", 70.0, 30.0).unwrap(),
        )
        .with_zone_types(vec!["overbought".to_string()]);
        let zones = ThresholdStrategy.detect(&df, &config).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_type, "overbought");
    }
}
