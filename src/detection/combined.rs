//! Combined-rules detection (§4.2e): an ordered list of boolean conditions
//! reduced by AND/OR into a single per-bar mask; contiguous true-runs become
//! zones of a single synthetic `active` type, false-runs are not zones at
//! all. Unlike the other four strategies, its configuration may be
//! non-cacheable — see [`DetectionRules::is_cacheable`] — when any condition
//! is a [`super::conditions::Condition::Raw`] closure.

use polars::prelude::*;

use super::{filter_by_min_duration, CombineLogic, DetectionConfig, DetectionRules, DetectionStrategy};
use crate::error::{Result, ZoneError};
use crate::util::{contiguous_runs, naive_datetime_at};
use crate::zone::{IndicatorContext, Zone, ZoneId};

pub struct CombinedStrategy;

fn reduce_masks(masks: &[Vec<bool>], n: usize, logic: CombineLogic) -> Vec<bool> {
    if masks.is_empty() {
        return vec![false; n];
    }
    (0..n)
        .map(|i| match logic {
            CombineLogic::And => masks.iter().all(|m| m[i]),
            CombineLogic::Or => masks.iter().any(|m| m[i]),
        })
        .collect()
}

impl DetectionStrategy for CombinedStrategy {
    fn name(&self) -> &'static str {
        "combined"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        &["active"]
    }

    fn detect(&self, data: &DataFrame, config: &DetectionConfig) -> Result<Vec<Zone>> {
        let (conditions, logic) = match &config.rules {
            DetectionRules::Combined { conditions, logic } => (conditions, *logic),
            _ => {
                return Err(ZoneError::config(
                    "CombinedStrategy requires DetectionRules::Combined",
                ))
            }
        };
        if conditions.is_empty() {
            return Err(ZoneError::config("combined strategy requires at least one condition"));
        }

        let n = data.height();
        let mut masks = Vec::with_capacity(conditions.len());
        for cond in conditions {
            let mask = cond.evaluate(data)?;
            if mask.len() != n {
                return Err(ZoneError::strategy(
                    "combined",
                    format!("condition produced {} values, expected {n}", mask.len()),
                ));
            }
            masks.push(mask);
        }
        let combined_mask = reduce_masks(&masks, n, logic);
        let labels: Vec<String> = combined_mask
            .iter()
            .map(|&active| if active { "active".to_string() } else { "inactive".to_string() })
            .collect();
        // Only contiguous true-runs become zones (spec §4.2e); `inactive`
        // gaps between them are not part of the vocabulary.
        let runs: Vec<_> = contiguous_runs(&labels)
            .into_iter()
            .filter(|(_, _, label)| label == "active")
            .collect();

        let mut zones = Vec::with_capacity(runs.len());
        for (seq, (start, end, zone_type)) in runs.into_iter().enumerate() {
            let slice = data.slice(start as i64, end - start + 1);
            let start_time = naive_datetime_at(data, "timestamp", start)
                .or_else(|_| naive_datetime_at(data, "date", start))?;
            let end_time = naive_datetime_at(data, "timestamp", end)
                .or_else(|_| naive_datetime_at(data, "date", end))?;
            let ctx = IndicatorContext::new()
                .with("detection_strategy", "combined")
                .with("detection_indicator", "combined")
                .with("logic", serde_json::to_value(logic).unwrap_or(serde_json::Value::Null))
                .with("num_conditions", conditions.len() as i64)
                .with("detection_rules", config.rules.to_echo())
                .with("cacheable", config.rules.is_cacheable());
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
    use super::super::conditions::Condition;
    use super::*;
    use chrono::NaiveDate;

    fn bars(rsi: &[f64]) -> DataFrame {
        let dates: Vec<i32> = (0..rsi.len() as i32)
            .map(|i| {
                (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
                    .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
                    .num_days() as i32
            })
            .collect();
        let mut df = df! { "date" => dates, "rsi" => rsi }.unwrap();
        df.try_apply("date", |s| s.cast(&DataType::Date)).unwrap();
        df
    }

    #[test]
    fn single_condition_matches_raw_mask() {
        let rsi = vec![10.0, 20.0, 80.0, 90.0, 40.0];
        let df = bars(&rsi);
        // A raw mask, not a computed RSI indicator (that needs >= 14 bars):
        // true exactly where the fixture values exceed 70.
        let mask: Vec<bool> = rsi.iter().map(|&v| v > 70.0).collect();
        let conditions = vec![Condition::Raw(Box::new(move |_: &DataFrame| Ok(mask.clone())))];
        let config = DetectionConfig::new(
            "combined",
            DetectionRules::combined(conditions, CombineLogic::And),
        );
        let zones = CombinedStrategy.detect(&df, &config).unwrap();
        // Only the true-run (indices 2..3) becomes a zone; the surrounding
        // false-runs are not zones at all.
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_type, "active");
        assert_eq!(zones[0].start_idx, 2);
        assert_eq!(zones[0].end_idx, 3);
    }

    #[test]
    fn empty_conditions_is_config_error() {
        let df = bars(&[10.0, 20.0]);
        let config = DetectionConfig::new("combined", DetectionRules::combined(vec![], CombineLogic::And));
        let err = CombinedStrategy.detect(&df, &config).unwrap_err();
        assert!(matches!(err, ZoneError::Config(_)));
    }

    #[test]
    fn raw_condition_zone_context_marks_uncacheable() {
        let df = bars(&[10.0, 90.0]);
        let conditions = vec![Condition::Raw(Box::new(|d: &DataFrame| Ok(vec![true; d.height()])))];
        let config = DetectionConfig::new(
            "combined",
            DetectionRules::combined(conditions, CombineLogic::Or),
        );
        let zones = CombinedStrategy.detect(&df, &config).unwrap();
        assert_eq!(
            zones[0].indicator_context.0.get("cacheable").and_then(|v| v.as_bool()),
            Some(false)
        );
    }
}
