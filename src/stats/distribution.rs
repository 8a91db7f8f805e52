//! Distribution summaries over the zone population (spec §4.5 "Distribution
//! summary"): counts by type, and `{min, p25, median, p75, max, mean, std}`
//! percentile summaries for duration, price return, and amplitude fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::{mean, percentile, std_dev};
use crate::zone::Zone;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PercentileSummary {
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl PercentileSummary {
    pub fn compute(values: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let mut sorted = finite.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Some(Self {
            min: sorted[0],
            p25: percentile(&sorted, 0.25),
            median: percentile(&sorted, 0.5),
            p75: percentile(&sorted, 0.75),
            max: *sorted.last().unwrap(),
            mean: mean(&finite),
            std: std_dev(&finite),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DistributionSummary {
    pub counts_by_type: BTreeMap<String, usize>,
    pub duration: Option<PercentileSummary>,
    pub price_return: Option<PercentileSummary>,
    pub hist_amplitude: Option<PercentileSummary>,
    pub legacy_amplitude_aliases: BTreeMap<String, PercentileSummary>,
}

fn field_values(zones: &[Zone], key: &str) -> Vec<f64> {
    zones.iter().filter_map(|z| z.features.get(key)?.as_f64()).collect()
}

pub fn compute_distribution_summary(zones: &[Zone]) -> DistributionSummary {
    let mut counts_by_type = BTreeMap::new();
    for zone in zones {
        *counts_by_type.entry(zone.zone_type.clone()).or_insert(0) += 1;
    }

    let durations: Vec<f64> = zones.iter().map(|z| z.duration() as f64).collect();
    let price_returns = field_values(zones, "price_return");
    let hist_amplitudes = field_values(zones, "hist_amplitude");

    let mut legacy_amplitude_aliases = BTreeMap::new();
    let mut alias_keys = std::collections::BTreeSet::new();
    for zone in zones {
        for key in zone.features.keys() {
            if key.ends_with("_amplitude") && key != "hist_amplitude" {
                alias_keys.insert(key.clone());
            }
        }
    }
    for key in alias_keys {
        let values: Vec<f64> = zones.iter().filter_map(|z| z.features.get(&key)?.as_f64()).collect();
        if let Some(summary) = PercentileSummary::compute(&values) {
            legacy_amplitude_aliases.insert(key, summary);
        }
    }

    DistributionSummary {
        counts_by_type,
        duration: PercentileSummary::compute(&durations),
        price_return: PercentileSummary::compute(&price_returns),
        hist_amplitude: PercentileSummary::compute(&hist_amplitudes),
        legacy_amplitude_aliases,
    }
}

pub fn summary_to_value(summary: &DistributionSummary) -> Value {
    serde_json::to_value(summary).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{IndicatorContext, ZoneId};
    use chrono::NaiveDate;
    use polars::prelude::*;

    fn t(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn zone_with_return(zone_type: &str, price_return: f64) -> Zone {
        let df = df! { "close" => &[1.0, 2.0] }.unwrap();
        let ctx = IndicatorContext::new();
        let mut zone = Zone::new(ZoneId::Int(0), zone_type, 0, 1, t(1), t(2), df, ctx).unwrap();
        zone.features.insert("price_return".to_string(), serde_json::json!(price_return));
        zone
    }

    #[test]
    fn counts_by_type_tally_correctly() {
        let zones = vec![zone_with_return("bull", 0.1), zone_with_return("bull", 0.2), zone_with_return("bear", -0.1)];
        let summary = compute_distribution_summary(&zones);
        assert_eq!(summary.counts_by_type["bull"], 2);
        assert_eq!(summary.counts_by_type["bear"], 1);
    }

    #[test]
    fn empty_population_yields_none_summaries() {
        let summary = compute_distribution_summary(&[]);
        assert!(summary.duration.is_none());
        assert!(summary.price_return.is_none());
    }
}
