//! Volume confirmation analysis (§4.3.5): zone volume relative to a baseline,
//! entry-bar volume deviation, and a generic volume/indicator correlation.

use polars::prelude::*;
use serde_json::{json, Value};

use super::{AnalysisContext, AnalyticalStrategy};
use crate::error::{Result, ZoneError};
use crate::util::{column_to_f64, mean, pearson_correlation};

pub struct VolumeStrategy;

impl AnalyticalStrategy for VolumeStrategy {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn calculate(&self, zone_data: &DataFrame, ctx: &AnalysisContext) -> Result<Value> {
        let volume = column_to_f64(zone_data, "volume")
            .map_err(|_| ZoneError::data("volume strategy requires a 'volume' column"))?;

        let avg_volume_zone = mean(&volume);
        let volume_zone_ratio = ctx.baseline_volume.filter(|b| *b != 0.0).map(|b| avg_volume_zone / b);
        let volume_at_entry_change = ctx
            .baseline_volume
            .filter(|b| *b != 0.0)
            .and_then(|b| volume.first().map(|entry| (entry - b) / b * 100.0));

        let volume_indicator_corr = ctx
            .primary
            .as_deref()
            .and_then(|col| column_to_f64(zone_data, col).ok())
            .and_then(|indicator| pearson_correlation(&volume, &indicator));

        Ok(json!({
            "avg_volume_zone": avg_volume_zone,
            "volume_zone_ratio": volume_zone_ratio,
            "volume_at_entry_change": volume_at_entry_change,
            "volume_indicator_corr": volume_indicator_corr,
            "strategy_name": "volume",
            "strategy_params": {
                "baseline_volume": ctx.baseline_volume,
                "indicator_col": ctx.primary,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_volume_column_is_data_error() {
        let df = df! { "close" => &[1.0, 2.0] }.unwrap();
        let err = VolumeStrategy.calculate(&df, &AnalysisContext::default()).unwrap_err();
        assert!(matches!(err, ZoneError::Data(_)));
    }

    #[test]
    fn ratio_is_null_without_baseline() {
        let df = df! { "volume" => &[100.0, 200.0, 300.0] }.unwrap();
        let record = VolumeStrategy.calculate(&df, &AnalysisContext::default()).unwrap();
        assert!(record["volume_zone_ratio"].is_null());
        assert!(record["volume_at_entry_change"].is_null());
    }

    #[test]
    fn ratio_computed_against_baseline() {
        let df = df! { "volume" => &[200.0, 200.0] }.unwrap();
        let ctx = AnalysisContext {
            baseline_volume: Some(100.0),
            ..Default::default()
        };
        let record = VolumeStrategy.calculate(&df, &ctx).unwrap();
        assert_eq!(record["volume_zone_ratio"], 2.0);
        assert_eq!(record["volume_at_entry_change"], 100.0);
    }
}
