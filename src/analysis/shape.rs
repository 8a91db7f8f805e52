//! Histogram shape analysis (§4.3.2): the third/fourth standardized moments
//! of the primary indicator's values over a zone, plus a smoothness measure.

use polars::prelude::*;
use serde_json::{json, Value};

use super::{AnalysisContext, AnalyticalStrategy};
use crate::error::{Result, ZoneError};
use crate::util::column_to_f64;

#[derive(Debug, Clone, Copy)]
pub struct ShapeStrategy {
    pub calculate_smoothness: bool,
    pub bias_correction: bool,
}

impl Default for ShapeStrategy {
    fn default() -> Self {
        Self {
            calculate_smoothness: true,
            bias_correction: false,
        }
    }
}

/// Third standardized moment. `None` for constant or near-empty series.
fn skewness(values: &[f64], bias_correction: bool) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    if variance <= 0.0 {
        return Some(0.0);
    }
    let std = variance.sqrt();
    let m3 = values.iter().map(|v| ((v - mean) / std).powi(3)).sum::<f64>() / n as f64;
    if bias_correction {
        let nf = n as f64;
        Some((nf * nf / ((nf - 1.0) * (nf - 2.0))) * m3)
    } else {
        Some(m3)
    }
}

/// Fourth standardized moment, reported as *absolute* kurtosis (excess + 3)
/// per convention (spec §9 numerical semantics).
fn kurtosis(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    if variance <= 0.0 {
        return Some(3.0);
    }
    let std = variance.sqrt();
    let m4 = values.iter().map(|v| ((v - mean) / std).powi(4)).sum::<f64>() / n as f64;
    Some(m4)
}

fn smoothness(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let diffs: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let mean_abs_diff = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let mean_abs_value = values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64;
    if mean_abs_value <= 0.0 {
        return None;
    }
    Some((1.0 - mean_abs_diff / mean_abs_value).clamp(0.0, 1.0))
}

impl AnalyticalStrategy for ShapeStrategy {
    fn name(&self) -> &'static str {
        "shape"
    }

    fn calculate(&self, zone_data: &DataFrame, ctx: &AnalysisContext) -> Result<Value> {
        let Some(primary) = ctx.primary.as_deref() else {
            return Err(ZoneError::data("shape strategy requires a resolved primary column"));
        };
        let values: Vec<f64> = column_to_f64(zone_data, primary)?
            .into_iter()
            .filter(|v| v.is_finite())
            .collect();

        let skew = skewness(&values, self.bias_correction);
        let kurt = kurtosis(&values);
        let smooth = if self.calculate_smoothness { smoothness(&values) } else { None };

        Ok(json!({
            "hist_skewness": skew,
            "hist_kurtosis": kurt,
            "hist_smoothness": smooth,
            "strategy_name": "shape",
            "strategy_params": {
                "indicator_col": primary,
                "calculate_smoothness": self.calculate_smoothness,
                "bias_correction": self.bias_correction,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_series_is_zero_skew_three_kurtosis() {
        let values = vec![5.0; 10];
        assert_eq!(skewness(&values, false), Some(0.0));
        assert_eq!(kurtosis(&values), Some(3.0));
    }

    #[test]
    fn fewer_than_three_points_returns_null_moments() {
        assert_eq!(skewness(&[1.0, 2.0], false), None);
        assert_eq!(kurtosis(&[1.0, 2.0]), None);
    }

    #[test]
    fn strategy_params_echo_indicator_column_generically() {
        let df = df! { "WHATEVER_42" => &[1.0, 2.0, 3.0, 2.0, 1.0] }.unwrap();
        let ctx = AnalysisContext {
            primary: Some("WHATEVER_42".to_string()),
            ..Default::default()
        };
        let record = ShapeStrategy::default().calculate(&df, &ctx).unwrap();
        assert_eq!(record["strategy_params"]["indicator_col"], "WHATEVER_42");
    }
}
