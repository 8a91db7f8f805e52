//! Volatility regime analysis (§4.3.4): a small Bollinger computation over
//! the zone's `close`, combined with ATR (using the `atr` column when
//! present, else approximated from true range) into a composite score.

use polars::prelude::*;
use serde_json::{json, Value};

use super::{AnalysisContext, AnalyticalStrategy};
use crate::error::{Result, ZoneError};
use crate::util::{column_to_f64, mean, std_dev};

#[derive(Debug, Clone, Copy)]
pub struct VolatilityStrategy {
    pub bb_period: usize,
    pub bb_std_mult: f64,
    pub touch_threshold_pct: f64,
}

impl Default for VolatilityStrategy {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_std_mult: 2.0,
            touch_threshold_pct: 0.1,
        }
    }
}

fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());
    for i in 0..high.len() {
        let range = high[i] - low[i];
        let tr_i = if i == 0 {
            range
        } else {
            range
                .max((high[i] - close[i - 1]).abs())
                .max((low[i] - close[i - 1]).abs())
        };
        tr.push(tr_i);
    }
    tr
}

fn rolling_bands(close: &[f64], period: usize, std_mult: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = close.len();
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    let mut mid = vec![f64::NAN; n];
    for i in 0..n {
        if i + 1 < period {
            continue;
        }
        let window = &close[i + 1 - period..=i];
        let m = mean(window);
        let sd = std_dev(window);
        mid[i] = m;
        upper[i] = m + std_mult * sd;
        lower[i] = m - std_mult * sd;
    }
    (upper, mid, lower)
}

impl AnalyticalStrategy for VolatilityStrategy {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn calculate(&self, zone_data: &DataFrame, _ctx: &AnalysisContext) -> Result<Value> {
        let close = column_to_f64(zone_data, "close")?;
        let high = column_to_f64(zone_data, "high")?;
        let low = column_to_f64(zone_data, "low")?;
        if close.is_empty() {
            return Err(ZoneError::data("volatility strategy requires a non-empty close column"));
        }

        let period = self.bb_period.min(close.len()).max(1);
        let (upper, _mid, lower) = rolling_bands(&close, period, self.bb_std_mult);

        let widths: Vec<f64> = upper
            .iter()
            .zip(lower.iter())
            .zip(close.iter())
            .filter_map(|((u, l), c)| {
                if u.is_finite() && l.is_finite() && *c != 0.0 {
                    Some((u - l) / c * 100.0)
                } else {
                    None
                }
            })
            .collect();
        let bollinger_width_pct = if widths.is_empty() { 0.0 } else { mean(&widths) };
        let bollinger_width_std = std_dev(&widths);
        let bollinger_squeeze_ratio = if !widths.is_empty() && widths.len() > 1 {
            let current = *widths.last().unwrap();
            let historical_mean = mean(&widths);
            if historical_mean > 0.0 {
                current / historical_mean
            } else {
                1.0
            }
        } else {
            1.0
        };

        let mut upper_touches = 0usize;
        let mut lower_touches = 0usize;
        for i in 0..close.len() {
            if !upper[i].is_finite() {
                continue;
            }
            if (close[i] - upper[i]).abs() / upper[i].abs().max(1e-9) <= self.touch_threshold_pct / 100.0 {
                upper_touches += 1;
            }
            if (close[i] - lower[i]).abs() / lower[i].abs().max(1e-9) <= self.touch_threshold_pct / 100.0 {
                lower_touches += 1;
            }
        }

        let atr_series = if let Ok(atr) = column_to_f64(zone_data, "atr") {
            atr
        } else {
            let tr = true_range(&high, &low, &close);
            let atr_period = period.min(tr.len()).max(1);
            let mut atr = vec![f64::NAN; tr.len()];
            for i in 0..tr.len() {
                if i + 1 < atr_period {
                    continue;
                }
                atr[i] = mean(&tr[i + 1 - atr_period..=i]);
            }
            atr
        };
        let finite_atr: Vec<f64> = atr_series.iter().copied().filter(|v| v.is_finite()).collect();
        let avg_atr = if finite_atr.is_empty() { f64::NAN } else { mean(&finite_atr) };
        let atr_normalized_range = if avg_atr.is_finite() && mean(&close) != 0.0 {
            avg_atr / mean(&close) * 100.0
        } else {
            f64::NAN
        };
        let atr_trend = if finite_atr.len() >= 2 {
            let first = finite_atr[0];
            let last = *finite_atr.last().unwrap();
            if first.abs() > 1e-12 {
                let change = (last - first) / first;
                if change > 0.2 {
                    "increasing"
                } else if change < -0.2 {
                    "decreasing"
                } else {
                    "stable"
                }
            } else {
                "stable"
            }
        } else {
            "stable"
        };

        let bb_score = (bollinger_width_pct / 2.0).min(4.0);
        let atr_score = if atr_normalized_range.is_finite() { (atr_normalized_range / 1.0).min(4.0) } else { 0.0 };
        let touches_score = ((upper_touches + lower_touches) as f64 / close.len().max(1) as f64 * 10.0).min(2.0);
        let volatility_score = (bb_score + atr_score + touches_score).clamp(0.0, 10.0);
        let volatility_regime = if volatility_score < 2.5 {
            "low"
        } else if volatility_score < 5.0 {
            "medium"
        } else if volatility_score < 7.5 {
            "high"
        } else {
            "extreme"
        };

        Ok(json!({
            "bollinger_width_pct": bollinger_width_pct,
            "bollinger_width_std": bollinger_width_std,
            "bollinger_squeeze_ratio": bollinger_squeeze_ratio,
            "bollinger_upper_touches": upper_touches,
            "bollinger_lower_touches": lower_touches,
            "atr_normalized_range": if atr_normalized_range.is_finite() { json!(atr_normalized_range) } else { Value::Null },
            "atr_trend": atr_trend,
            "avg_atr": if avg_atr.is_finite() { json!(avg_atr) } else { Value::Null },
            "volatility_score": volatility_score,
            "volatility_regime": volatility_regime,
            "strategy_name": "volatility",
            "strategy_params": {
                "bb_period": self.bb_period,
                "bb_std_mult": self.bb_std_mult,
                "touch_threshold_pct": self.touch_threshold_pct,
            },
        }))
    }
}
