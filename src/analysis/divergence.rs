//! Price/indicator divergence analysis (§4.3.3): match price extrema against
//! indicator extrema by nearest timestamp and classify regular/hidden/mixed
//! divergence.

use polars::prelude::*;
use serde_json::{json, Value};

use super::{AnalysisContext, AnalyticalStrategy};
use crate::error::Result;
use crate::util::column_to_f64;

#[derive(Debug, Clone, Copy)]
pub struct DivergenceStrategy {
    pub min_peak_distance: usize,
    pub match_tolerance_bars: usize,
    pub min_divergence_strength: f64,
}

impl Default for DivergenceStrategy {
    fn default() -> Self {
        Self {
            min_peak_distance: 3,
            match_tolerance_bars: 10,
            min_divergence_strength: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Extremum {
    idx: usize,
    value: f64,
    is_high: bool,
}

fn find_extrema(values: &[f64], min_distance: usize, want_highs: bool) -> Vec<Extremum> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut last_idx: Option<usize> = None;
    for i in 1..n - 1 {
        if let Some(li) = last_idx {
            if i - li < min_distance.max(1) {
                continue;
            }
        }
        let is_extremum = if want_highs {
            values[i] > values[i - 1] && values[i] >= values[i + 1]
        } else {
            values[i] < values[i - 1] && values[i] <= values[i + 1]
        };
        if is_extremum {
            out.push(Extremum {
                idx: i,
                value: values[i],
                is_high: want_highs,
            });
            last_idx = Some(i);
        }
    }
    out
}

fn normalized_slope(a: &Extremum, b: &Extremum) -> f64 {
    let span = (b.idx as f64 - a.idx as f64).max(1.0);
    let base = a.value.abs().max(1e-9);
    (b.value - a.value) / base / span
}

impl AnalyticalStrategy for DivergenceStrategy {
    fn name(&self) -> &'static str {
        "divergence"
    }

    fn calculate(&self, zone_data: &DataFrame, ctx: &AnalysisContext) -> Result<Value> {
        let params = json!({
            "indicator_col": ctx.primary,
            "indicator_line_col": ctx.signal,
            "min_peak_distance": self.min_peak_distance,
            "min_divergence_strength": self.min_divergence_strength,
        });
        let empty = || {
            json!({
                "divergence_type": "none",
                "divergence_count": 0,
                "divergence_strength": Value::Null,
                "divergence_direction": "none",
                "strategy_name": "divergence",
                "strategy_params": params.clone(),
            })
        };

        if zone_data.height() < 10 {
            return Ok(empty());
        }
        let Some(primary) = ctx.primary.as_deref() else {
            return Ok(empty());
        };
        let high = column_to_f64(zone_data, "high").unwrap_or_default();
        let low = column_to_f64(zone_data, "low").unwrap_or_default();
        let neg_low: Vec<f64> = low.iter().map(|v| -v).collect();
        let indicator_col = ctx.signal.as_deref().unwrap_or(primary);
        let indicator = column_to_f64(zone_data, indicator_col).unwrap_or_default();

        let price_highs = find_extrema(&high, self.min_peak_distance, true);
        let price_lows = find_extrema(&neg_low, self.min_peak_distance, false);
        let ind_highs = find_extrema(&indicator, self.min_peak_distance, true);
        let ind_lows = find_extrema(&indicator, self.min_peak_distance, false);

        if (price_highs.is_empty() && price_lows.is_empty()) || (ind_highs.is_empty() && ind_lows.is_empty()) {
            return Ok(empty());
        }

        // Regular divergence signals a reversal (price extreme extends, indicator
        // doesn't); hidden divergence signals trend continuation (indicator
        // extends, price doesn't). Both are scored the same way, just with the
        // higher/lower-high or higher/lower-low roles swapped between price and
        // indicator.
        let mut bearish_regular = Vec::new();
        let mut bearish_hidden = Vec::new();
        let mut bullish_regular = Vec::new();
        let mut bullish_hidden = Vec::new();

        for pair in price_highs.windows(2) {
            let (p0, p1) = (pair[0], pair[1]);
            let matched: Vec<&Extremum> = ind_highs
                .iter()
                .filter(|e| (e.idx as i64 - p1.idx as i64).unsigned_abs() as usize <= self.match_tolerance_bars)
                .collect();
            let Some(m0) = ind_highs.iter().find(|e| (e.idx as i64 - p0.idx as i64).unsigned_abs() as usize <= self.match_tolerance_bars) else {
                continue;
            };
            let Some(m1) = matched.first() else {
                continue;
            };
            let strength = normalized_slope(&p0, &p1).abs() * normalized_slope(m0, m1).abs();
            if strength < self.min_divergence_strength {
                continue;
            }
            if p1.value > p0.value && m1.value < m0.value {
                bearish_regular.push(strength);
            } else if p1.value <= p0.value && m1.value > m0.value {
                bearish_hidden.push(strength);
            }
        }

        for pair in price_lows.windows(2) {
            let (p0, p1) = (pair[0], pair[1]);
            let matched: Vec<&Extremum> = ind_lows
                .iter()
                .filter(|e| (e.idx as i64 - p1.idx as i64).unsigned_abs() as usize <= self.match_tolerance_bars)
                .collect();
            let Some(m0) = ind_lows.iter().find(|e| (e.idx as i64 - p0.idx as i64).unsigned_abs() as usize <= self.match_tolerance_bars) else {
                continue;
            };
            let Some(m1) = matched.first() else {
                continue;
            };
            let strength = normalized_slope(&p0, &p1).abs() * normalized_slope(m0, m1).abs();
            if strength < self.min_divergence_strength {
                continue;
            }
            if p1.value < p0.value && m1.value > m0.value {
                bullish_regular.push(strength);
            } else if p1.value >= p0.value && m1.value < m0.value {
                bullish_hidden.push(strength);
            }
        }

        let count = bearish_regular.len() + bearish_hidden.len() + bullish_regular.len() + bullish_hidden.len();
        if count == 0 {
            return Ok(empty());
        }
        let all_strengths: Vec<f64> = bearish_regular
            .iter()
            .chain(bearish_hidden.iter())
            .chain(bullish_regular.iter())
            .chain(bullish_hidden.iter())
            .copied()
            .collect();
        let avg_strength = all_strengths.iter().sum::<f64>() / all_strengths.len() as f64;

        let bullish_count = bullish_regular.len() + bullish_hidden.len();
        let bearish_count = bearish_regular.len() + bearish_hidden.len();
        let direction = match (bullish_count, bearish_count) {
            (b, s) if b > s => "bullish",
            (b, s) if s > b => "bearish",
            _ => "none",
        };
        let has_regular = !bearish_regular.is_empty() || !bullish_regular.is_empty();
        let has_hidden = !bearish_hidden.is_empty() || !bullish_hidden.is_empty();
        let divergence_type = match (has_regular, has_hidden) {
            (true, true) => "mixed",
            (true, false) => "regular",
            (false, true) => "hidden",
            (false, false) => "none",
        };

        Ok(json!({
            "divergence_type": divergence_type,
            "divergence_count": count,
            "divergence_strength": avg_strength,
            "divergence_direction": direction,
            "strategy_name": "divergence",
            "strategy_params": params,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_zone_returns_empty_record() {
        let df = df! { "high" => &[1.0, 2.0, 3.0], "low" => &[0.5, 1.5, 2.5], "osc" => &[1.0, 2.0, 3.0] }.unwrap();
        let ctx = AnalysisContext {
            primary: Some("osc".to_string()),
            ..Default::default()
        };
        let record = DivergenceStrategy::default().calculate(&df, &ctx).unwrap();
        assert_eq!(record["divergence_type"], "none");
        assert_eq!(record["divergence_count"], 0);
    }

    #[test]
    fn lower_price_high_with_higher_indicator_high_is_hidden_bearish() {
        let high = vec![
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 5.5, 5.0, 4.0, 3.0, 2.0,
        ];
        let low: Vec<f64> = high.iter().map(|v| v - 1.0).collect();
        let ind = vec![
            1.0, 3.0, 5.0, 7.0, 9.0, 10.0, 9.0, 7.0, 5.0, 3.0, 1.0, 3.0, 5.0, 7.0, 9.0, 15.0, 9.0, 7.0, 5.0, 3.0,
        ];
        let df = df! { "high" => high, "low" => low, "ind" => ind }.unwrap();
        let ctx = AnalysisContext {
            primary: Some("ind".to_string()),
            ..Default::default()
        };
        let record = DivergenceStrategy::default().calculate(&df, &ctx).unwrap();
        assert_eq!(record["divergence_type"], "hidden");
        assert_eq!(record["divergence_direction"], "bearish");
    }

    #[test]
    fn no_primary_column_returns_empty_record() {
        let n = 20;
        let high = vec![1.0; n];
        let low = vec![0.5; n];
        let df = df! { "high" => high, "low" => low }.unwrap();
        let ctx = AnalysisContext::default();
        let record = DivergenceStrategy::default().calculate(&df, &ctx).unwrap();
        assert_eq!(record["divergence_type"], "none");
    }
}
