//! Condition predicates for the `combined` detection strategy (C2e).
//!
//! Grounded on the teacher's `signals/` subsystem: `SignalSpec` and
//! `SignalFn`/`build_signal`/`SIGNAL_CATALOG` become, renamed and trimmed to
//! the conditions a zone-detection pass needs, `ConditionSpec` and
//! `ConditionFn`/`build_condition`/`CONDITION_CATALOG`. Each condition
//! produces a boolean mask over the full series; `combined.rs` reduces the
//! list of masks by the configured `AND`/`OR` logic.

use polars::prelude::*;
use rust_ti::standard_indicators::bulk as sti;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZoneError};
use crate::util::{column_to_f64, pad_series};

/// A boolean condition evaluated against an OHLCV(+indicator) frame.
pub trait ConditionFn: Send + Sync {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>>;
    fn name(&self) -> &str;
}

fn compare_padded(values: &[f64], n: usize, predicate: impl Fn(f64) -> bool) -> Vec<bool> {
    pad_series(values, n)
        .into_iter()
        .map(|v| v.is_finite() && predicate(v))
        .collect()
}

/// Serializable condition specification. `build_condition` turns one into a
/// concrete `Box<dyn ConditionFn>`. Plain data — this is what keeps a
/// `combined` detection config cacheable (see `detection::combined`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum ConditionSpec {
    RsiAbove { column: String, threshold: f64 },
    RsiBelow { column: String, threshold: f64 },
    MacdBullish { column: String },
    MacdBearish { column: String },
    PriceAboveSma { column: String, period: usize },
    PriceBelowSma { column: String, period: usize },
    SmaCrossover {
        column: String,
        fast_period: usize,
        slow_period: usize,
    },
    BollingerUpperTouch { column: String, period: usize },
    BollingerLowerTouch { column: String, period: usize },
    AtrAbove {
        close_col: String,
        high_col: String,
        low_col: String,
        period: usize,
        threshold: f64,
    },
    GapUp {
        open_col: String,
        close_col: String,
        threshold_pct: f64,
    },
    GapDown {
        open_col: String,
        close_col: String,
        threshold_pct: f64,
    },
    ConsecutiveUp { column: String, count: usize },
    ConsecutiveDown { column: String, count: usize },
}

struct RsiAbove {
    column: String,
    threshold: f64,
}
impl ConditionFn for RsiAbove {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < 14 {
            return Ok(vec![false; n]);
        }
        let rsi = sti::rsi(&prices);
        Ok(compare_padded(&rsi, n, |v| v > self.threshold))
    }
    fn name(&self) -> &str {
        "rsi_above"
    }
}

struct RsiBelow {
    column: String,
    threshold: f64,
}
impl ConditionFn for RsiBelow {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < 14 {
            return Ok(vec![false; n]);
        }
        let rsi = sti::rsi(&prices);
        Ok(compare_padded(&rsi, n, |v| v < self.threshold))
    }
    fn name(&self) -> &str {
        "rsi_below"
    }
}

fn macd_histogram(prices: &[f64]) -> Vec<f64> {
    sti::macd(prices).iter().map(|t| t.2).collect()
}

struct MacdBullish {
    column: String,
}
impl ConditionFn for MacdBullish {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < 34 {
            return Ok(vec![false; n]);
        }
        let hist = macd_histogram(&prices);
        Ok(compare_padded(&hist, n, |v| v > 0.0))
    }
    fn name(&self) -> &str {
        "macd_bullish"
    }
}

struct MacdBearish {
    column: String,
}
impl ConditionFn for MacdBearish {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < 34 {
            return Ok(vec![false; n]);
        }
        let hist = macd_histogram(&prices);
        Ok(compare_padded(&hist, n, |v| v < 0.0))
    }
    fn name(&self) -> &str {
        "macd_bearish"
    }
}

struct PriceAboveSma {
    column: String,
    period: usize,
}
impl ConditionFn for PriceAboveSma {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < self.period {
            return Ok(vec![false; n]);
        }
        let sma = pad_series(&sti::simple_moving_average(&prices, self.period), n);
        Ok(prices
            .iter()
            .zip(sma.iter())
            .map(|(&p, &s)| s.is_finite() && p > s)
            .collect())
    }
    fn name(&self) -> &str {
        "price_above_sma"
    }
}

struct PriceBelowSma {
    column: String,
    period: usize,
}
impl ConditionFn for PriceBelowSma {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < self.period {
            return Ok(vec![false; n]);
        }
        let sma = pad_series(&sti::simple_moving_average(&prices, self.period), n);
        Ok(prices
            .iter()
            .zip(sma.iter())
            .map(|(&p, &s)| s.is_finite() && p < s)
            .collect())
    }
    fn name(&self) -> &str {
        "price_below_sma"
    }
}

struct SmaCrossover {
    column: String,
    fast_period: usize,
    slow_period: usize,
}
impl ConditionFn for SmaCrossover {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < self.slow_period.max(self.fast_period) {
            return Ok(vec![false; n]);
        }
        let fast = pad_series(&sti::simple_moving_average(&prices, self.fast_period), n);
        let slow = pad_series(&sti::simple_moving_average(&prices, self.slow_period), n);
        let mut out = vec![false; n];
        for i in 1..n {
            if fast[i].is_finite() && slow[i].is_finite() && fast[i - 1].is_finite() && slow[i - 1].is_finite() {
                out[i] = fast[i] > slow[i] && fast[i - 1] <= slow[i - 1];
            }
        }
        Ok(out)
    }
    fn name(&self) -> &str {
        "sma_crossover"
    }
}

fn bollinger_bands(prices: &[f64], period: usize) -> (Vec<f64>, Vec<f64>) {
    let bands = rust_ti::candle_indicators::bulk::moving_constant_bands(
        prices,
        rust_ti::ConstantModelType::SimpleMovingAverage,
        rust_ti::DeviationModel::StandardDeviation,
        2.0,
        period,
    );
    let lower: Vec<f64> = bands.iter().map(|t| t.0).collect();
    let upper: Vec<f64> = bands.iter().map(|t| t.2).collect();
    (lower, upper)
}

struct BollingerUpperTouch {
    column: String,
    period: usize,
}
impl ConditionFn for BollingerUpperTouch {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < self.period {
            return Ok(vec![false; n]);
        }
        let (_, upper) = bollinger_bands(&prices, self.period);
        let upper = pad_series(&upper, n);
        Ok(prices
            .iter()
            .zip(upper.iter())
            .map(|(&p, &u)| u.is_finite() && p >= u)
            .collect())
    }
    fn name(&self) -> &str {
        "bollinger_upper_touch"
    }
}

struct BollingerLowerTouch {
    column: String,
    period: usize,
}
impl ConditionFn for BollingerLowerTouch {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        let n = prices.len();
        if n < self.period {
            return Ok(vec![false; n]);
        }
        let (lower, _) = bollinger_bands(&prices, self.period);
        let lower = pad_series(&lower, n);
        Ok(prices
            .iter()
            .zip(lower.iter())
            .map(|(&p, &l)| l.is_finite() && p <= l)
            .collect())
    }
    fn name(&self) -> &str {
        "bollinger_lower_touch"
    }
}

struct AtrAbove {
    close_col: String,
    high_col: String,
    low_col: String,
    period: usize,
    threshold: f64,
}
impl ConditionFn for AtrAbove {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let close = column_to_f64(df, &self.close_col)?;
        let high = column_to_f64(df, &self.high_col)?;
        let low = column_to_f64(df, &self.low_col)?;
        let n = close.len();
        if n < self.period {
            return Ok(vec![false; n]);
        }
        let atr: Vec<f64> = (0..=n - self.period)
            .map(|i| {
                let end = i + self.period;
                rust_ti::other_indicators::single::average_true_range(
                    &close[i..end],
                    &high[i..end],
                    &low[i..end],
                    rust_ti::ConstantModelType::SimpleMovingAverage,
                )
            })
            .collect();
        let atr = pad_series(&atr, n);
        Ok(compare_padded(&atr, n, |v| v > self.threshold))
    }
    fn name(&self) -> &str {
        "atr_above"
    }
}

struct GapUp {
    open_col: String,
    close_col: String,
    threshold_pct: f64,
}
impl ConditionFn for GapUp {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let open = column_to_f64(df, &self.open_col)?;
        let close = column_to_f64(df, &self.close_col)?;
        let n = open.len();
        let mut out = vec![false; n];
        for i in 1..n {
            if close[i - 1] > 0.0 {
                let gap_pct = (open[i] - close[i - 1]) / close[i - 1] * 100.0;
                out[i] = gap_pct > self.threshold_pct;
            }
        }
        Ok(out)
    }
    fn name(&self) -> &str {
        "gap_up"
    }
}

struct GapDown {
    open_col: String,
    close_col: String,
    threshold_pct: f64,
}
impl ConditionFn for GapDown {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let open = column_to_f64(df, &self.open_col)?;
        let close = column_to_f64(df, &self.close_col)?;
        let n = open.len();
        let mut out = vec![false; n];
        for i in 1..n {
            if close[i - 1] > 0.0 {
                let gap_pct = (open[i] - close[i - 1]) / close[i - 1] * 100.0;
                out[i] = gap_pct < -self.threshold_pct;
            }
        }
        Ok(out)
    }
    fn name(&self) -> &str {
        "gap_down"
    }
}

struct ConsecutiveUp {
    column: String,
    count: usize,
}
impl ConditionFn for ConsecutiveUp {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        Ok(consecutive_runs(&prices, self.count, |a, b| b > a))
    }
    fn name(&self) -> &str {
        "consecutive_up"
    }
}

struct ConsecutiveDown {
    column: String,
    count: usize,
}
impl ConditionFn for ConsecutiveDown {
    fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        let prices = column_to_f64(df, &self.column)?;
        Ok(consecutive_runs(&prices, self.count, |a, b| b < a))
    }
    fn name(&self) -> &str {
        "consecutive_down"
    }
}

fn consecutive_runs(prices: &[f64], count: usize, step_holds: impl Fn(f64, f64) -> bool) -> Vec<bool> {
    let n = prices.len();
    let mut streak = 0usize;
    let mut out = vec![false; n];
    for i in 1..n {
        if step_holds(prices[i - 1], prices[i]) {
            streak += 1;
        } else {
            streak = 0;
        }
        out[i] = streak >= count;
    }
    out
}

/// Convert a `ConditionSpec` into a concrete `Box<dyn ConditionFn>`.
pub fn build_condition(spec: &ConditionSpec) -> Box<dyn ConditionFn> {
    match spec {
        ConditionSpec::RsiAbove { column, threshold } => Box::new(RsiAbove {
            column: column.clone(),
            threshold: *threshold,
        }),
        ConditionSpec::RsiBelow { column, threshold } => Box::new(RsiBelow {
            column: column.clone(),
            threshold: *threshold,
        }),
        ConditionSpec::MacdBullish { column } => Box::new(MacdBullish {
            column: column.clone(),
        }),
        ConditionSpec::MacdBearish { column } => Box::new(MacdBearish {
            column: column.clone(),
        }),
        ConditionSpec::PriceAboveSma { column, period } => Box::new(PriceAboveSma {
            column: column.clone(),
            period: *period,
        }),
        ConditionSpec::PriceBelowSma { column, period } => Box::new(PriceBelowSma {
            column: column.clone(),
            period: *period,
        }),
        ConditionSpec::SmaCrossover {
            column,
            fast_period,
            slow_period,
        } => Box::new(SmaCrossover {
            column: column.clone(),
            fast_period: *fast_period,
            slow_period: *slow_period,
        }),
        ConditionSpec::BollingerUpperTouch { column, period } => Box::new(BollingerUpperTouch {
            column: column.clone(),
            period: *period,
        }),
        ConditionSpec::BollingerLowerTouch { column, period } => Box::new(BollingerLowerTouch {
            column: column.clone(),
            period: *period,
        }),
        ConditionSpec::AtrAbove {
            close_col,
            high_col,
            low_col,
            period,
            threshold,
        } => Box::new(AtrAbove {
            close_col: close_col.clone(),
            high_col: high_col.clone(),
            low_col: low_col.clone(),
            period: *period,
            threshold: *threshold,
        }),
        ConditionSpec::GapUp {
            open_col,
            close_col,
            threshold_pct,
        } => Box::new(GapUp {
            open_col: open_col.clone(),
            close_col: close_col.clone(),
            threshold_pct: *threshold_pct,
        }),
        ConditionSpec::GapDown {
            open_col,
            close_col,
            threshold_pct,
        } => Box::new(GapDown {
            open_col: open_col.clone(),
            close_col: close_col.clone(),
            threshold_pct: *threshold_pct,
        }),
        ConditionSpec::ConsecutiveUp { column, count } => Box::new(ConsecutiveUp {
            column: column.clone(),
            count: *count,
        }),
        ConditionSpec::ConsecutiveDown { column, count } => Box::new(ConsecutiveDown {
            column: column.clone(),
            count: *count,
        }),
    }
}

/// Either a serializable, cacheable condition, or an opaque predicate
/// supplied directly as a closure. Combined-strategy rules carrying any
/// `Raw` condition are not cacheable (§4.6's "refuses caching / disables
/// caching" policy; this crate disables caching for that run — see
/// `pipeline::cache`).
pub enum Condition {
    Spec(ConditionSpec),
    Raw(Box<dyn Fn(&DataFrame) -> Result<Vec<bool>> + Send + Sync>),
}

impl Condition {
    pub fn evaluate(&self, df: &DataFrame) -> Result<Vec<bool>> {
        match self {
            Condition::Spec(spec) => build_condition(spec).evaluate(df),
            Condition::Raw(f) => f(df),
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, Condition::Spec(_))
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Spec(spec) => write!(f, "Condition::Spec({spec:?})"),
            Condition::Raw(_) => write!(f, "Condition::Raw(<closure>)"),
        }
    }
}

pub fn require_column(df: &DataFrame, name: &str) -> Result<()> {
    if df.column(name).is_err() {
        return Err(ZoneError::config(format!("column '{name}' does not exist")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_df() -> DataFrame {
        let closes: Vec<f64> = (0..60).map(f64::from).collect();
        df! { "close" => &closes }.unwrap()
    }

    #[test]
    fn rsi_above_on_uptrend_ramp_is_eventually_true() {
        let df = ramp_df();
        let cond = build_condition(&ConditionSpec::RsiAbove {
            column: "close".into(),
            threshold: 60.0,
        });
        let mask = cond.evaluate(&df).unwrap();
        assert!(mask.iter().any(|&b| b));
    }

    #[test]
    fn consecutive_up_requires_run_length() {
        let df = df! { "close" => &[1.0, 2.0, 3.0, 2.0, 3.0, 4.0, 5.0] }.unwrap();
        let cond = build_condition(&ConditionSpec::ConsecutiveUp {
            column: "close".into(),
            count: 2,
        });
        let mask = cond.evaluate(&df).unwrap();
        assert_eq!(mask, vec![false, false, true, false, false, true, true]);
    }

    #[test]
    fn raw_condition_is_not_cacheable() {
        let raw = Condition::Raw(Box::new(|df: &DataFrame| Ok(vec![true; df.height()])));
        assert!(!raw.is_cacheable());
        let spec = Condition::Spec(ConditionSpec::ConsecutiveUp {
            column: "close".into(),
            count: 1,
        });
        assert!(spec.is_cacheable());
    }
}
