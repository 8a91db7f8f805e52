//! The indicator computation collaborator (§6).
//!
//! Out of scope per §1: the core never defines an indicator. It only needs a
//! single capability — compute columns into a frame given a name and
//! parameters — so that capability is expressed as a trait, the same way the
//! teacher expresses `DataStore`/`SignalFn` as the seam for a pluggable
//! collaborator (`data/mod.rs`'s `DataStore` trait wraps parquet/S3/Postgres
//! sources behind one interface).

use std::collections::HashMap;

use polars::prelude::*;

use crate::error::Result;

/// A source+name+params description of an indicator to compute, as passed to
/// `with_indicator(source, name, **params)` on the builder.
#[derive(Debug, Clone)]
pub struct IndicatorRequest {
    pub source: String,
    pub name: String,
    pub params: HashMap<String, f64>,
}

impl IndicatorRequest {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// `compute(source, name, params, data) -> data_with_new_columns`.
///
/// The core does not know which columns a given indicator produces; callers
/// supply `detect_zones(indicator_col = ...)` accordingly afterwards.
pub trait IndicatorSource: Send + Sync {
    fn compute(&self, request: &IndicatorRequest, data: &DataFrame) -> Result<DataFrame>;
}

/// A no-op indicator source for pipelines whose input data already contains
/// the indicator column(s) — `with_indicator` is then simply never called.
/// Also doubles as the collaborator stand-in for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicatorSource;

impl IndicatorSource for NoopIndicatorSource {
    fn compute(&self, _request: &IndicatorRequest, data: &DataFrame) -> Result<DataFrame> {
        Ok(data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_source_returns_input_unchanged() {
        let df = df! { "close" => &[1.0, 2.0] }.unwrap();
        let req = IndicatorRequest::new("external", "rsi").with_param("period", 14.0);
        let out = NoopIndicatorSource.compute(&req, &df).unwrap();
        assert_eq!(out.height(), 2);
    }
}
