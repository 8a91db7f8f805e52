//! Analytical strategy registry and the five metric families (C3).
//!
//! Same capability-registry shape as `detection`: a name resolves to a
//! `Box<dyn AnalyticalStrategy>`, and every strategy returns a
//! `serde_json::Value` record rather than a fixed struct, since the
//! orchestrator stores each one verbatim under `features["metadata"]`
//! (spec §4.4 step 5) and callers consume it as data, not as a Rust type.

pub mod divergence;
pub mod registry;
pub mod shape;
pub mod swing;
pub mod volatility;
pub mod volume;

use polars::prelude::*;
use serde_json::Value;

use crate::error::Result;
use crate::features::swing_context::SwingPoint;

/// Column names and precomputed inputs an analytical strategy may need,
/// resolved once by the orchestrator and shared across all strategies run
/// for a given zone.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub primary: Option<String>,
    pub signal: Option<String>,
    pub baseline_volume: Option<f64>,
    pub swing_points: Vec<SwingPoint>,
}

/// A pluggable algorithm that reduces a zone slice to a small metric record.
/// Never raises past `calculate`'s own boundary; the orchestrator treats any
/// internal failure as a `StrategyFailure` and stores `null` in its place.
pub trait AnalyticalStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn calculate(&self, zone_data: &DataFrame, ctx: &AnalysisContext) -> Result<Value>;
}

pub use registry::build_strategy;
