//! Detection strategy registry and the five concrete strategies (C2).
//!
//! A registry maps strategy name -> factory, exactly as the teacher's
//! `signals::registry::build_signal` maps `SignalSpec` variants to
//! `Box<dyn SignalFn>`. Here the "spec" is [`DetectionRules`] and the
//! product is a `Vec<Zone>` rather than a boolean mask, but the dispatch
//! shape — a tagged union matched once, in one place — is the same.

pub mod combined;
pub mod conditions;
pub mod line_crossing;
pub mod preloaded;
pub mod threshold;
pub mod zero_crossing;

use polars::prelude::*;

use crate::error::{Result, ZoneError};
use crate::zone::Zone;
use conditions::Condition;

/// Logic used to combine condition masks in the `combined` strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CombineLogic {
    And,
    Or,
}

/// A tabular or in-memory source of preloaded zones (§4.2d).
pub enum PreloadedSource {
    DataFrame(DataFrame),
    Path(String),
}

impl std::fmt::Debug for PreloadedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreloadedSource::DataFrame(df) => write!(f, "PreloadedSource::DataFrame({} rows)", df.height()),
            PreloadedSource::Path(p) => write!(f, "PreloadedSource::Path({p})"),
        }
    }
}

/// The opaque, per-strategy rule set. Each variant is interpreted by exactly
/// one strategy; the builder/pipeline never inspects it (§4.6, "Agnostic
/// principle"). Adding a new strategy means adding a new variant here and a
/// new registry entry — nothing else in the pipeline changes.
#[derive(Debug)]
pub enum DetectionRules {
    ZeroCrossing {
        indicator_col: String,
        smooth_window: Option<usize>,
    },
    Threshold {
        indicator_col: String,
        upper_threshold: f64,
        lower_threshold: f64,
    },
    LineCrossing {
        line1_col: String,
        line2_col: String,
    },
    Preloaded {
        source: PreloadedSource,
    },
    Combined {
        conditions: Vec<Condition>,
        logic: CombineLogic,
    },
}

impl DetectionRules {
    pub fn zero_crossing(indicator_col: impl Into<String>) -> Self {
        Self::ZeroCrossing {
            indicator_col: indicator_col.into(),
            smooth_window: None,
        }
    }

    pub fn zero_crossing_smoothed(indicator_col: impl Into<String>, smooth_window: usize) -> Self {
        Self::ZeroCrossing {
            indicator_col: indicator_col.into(),
            smooth_window: Some(smooth_window),
        }
    }

    pub fn threshold(
        indicator_col: impl Into<String>,
        upper_threshold: f64,
        lower_threshold: f64,
    ) -> Result<Self> {
        if upper_threshold <= lower_threshold {
            return Err(ZoneError::config(format!(
                "upper_threshold ({upper_threshold}) must be > lower_threshold ({lower_threshold})"
            )));
        }
        Ok(Self::Threshold {
            indicator_col: indicator_col.into(),
            upper_threshold,
            lower_threshold,
        })
    }

    pub fn line_crossing(line1_col: impl Into<String>, line2_col: impl Into<String>) -> Self {
        Self::LineCrossing {
            line1_col: line1_col.into(),
            line2_col: line2_col.into(),
        }
    }

    pub fn preloaded(source: PreloadedSource) -> Self {
        Self::Preloaded { source }
    }

    pub fn combined(conditions: Vec<Condition>, logic: CombineLogic) -> Self {
        Self::Combined { conditions, logic }
    }

    /// Whether every condition (and, transitively, every field) in these
    /// rules can be round-tripped through JSON. `false` for `Combined` rules
    /// carrying any `Condition::Raw` closure (§4.6/§8 cache-key policy).
    pub fn is_cacheable(&self) -> bool {
        match self {
            Self::Combined { conditions, .. } => conditions.iter().all(Condition::is_cacheable),
            _ => true,
        }
    }

    /// Canonical, serializable echo for `indicator_context.detection_rules`
    /// and for the cache config hash. Opaque closures are omitted, never
    /// panicked on (§9 Open Question: "canonical text/columnar serializers
    /// drop callables").
    pub fn to_echo(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::ZeroCrossing {
                indicator_col,
                smooth_window,
            } => json!({
                "strategy": "zero_crossing",
                "indicator_col": indicator_col,
                "smooth_window": smooth_window,
            }),
            Self::Threshold {
                indicator_col,
                upper_threshold,
                lower_threshold,
            } => json!({
                "strategy": "threshold",
                "indicator_col": indicator_col,
                "upper_threshold": upper_threshold,
                "lower_threshold": lower_threshold,
            }),
            Self::LineCrossing { line1_col, line2_col } => json!({
                "strategy": "line_crossing",
                "line1_col": line1_col,
                "line2_col": line2_col,
            }),
            Self::Preloaded { source } => json!({
                "strategy": "preloaded",
                "source": match source {
                    PreloadedSource::DataFrame(_) => "in_memory".to_string(),
                    PreloadedSource::Path(p) => p.clone(),
                },
            }),
            Self::Combined { conditions, logic } => {
                let specs: Vec<serde_json::Value> = conditions
                    .iter()
                    .filter_map(|c| match c {
                        Condition::Spec(spec) => serde_json::to_value(spec).ok(),
                        Condition::Raw(_) => None,
                    })
                    .collect();
                json!({
                    "strategy": "combined",
                    "logic": logic,
                    "num_conditions": conditions.len(),
                    "conditions": specs,
                })
            }
        }
    }
}

/// `config` passed to every `DetectionStrategy::detect` call.
#[derive(Debug)]
pub struct DetectionConfig {
    pub strategy_name: String,
    pub min_duration: usize,
    pub zone_types: Option<Vec<String>>,
    pub rules: DetectionRules,
}

impl DetectionConfig {
    pub fn new(strategy_name: impl Into<String>, rules: DetectionRules) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            min_duration: 1,
            zone_types: None,
            rules,
        }
    }

    pub fn with_min_duration(mut self, min_duration: usize) -> Self {
        self.min_duration = min_duration;
        self
    }

    pub fn with_zone_types(mut self, zone_types: Vec<String>) -> Self {
        self.zone_types = Some(zone_types);
        self
    }

    fn keep_type(&self, zone_type: &str) -> bool {
        self.zone_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == zone_type))
    }
}

/// A pluggable rule that partitions a series into typed zones.
pub trait DetectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn vocabulary(&self) -> &'static [&'static str];
    fn detect(&self, data: &DataFrame, config: &DetectionConfig) -> Result<Vec<Zone>>;
}

/// Resolve a strategy name to its implementation. Mirrors
/// `signals::registry::build_signal`'s exhaustive match — the indirection a
/// real registry (`HashMap<&str, fn() -> Box<dyn DetectionStrategy>>`) would
/// add buys nothing here since the set of strategies is closed at compile
/// time and each already carries its own name.
pub fn build_strategy(name: &str) -> Result<Box<dyn DetectionStrategy>> {
    match name {
        "zero_crossing" => Ok(Box::new(zero_crossing::ZeroCrossingStrategy)),
        "threshold" => Ok(Box::new(threshold::ThresholdStrategy)),
        "line_crossing" => Ok(Box::new(line_crossing::LineCrossingStrategy)),
        "preloaded" => Ok(Box::new(preloaded::PreloadedStrategy)),
        "combined" => Ok(Box::new(combined::CombinedStrategy)),
        other => Err(ZoneError::config(format!("unknown detection strategy '{other}'"))),
    }
}

pub(crate) fn filter_by_min_duration(zones: Vec<Zone>, min_duration: usize) -> Vec<Zone> {
    zones.into_iter().filter(|z| z.duration() >= min_duration).collect()
}
