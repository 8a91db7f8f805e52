//! Zone record and indicator context (C1).
//!
//! The central design decision carried over from the teacher's
//! `SignalSpec`/`SignalFn` split: a zone **describes itself**. Nothing above
//! the concrete detection/analytical strategy ever branches on an indicator
//! name; it reads `indicator_context` instead.

use std::fmt;

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ZoneError};

/// A zone identifier: either an integer sequence number or an externally
/// supplied string (e.g. a preloaded zones file's `zone_id` column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ZoneId {
    Int(i64),
    Str(String),
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneId::Int(i) => write!(f, "{i}"),
            ZoneId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ZoneId {
    fn from(v: i64) -> Self {
        ZoneId::Int(v)
    }
}

impl From<String> for ZoneId {
    fn from(v: String) -> Self {
        ZoneId::Str(v)
    }
}

/// Mapping of string keys to primitive/nested feature values. Mirrors the
/// teacher's heavy use of `serde_json::Value` at tool/response boundaries
/// (`tools/response_types.rs`), used here for the open-ended per-zone
/// `features` dict rather than a fixed struct, since the set of strategies
/// (and thus the keys present) is configured per pipeline run.
pub type FeatureMap = Map<String, Value>;

/// `indicator_context`: the contract every detection strategy must populate.
///
/// Required keys: `detection_strategy`, `detection_indicator`. Optional:
/// `signal_line`, `detection_rules`, plus strategy-specific extras. Never
/// null after construction — an empty context still coerces to `{}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndicatorContext(pub Map<String, Value>);

impl IndicatorContext {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn detection_strategy(&self) -> Option<&str> {
        self.0.get("detection_strategy").and_then(Value::as_str)
    }

    /// `indicator_context["detection_indicator"]`, or null if absent.
    pub fn primary_indicator_column(&self) -> Option<&str> {
        self.0.get("detection_indicator").and_then(Value::as_str)
    }

    /// `indicator_context.get("signal_line")`.
    pub fn signal_line_column(&self) -> Option<&str> {
        self.0.get("signal_line").and_then(Value::as_str)
    }
}

/// A typed, contiguous interval over a time-indexed bar series.
///
/// `data` is carried by reference to the parent series conceptually (the
/// `ZoneAnalysisResult` owns the full frame); in practice each zone holds an
/// owned slice, which is cheap under polars' `Arc`-backed columns. It is
/// dropped by `to_serializable()` so JSON/columnar persistence stays small.
#[derive(Debug, Clone)]
pub struct Zone {
    pub zone_id: ZoneId,
    pub zone_type: String,
    pub start_idx: usize,
    pub end_idx: usize,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub data: DataFrame,
    pub features: FeatureMap,
    pub indicator_context: IndicatorContext,
}

impl Zone {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zone_id: ZoneId,
        zone_type: impl Into<String>,
        start_idx: usize,
        end_idx: usize,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
        data: DataFrame,
        indicator_context: IndicatorContext,
    ) -> Result<Self> {
        if end_idx < start_idx {
            return Err(ZoneError::data(format!(
                "zone end_idx ({end_idx}) precedes start_idx ({start_idx})"
            )));
        }
        Ok(Self {
            zone_id,
            zone_type: zone_type.into(),
            start_idx,
            end_idx,
            start_time,
            end_time,
            data,
            features: FeatureMap::new(),
            indicator_context,
        })
    }

    /// `end_idx - start_idx + 1`, in bars.
    pub fn duration(&self) -> usize {
        self.end_idx - self.start_idx + 1
    }

    pub fn primary_indicator_column(&self) -> Option<&str> {
        self.indicator_context.primary_indicator_column()
    }

    pub fn signal_line_column(&self) -> Option<&str> {
        self.indicator_context.signal_line_column()
    }

    /// Zone as a primitive-only mapping, omitting `data`.
    pub fn to_serializable(&self) -> Value {
        serde_json::json!({
            "zone_id": self.zone_id,
            "type": self.zone_type,
            "start_idx": self.start_idx,
            "end_idx": self.end_idx,
            "start_time": self.start_time.and_utc().to_rfc3339(),
            "end_time": self.end_time.and_utc().to_rfc3339(),
            "duration": self.duration(),
            "features": self.features,
            "indicator_context": self.indicator_context.0,
        })
    }
}
