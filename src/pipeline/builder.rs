//! `ZoneAnalysisBuilder`: the fluent entry point (§4.6 C6). Collects a
//! specification field by field, the same way the teacher's
//! `engine::BacktestConfig`/strategy builders accumulate options before a
//! single `run()`, then executes the seven-step pipeline in `build()`.

use std::collections::HashMap;

use polars::prelude::*;
use rayon::prelude::*;
use serde_json::json;

use super::cache::{self, CacheKey, CACHE_KEY_POLICY};
use crate::analysis::swing::{algorithm_for_name, compute_swings};
use crate::detection::{build_strategy as build_detection_strategy, DetectionConfig, DetectionRules};
use crate::error::{Result, ZoneError};
use crate::features::swing_context::SwingContext;
use crate::features::{extract_zone_features, FeatureExtractionConfig, SwingScope};
use crate::indicator::{IndicatorRequest, IndicatorSource, NoopIndicatorSource};
use crate::result::{RegressionBundle, ResultMetadata, ZoneAnalysisResult};
use crate::stats::clustering::run_kmeans;
use crate::stats::distribution::compute_distribution_summary;
use crate::stats::hypothesis::run_hypothesis_battery;
use crate::stats::regression::{predict_price_return, predict_zone_duration};
use crate::stats::sequence::compute_sequence_analysis;
use crate::stats::validation::run_validation;
use crate::util::naive_datetime_at;

/// Zone features present on every zone regardless of which indicator or
/// detection strategy produced it (spec §8 "Agnosticism proof") — the
/// default predictor/clustering set, since the builder must never reach for
/// a feature named after a specific indicator.
const UNIVERSAL_FEATURE_NAMES: &[&str] = &["duration", "price_return", "price_range_pct", "num_peaks", "num_troughs"];

/// Toggles for the aggregation stage (§4.6 `analyze(clustering?, n_clusters?,
/// regression?, validation?)`), bundled into one struct so the call site
/// still reads as a single fluent step.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub clustering: bool,
    pub n_clusters: usize,
    pub regression: bool,
    pub validation: bool,
    pub validation_seed: u64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            clustering: false,
            n_clusters: 3,
            regression: false,
            validation: false,
            validation_seed: 42,
        }
    }
}

fn validate_input(data: &DataFrame) -> Result<()> {
    if data.height() == 0 {
        return Err(ZoneError::data("input series is empty"));
    }
    for col in ["open", "high", "low", "close"] {
        if data.column(col).is_err() {
            return Err(ZoneError::data(format!("input series is missing required column '{col}'")));
        }
    }
    let time_col = if data.column("timestamp").is_ok() {
        "timestamp"
    } else if data.column("date").is_ok() {
        "date"
    } else {
        return Err(ZoneError::data("input series has no time index ('timestamp' or 'date' column)"));
    };
    let mut previous = None;
    for row in 0..data.height() {
        let current = naive_datetime_at(data, time_col, row)?;
        if let Some(prev) = previous {
            if current <= prev {
                return Err(ZoneError::data(format!(
                    "time index is not strictly increasing at row {row}"
                )));
            }
        }
        previous = Some(current);
    }
    Ok(())
}

/// Collects the specification for one zone analysis run; `build()` executes
/// it. Every setter takes `self` by value and returns `Self`, matching the
/// teacher's fluent-config style.
pub struct ZoneAnalysisBuilder {
    data: DataFrame,
    indicator_source: Box<dyn IndicatorSource>,
    indicator_request: Option<IndicatorRequest>,
    detection_config: Option<DetectionConfig>,
    feature_config: FeatureExtractionConfig,
    analysis_options: AnalysisOptions,
    cache_enabled: bool,
    cache_ttl_seconds: Option<u64>,
    parallel_features: bool,
    symbol: Option<String>,
    timeframe: Option<String>,
    source: Option<String>,
}

impl ZoneAnalysisBuilder {
    pub fn new(data: DataFrame) -> Self {
        Self {
            data,
            indicator_source: Box::new(NoopIndicatorSource),
            indicator_request: None,
            detection_config: None,
            feature_config: FeatureExtractionConfig::default(),
            analysis_options: AnalysisOptions::default(),
            cache_enabled: false,
            cache_ttl_seconds: None,
            parallel_features: false,
            symbol: None,
            timeframe: None,
            source: None,
        }
    }

    /// Injects the indicator collaborator (§6); defaults to
    /// [`NoopIndicatorSource`] for data that already carries its indicator
    /// columns.
    pub fn with_indicator_source(mut self, source: Box<dyn IndicatorSource>) -> Self {
        self.indicator_source = source;
        self
    }

    /// `with_indicator(source, name, **params)`.
    pub fn with_indicator(mut self, source: impl Into<String>, name: impl Into<String>, params: HashMap<String, f64>) -> Self {
        let mut request = IndicatorRequest::new(source, name);
        for (key, value) in params {
            request = request.with_param(key, value);
        }
        self.indicator_request = Some(request);
        self
    }

    /// `detect_zones(strategy, **rules)`.
    pub fn detect_zones(mut self, strategy_name: impl Into<String>, rules: DetectionRules) -> Self {
        self.detection_config = Some(DetectionConfig::new(strategy_name, rules));
        self
    }

    pub fn with_min_duration(mut self, min_duration: usize) -> Self {
        if let Some(config) = self.detection_config.take() {
            self.detection_config = Some(config.with_min_duration(min_duration));
        }
        self
    }

    pub fn with_zone_types(mut self, zone_types: Vec<String>) -> Self {
        if let Some(config) = self.detection_config.take() {
            self.detection_config = Some(config.with_zone_types(zone_types));
        }
        self
    }

    /// `with_strategies(swing?, shape?, divergence?, volatility?, volume?)`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_strategies(
        mut self,
        swing: Option<String>,
        shape: Option<String>,
        divergence: Option<String>,
        volatility: Option<String>,
        volume: Option<String>,
    ) -> Self {
        self.feature_config.swing = swing;
        self.feature_config.shape = shape;
        self.feature_config.divergence = divergence;
        self.feature_config.volatility = volatility;
        self.feature_config.volume = volume;
        self
    }

    pub fn with_swing_scope(mut self, scope: SwingScope) -> Self {
        self.feature_config.swing_scope = Some(scope);
        self
    }

    pub fn with_baseline_volume(mut self, baseline_volume: f64) -> Self {
        self.feature_config.baseline_volume = Some(baseline_volume);
        self
    }

    /// `analyze(clustering?, n_clusters?, regression?, validation?)`.
    pub fn analyze(mut self, options: AnalysisOptions) -> Self {
        self.analysis_options = options;
        self
    }

    /// `with_cache(enable=true, ttl_seconds?)`.
    pub fn with_cache(mut self, enable: bool, ttl_seconds: Option<u64>) -> Self {
        self.cache_enabled = enable;
        self.cache_ttl_seconds = ttl_seconds;
        self
    }

    /// Run the per-zone feature loop as a data-parallel map (§5: allowed
    /// only because the per-zone work is pure — no shared mutation, each
    /// zone writes only its own `features`). Default is sequential.
    pub fn with_parallel_features(mut self, enable: bool) -> Self {
        self.parallel_features = enable;
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = Some(timeframe.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Canonical echo of every builder field except callables (§4.6 cache
    /// key), built from each component's own `to_echo`/`Serialize` so this
    /// function never has to special-case a new strategy's rule keys.
    fn config_echo(&self, detection_config: &DetectionConfig) -> serde_json::Value {
        json!({
            "indicator_request": self.indicator_request.as_ref().map(|r| json!({
                "source": r.source,
                "name": r.name,
                "params": r.params.iter().collect::<std::collections::BTreeMap<_, _>>(),
            })),
            "detection_strategy": detection_config.strategy_name,
            "detection_rules": detection_config.rules.to_echo(),
            "min_duration": detection_config.min_duration,
            "zone_types": detection_config.zone_types,
            "swing": self.feature_config.swing,
            "shape": self.feature_config.shape,
            "divergence": self.feature_config.divergence,
            "volatility": self.feature_config.volatility,
            "volume": self.feature_config.volume,
            "swing_scope": format!("{:?}", self.feature_config.swing_scope_or_default()),
            "baseline_volume": self.feature_config.baseline_volume,
            "clustering": self.analysis_options.clustering,
            "n_clusters": self.analysis_options.n_clusters,
            "regression": self.analysis_options.regression,
            "validation": self.analysis_options.validation,
            "validation_seed": self.analysis_options.validation_seed,
        })
    }

    /// Execute the pipeline (§4.6 "Execution order").
    pub fn build(&self) -> Result<ZoneAnalysisResult> {
        validate_input(&self.data)?;
        let detection_config = self
            .detection_config
            .as_ref()
            .ok_or_else(|| ZoneError::config("no detection strategy configured; call detect_zones() first"))?;

        let config_echo = self.config_echo(detection_config);
        let cacheable = detection_config.rules.is_cacheable();
        if self.cache_enabled && !cacheable {
            tracing::warn!("cache disabled for this run: detection rules contain non-serializable conditions");
        }
        let cache_key = (self.cache_enabled && cacheable).then(|| CacheKey::new(&self.data, &config_echo));

        if let Some(key) = &cache_key {
            let mut cache = cache::global().lock().expect("zone analysis cache lock poisoned");
            if let Some(hit) = cache.get(key) {
                tracing::info!("zone analysis cache hit");
                return Ok(hit);
            }
        }

        // 1. Optionally compute indicator and join into data.
        let mut data = self.data.clone();
        if let Some(request) = &self.indicator_request {
            data = self.indicator_source.compute(request, &data)?;
        }

        // 2. Global swing context, if configured.
        let swing_context = if self.feature_config.swing_scope_or_default() == SwingScope::Global {
            match &self.feature_config.swing {
                Some(name) => Some(SwingContext::new(compute_swings(&data, algorithm_for_name(name)?)?)),
                None => None,
            }
        } else {
            None
        };

        // 3. Detection.
        let strategy = build_detection_strategy(&detection_config.strategy_name)?;
        let mut zones = strategy.detect(&data, detection_config)?;
        zones.sort_by_key(|z| z.start_idx);

        // 4 & 5. Inject global swing slice (handled inside extract_zone_features
        // via `swing_context`) and run feature extraction over all zones.
        if self.parallel_features {
            zones
                .par_iter_mut()
                .try_for_each(|zone| extract_zone_features(zone, &self.feature_config, swing_context.as_ref()))?;
        } else {
            for zone in &mut zones {
                extract_zone_features(zone, &self.feature_config, swing_context.as_ref())?;
            }
        }

        // 6. Aggregation.
        let distribution = compute_distribution_summary(&zones);
        let hypothesis_tests = run_hypothesis_battery(&zones);
        let sequence_analysis = compute_sequence_analysis(&zones);
        let clustering = if self.analysis_options.clustering {
            let feature_names: Vec<String> = UNIVERSAL_FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
            run_kmeans(&zones, &feature_names, self.analysis_options.n_clusters)
        } else {
            None
        };
        let regression = if self.analysis_options.regression {
            RegressionBundle {
                duration: predict_zone_duration(&zones),
                price_return: predict_price_return(&zones),
            }
        } else {
            RegressionBundle::default()
        };
        let validation = if self.analysis_options.validation {
            Some(run_validation(&zones, self.analysis_options.validation_seed))
        } else {
            None
        };

        // 7. Assemble the result.
        let mut zone_types = Vec::new();
        for zone in &zones {
            if !zone_types.contains(&zone.zone_type) {
                zone_types.push(zone.zone_type.clone());
            }
        }
        let metadata = ResultMetadata {
            analysis_timestamp: chrono::Utc::now().to_rfc3339(),
            total_zones: zones.len(),
            zone_types,
            clustering_performed: clustering.is_some(),
            regression_performed: self.analysis_options.regression,
            validation_performed: validation.is_some(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            source: self.source.clone(),
            cache_key_policy: Some(CACHE_KEY_POLICY.to_string()),
        };

        let result = ZoneAnalysisResult {
            zones,
            data: Some(data),
            distribution,
            hypothesis_tests,
            sequence_analysis,
            clustering,
            regression,
            validation,
            metadata,
        };

        if let Some(key) = cache_key {
            let mut cache = cache::global().lock().expect("zone analysis cache lock poisoned");
            cache.insert(key, result.clone(), self.cache_ttl_seconds);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sine_series(n: usize) -> DataFrame {
        let dates: Vec<i32> = (0..n as i32)
            .map(|i| {
                (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
                    .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
                    .num_days() as i32
            })
            .collect();
        let osc: Vec<f64> = (0..n).map(|i| (2.0 * std::f64::consts::PI * i as f64 / 50.0).sin()).collect();
        let close: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.01).collect();
        let mut df = df! {
            "date" => dates,
            "open" => close.clone(),
            "high" => close.iter().map(|v| v + 1.0).collect::<Vec<_>>(),
            "low" => close.iter().map(|v| v - 1.0).collect::<Vec<_>>(),
            "close" => close,
            "osc" => osc,
        }
        .unwrap();
        df.try_apply("date", |s| s.cast(&DataType::Date)).unwrap();
        df
    }

    #[test]
    fn missing_required_column_is_config_error() {
        let df = df! { "close" => &[1.0, 2.0, 3.0] }.unwrap();
        let err = ZoneAnalysisBuilder::new(df)
            .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ZoneError::Data(_)));
    }

    #[test]
    fn build_without_detect_zones_is_config_error() {
        let df = sine_series(200);
        let err = ZoneAnalysisBuilder::new(df).build().unwrap_err();
        assert!(matches!(err, ZoneError::Config(_)));
    }

    #[test]
    fn zero_crossing_sine_produces_alternating_zones() {
        let df = sine_series(200);
        let result = ZoneAnalysisBuilder::new(df)
            .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
            .build()
            .unwrap();
        assert_eq!(result.zones.len(), 8);
        for pair in result.zones.windows(2) {
            assert_ne!(pair[0].zone_type, pair[1].zone_type);
        }
        assert_eq!(result.metadata.total_zones, 8);
    }

    #[test]
    fn agnostic_column_name_runs_full_pipeline() {
        let n = 200;
        let dates: Vec<i32> = (0..n as i32).collect();
        let whatever: Vec<f64> = (0..n).map(|i| (2.0 * std::f64::consts::PI * i as f64 / 40.0).sin()).collect();
        let close: Vec<f64> = (0..n).map(|i| 50.0 + i as f64 * 0.02).collect();
        let mut df = df! {
            "date" => dates,
            "open" => close.clone(),
            "high" => close.iter().map(|v| v + 0.5).collect::<Vec<_>>(),
            "low" => close.iter().map(|v| v - 0.5).collect::<Vec<_>>(),
            "close" => close,
            "WHATEVER_42" => whatever,
        }
        .unwrap();
        df.try_apply("date", |s| s.cast(&DataType::Date)).unwrap();

        let result = ZoneAnalysisBuilder::new(df)
            .detect_zones("zero_crossing", DetectionRules::zero_crossing("WHATEVER_42"))
            .with_strategies(
                Some("swing".to_string()),
                Some("shape".to_string()),
                Some("divergence".to_string()),
                Some("volatility".to_string()),
                Some("volume".to_string()),
            )
            .build()
            .unwrap();
        assert!(!result.zones.is_empty());
        for zone in &result.zones {
            let shape = &zone.features["metadata"]["shape_metrics"];
            assert_eq!(shape["strategy_params"]["indicator_col"], "WHATEVER_42");
        }
    }

    #[test]
    fn sequence_analysis_counts_transitions_deterministically() {
        let df = sine_series(260);
        let result = ZoneAnalysisBuilder::new(df)
            .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
            .build()
            .unwrap();
        let seq = result.sequence_analysis.expect("enough zones for sequence analysis");
        let counted: usize = seq.transitions.values().sum();
        assert_eq!(counted, result.zones.len() - 1);
    }

    #[test]
    fn second_identical_run_is_served_from_cache() {
        let df = sine_series(200);
        let builder = || {
            ZoneAnalysisBuilder::new(df.clone())
                .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
                .with_cache(true, None)
        };
        let first = builder().build().unwrap();
        let second = builder().build().unwrap();
        assert_eq!(first.metadata.total_zones, second.metadata.total_zones);
        assert_eq!(first.metadata.analysis_timestamp, second.metadata.analysis_timestamp);
    }

    #[test]
    fn combined_strategy_with_raw_condition_bypasses_cache() {
        use crate::detection::conditions::Condition;
        use crate::detection::CombineLogic;
        let df = sine_series(200);
        let rules = DetectionRules::combined(
            vec![Condition::Raw(Box::new(|df| Ok(vec![true; df.height()])))],
            CombineLogic::And,
        );
        let result = ZoneAnalysisBuilder::new(df)
            .detect_zones("combined", rules)
            .with_cache(true, None)
            .build()
            .unwrap();
        assert_eq!(result.metadata.total_zones, 1);
    }

    #[test]
    fn parallel_and_sequential_feature_extraction_agree() {
        let df = sine_series(200);
        let sequential = ZoneAnalysisBuilder::new(df.clone())
            .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
            .with_strategies(None, Some("shape".to_string()), None, None, None)
            .build()
            .unwrap();
        let parallel = ZoneAnalysisBuilder::new(df)
            .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
            .with_strategies(None, Some("shape".to_string()), None, None, None)
            .with_parallel_features(true)
            .build()
            .unwrap();
        assert_eq!(sequential.zones.len(), parallel.zones.len());
        for (a, b) in sequential.zones.iter().zip(parallel.zones.iter()) {
            assert_eq!(a.features["price_return"], b.features["price_return"]);
        }
    }
}
