//! `ZoneAnalysisResult` and persistence (C7). The object `build()` returns,
//! and the three on-disk representations it can round-trip through.
//!
//! Grounded on `data/eodhd.rs`'s `save_parquet`/`load_parquet` (temp-file +
//! atomic rename for the binary format's parquet payloads) and on the
//! teacher's blanket `serde_json::to_string_pretty` use at tool boundaries
//! for the structured-text format.

use std::fs;
use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, ZoneError};
use crate::stats::clustering::ClusteringResult;
use crate::stats::distribution::DistributionSummary;
use crate::stats::regression::RegressionResult;
use crate::stats::sequence::SequenceAnalysis;
use crate::stats::validation::ValidationReport;
use crate::stats::HypothesisBatterySummary;
use crate::zone::{IndicatorContext, Zone, ZoneId};

/// Persistence format (spec §4.7): binary keeps every `DataFrame`; structured
/// text is JSON without per-zone `data`; columnar is zones-as-rows plus a
/// sidecar for nested records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistFormat {
    Binary,
    StructuredText,
    Columnar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub analysis_timestamp: String,
    pub total_zones: usize,
    pub zone_types: Vec<String>,
    pub clustering_performed: bool,
    pub regression_performed: bool,
    pub validation_performed: bool,
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub source: Option<String>,
    /// States the cache-key policy actually in effect for this run (spec §8
    /// scenario 6: column order is significant, not canonicalized — two
    /// inputs differing only in column order hash differently and therefore
    /// never collide in the cache). `None` when the result was produced
    /// without going through a cache-aware builder.
    pub cache_key_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegressionBundle {
    pub duration: Option<RegressionResult>,
    pub price_return: Option<RegressionResult>,
}

/// The object `ZoneAnalysisBuilder::build()` returns (§4.7).
#[derive(Debug, Clone)]
pub struct ZoneAnalysisResult {
    pub zones: Vec<Zone>,
    pub data: Option<DataFrame>,
    pub distribution: DistributionSummary,
    pub hypothesis_tests: HypothesisBatterySummary,
    pub sequence_analysis: Option<SequenceAnalysis>,
    pub clustering: Option<ClusteringResult>,
    pub regression: RegressionBundle,
    pub validation: Option<ValidationReport>,
    pub metadata: ResultMetadata,
}

fn write_parquet_atomic(path: &Path, df: &mut DataFrame) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ZoneError::data(format!("failed to create directory {}: {e}", parent.display())))?;
    }
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path)
        .map_err(|e| ZoneError::data(format!("failed to create temp file {}: {e}", tmp_path.display())))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| ZoneError::data(format!("failed to write parquet {}: {e}", path.display())))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| ZoneError::data(format!("failed to rename {} -> {}: {e}", tmp_path.display(), path.display())))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = fs::File::open(path).map_err(|e| ZoneError::data(format!("failed to open {}: {e}", path.display())))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| ZoneError::data(format!("failed to read parquet {}: {e}", path.display())))
}

impl ZoneAnalysisResult {
    /// Aggregation payload shared by the structured-text and columnar
    /// sidecar formats: everything except per-zone/overall `data`.
    fn aggregation_payload(&self) -> Value {
        json!({
            "zones": self.zones.iter().map(Zone::to_serializable).collect::<Vec<_>>(),
            "distribution": self.distribution,
            "hypothesis_tests": self.hypothesis_tests,
            "sequence_analysis": self.sequence_analysis,
            "clustering": self.clustering,
            "regression": self.regression,
            "validation": self.validation,
            "metadata": self.metadata,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>, format: PersistFormat) -> Result<()> {
        let path = path.as_ref();
        tracing::info!(?format, path = %path.display(), "saving zone analysis result");
        match format {
            PersistFormat::StructuredText => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| ZoneError::data(e.to_string()))?;
                }
                let text = serde_json::to_string_pretty(&self.aggregation_payload())
                    .map_err(|e| ZoneError::data(format!("failed to serialize result: {e}")))?;
                fs::write(path, text).map_err(|e| ZoneError::data(format!("failed to write {}: {e}", path.display())))
            }
            PersistFormat::Binary => {
                fs::create_dir_all(path).map_err(|e| ZoneError::data(format!("failed to create directory {}: {e}", path.display())))?;
                let manifest = json!({
                    "zones": self.zones.iter().map(Zone::to_serializable).collect::<Vec<_>>(),
                    "distribution": self.distribution,
                    "hypothesis_tests": self.hypothesis_tests,
                    "sequence_analysis": self.sequence_analysis,
                    "clustering": self.clustering,
                    "regression": self.regression,
                    "validation": self.validation,
                    "metadata": self.metadata,
                    "has_data": self.data.is_some(),
                    "zone_data_files": self.zones.iter().map(|z| format!("{}.parquet", z.zone_id)).collect::<Vec<_>>(),
                });
                fs::write(path.join("manifest.json"), serde_json::to_string_pretty(&manifest).unwrap())
                    .map_err(|e| ZoneError::data(e.to_string()))?;
                if let Some(data) = &self.data {
                    write_parquet_atomic(&path.join("data.parquet"), &mut data.clone())?;
                }
                let zones_dir = path.join("zones");
                fs::create_dir_all(&zones_dir).map_err(|e| ZoneError::data(e.to_string()))?;
                for zone in &self.zones {
                    write_parquet_atomic(&zones_dir.join(format!("{}.parquet", zone.zone_id)), &mut zone.data.clone())?;
                }
                Ok(())
            }
            PersistFormat::Columnar => {
                fs::create_dir_all(path).map_err(|e| ZoneError::data(format!("failed to create directory {}: {e}", path.display())))?;
                let mut table = self.zones_as_table()?;
                write_parquet_atomic(&path.join("zones.parquet"), &mut table)?;
                let sidecar = json!({
                    "distribution": self.distribution,
                    "hypothesis_tests": self.hypothesis_tests,
                    "sequence_analysis": self.sequence_analysis,
                    "clustering": self.clustering,
                    "regression": self.regression,
                    "validation": self.validation,
                    "metadata": self.metadata,
                });
                fs::write(path.join("sidecar.json"), serde_json::to_string_pretty(&sidecar).unwrap())
                    .map_err(|e| ZoneError::data(e.to_string()))
            }
        }
    }

    /// Zones-as-rows table: one row per zone, scalar fields as columns,
    /// `features`/`indicator_context` flattened to JSON-string columns (spec
    /// §4.7 "sidecar JSON for nested structures").
    fn zones_as_table(&self) -> Result<DataFrame> {
        let zone_id: Vec<String> = self.zones.iter().map(|z| z.zone_id.to_string()).collect();
        let zone_type: Vec<String> = self.zones.iter().map(|z| z.zone_type.clone()).collect();
        let start_idx: Vec<i64> = self.zones.iter().map(|z| z.start_idx as i64).collect();
        let end_idx: Vec<i64> = self.zones.iter().map(|z| z.end_idx as i64).collect();
        let duration: Vec<i64> = self.zones.iter().map(|z| z.duration() as i64).collect();
        let start_time: Vec<String> = self.zones.iter().map(|z| z.start_time.and_utc().to_rfc3339()).collect();
        let end_time: Vec<String> = self.zones.iter().map(|z| z.end_time.and_utc().to_rfc3339()).collect();
        let features: Vec<String> = self
            .zones
            .iter()
            .map(|z| serde_json::to_string(&z.features).unwrap_or_default())
            .collect();
        let indicator_context: Vec<String> = self
            .zones
            .iter()
            .map(|z| serde_json::to_string(&z.indicator_context.0).unwrap_or_default())
            .collect();

        Ok(df! {
            "zone_id" => zone_id,
            "zone_type" => zone_type,
            "start_idx" => start_idx,
            "end_idx" => end_idx,
            "duration" => duration,
            "start_time" => start_time,
            "end_time" => end_time,
            "features_json" => features,
            "indicator_context_json" => indicator_context,
        }?)
    }

    /// Reconstruct a result from disk. Zones loaded from the structured-text
    /// or columnar formats carry an empty `data` frame (spec §4.7 "loaders
    /// reconstruct zones without their data when that slice was not
    /// persisted"); only the binary format restores per-zone `data`.
    pub fn load(path: impl AsRef<Path>, format: PersistFormat) -> Result<Self> {
        let path = path.as_ref();
        match format {
            PersistFormat::StructuredText => {
                let text = fs::read_to_string(path).map_err(|e| ZoneError::data(format!("failed to read {}: {e}", path.display())))?;
                let value: Value = serde_json::from_str(&text).map_err(|e| ZoneError::data(format!("invalid result JSON: {e}")))?;
                Self::from_aggregation_payload(value, None)
            }
            PersistFormat::Binary => {
                let manifest_text = fs::read_to_string(path.join("manifest.json"))
                    .map_err(|e| ZoneError::data(format!("failed to read manifest: {e}")))?;
                let manifest: Value = serde_json::from_str(&manifest_text).map_err(|e| ZoneError::data(format!("invalid manifest JSON: {e}")))?;
                let data = if manifest["has_data"].as_bool().unwrap_or(false) {
                    Some(read_parquet(&path.join("data.parquet"))?)
                } else {
                    None
                };
                let zones_dir = path.join("zones");
                let mut result = Self::from_aggregation_payload(manifest, data)?;
                for zone in &mut result.zones {
                    let zone_file = zones_dir.join(format!("{}.parquet", zone.zone_id));
                    if zone_file.exists() {
                        zone.data = read_parquet(&zone_file)?;
                    }
                }
                Ok(result)
            }
            PersistFormat::Columnar => {
                let table = read_parquet(&path.join("zones.parquet"))?;
                let sidecar_text = fs::read_to_string(path.join("sidecar.json"))
                    .map_err(|e| ZoneError::data(format!("failed to read sidecar: {e}")))?;
                let sidecar: Value = serde_json::from_str(&sidecar_text).map_err(|e| ZoneError::data(format!("invalid sidecar JSON: {e}")))?;
                Self::from_columnar(&table, sidecar)
            }
        }
    }

    fn from_aggregation_payload(value: Value, data: Option<DataFrame>) -> Result<Self> {
        let zones = value["zones"]
            .as_array()
            .ok_or_else(|| ZoneError::data("result JSON missing 'zones' array"))?
            .iter()
            .map(zone_from_serializable)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            zones,
            data,
            distribution: serde_json::from_value(value["distribution"].clone()).map_err(|e| ZoneError::data(e.to_string()))?,
            hypothesis_tests: serde_json::from_value(value["hypothesis_tests"].clone()).map_err(|e| ZoneError::data(e.to_string()))?,
            sequence_analysis: serde_json::from_value(value["sequence_analysis"].clone()).unwrap_or(None),
            clustering: serde_json::from_value(value["clustering"].clone()).unwrap_or(None),
            regression: serde_json::from_value(value["regression"].clone()).unwrap_or_default(),
            validation: serde_json::from_value(value["validation"].clone()).unwrap_or(None),
            metadata: serde_json::from_value(value["metadata"].clone()).map_err(|e| ZoneError::data(e.to_string()))?,
        })
    }

    fn from_columnar(table: &DataFrame, sidecar: Value) -> Result<Self> {
        let height = table.height();
        let zone_id = table.column("zone_id")?.str()?;
        let zone_type = table.column("zone_type")?.str()?;
        let start_idx = table.column("start_idx")?.i64()?;
        let end_idx = table.column("end_idx")?.i64()?;
        let features_json = table.column("features_json")?.str()?;
        let indicator_context_json = table.column("indicator_context_json")?.str()?;

        let mut zones = Vec::with_capacity(height);
        for row in 0..height {
            let features: crate::zone::FeatureMap = features_json
                .get(row)
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            let indicator_context = indicator_context_json
                .get(row)
                .and_then(|s| serde_json::from_str(s).ok())
                .map(IndicatorContext)
                .unwrap_or_default();
            let mut zone = Zone::new(
                ZoneId::Str(zone_id.get(row).unwrap_or_default().to_string()),
                zone_type.get(row).unwrap_or_default(),
                start_idx.get(row).unwrap_or_default() as usize,
                end_idx.get(row).unwrap_or_default() as usize,
                chrono::Utc::now().naive_utc(),
                chrono::Utc::now().naive_utc(),
                DataFrame::empty(),
                indicator_context,
            )?;
            zone.features = features;
            zones.push(zone);
        }

        Ok(Self {
            zones,
            data: None,
            distribution: serde_json::from_value(sidecar["distribution"].clone()).map_err(|e| ZoneError::data(e.to_string()))?,
            hypothesis_tests: serde_json::from_value(sidecar["hypothesis_tests"].clone()).map_err(|e| ZoneError::data(e.to_string()))?,
            sequence_analysis: serde_json::from_value(sidecar["sequence_analysis"].clone()).unwrap_or(None),
            clustering: serde_json::from_value(sidecar["clustering"].clone()).unwrap_or(None),
            regression: serde_json::from_value(sidecar["regression"].clone()).unwrap_or_default(),
            validation: serde_json::from_value(sidecar["validation"].clone()).unwrap_or(None),
            metadata: serde_json::from_value(sidecar["metadata"].clone()).map_err(|e| ZoneError::data(e.to_string()))?,
        })
    }
}

fn zone_from_serializable(value: &Value) -> Result<Zone> {
    let zone_id = match &value["zone_id"] {
        Value::Number(n) => ZoneId::Int(n.as_i64().unwrap_or_default()),
        Value::String(s) => ZoneId::Str(s.clone()),
        _ => return Err(ZoneError::data("zone JSON missing 'zone_id'")),
    };
    let zone_type = value["type"].as_str().ok_or_else(|| ZoneError::data("zone JSON missing 'type'"))?;
    let start_idx = value["start_idx"].as_u64().ok_or_else(|| ZoneError::data("zone JSON missing 'start_idx'"))? as usize;
    let end_idx = value["end_idx"].as_u64().ok_or_else(|| ZoneError::data("zone JSON missing 'end_idx'"))? as usize;
    let start_time = value["start_time"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| ZoneError::data("zone JSON has invalid 'start_time'"))?;
    let end_time = value["end_time"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| ZoneError::data("zone JSON has invalid 'end_time'"))?;
    let indicator_context = value["indicator_context"]
        .as_object()
        .cloned()
        .map(IndicatorContext)
        .unwrap_or_default();
    let mut zone = Zone::new(zone_id, zone_type, start_idx, end_idx, start_time, end_time, DataFrame::empty(), indicator_context)?;
    zone.features = value["features"].as_object().cloned().unwrap_or_default();
    Ok(zone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::distribution::compute_distribution_summary;
    use crate::stats::HypothesisBatterySummary;
    use crate::zone::ZoneId;
    use chrono::NaiveDate;

    fn t(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn sample_result() -> ZoneAnalysisResult {
        let df = df! { "close" => &[1.0, 2.0, 3.0] }.unwrap();
        let ctx = IndicatorContext::new().with("detection_strategy", "zero_crossing").with("detection_indicator", "osc");
        let mut zone = Zone::new(ZoneId::Int(0), "bull", 0, 2, t(1), t(3), df, ctx).unwrap();
        zone.features.insert("duration".to_string(), json!(3));
        zone.features.insert("price_return".to_string(), json!(0.05));
        let zones = vec![zone];
        let distribution = compute_distribution_summary(&zones);
        ZoneAnalysisResult {
            zones,
            data: None,
            distribution,
            hypothesis_tests: HypothesisBatterySummary::default(),
            sequence_analysis: None,
            clustering: None,
            regression: RegressionBundle::default(),
            validation: None,
            metadata: ResultMetadata {
                analysis_timestamp: "2024-01-04T00:00:00Z".to_string(),
                total_zones: 1,
                zone_types: vec!["bull".to_string()],
                clustering_performed: false,
                regression_performed: false,
                validation_performed: false,
                symbol: Some("TEST".to_string()),
                timeframe: Some("1d".to_string()),
                source: None,
                cache_key_policy: None,
            },
        }
    }

    #[test]
    fn structured_text_round_trips_without_zone_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let result = sample_result();
        result.save(&path, PersistFormat::StructuredText).unwrap();
        let loaded = ZoneAnalysisResult::load(&path, PersistFormat::StructuredText).unwrap();
        assert_eq!(loaded.zones.len(), 1);
        assert_eq!(loaded.zones[0].zone_type, "bull");
        assert_eq!(loaded.zones[0].data.height(), 0);
        assert_eq!(loaded.metadata.symbol.as_deref(), Some("TEST"));
    }

    #[test]
    fn binary_round_trips_zone_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result_dir");
        let result = sample_result();
        result.save(&path, PersistFormat::Binary).unwrap();
        let loaded = ZoneAnalysisResult::load(&path, PersistFormat::Binary).unwrap();
        assert_eq!(loaded.zones[0].data.height(), 3);
    }

    #[test]
    fn columnar_round_trips_features_via_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("columnar_dir");
        let result = sample_result();
        result.save(&path, PersistFormat::Columnar).unwrap();
        let loaded = ZoneAnalysisResult::load(&path, PersistFormat::Columnar).unwrap();
        assert_eq!(loaded.zones.len(), 1);
        assert_eq!(loaded.zones[0].features["price_return"], json!(0.05));
    }
}
