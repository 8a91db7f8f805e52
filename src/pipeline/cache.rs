//! Content-hash keyed result cache (§4.6 "Cache"). Grounded on
//! `trendlab-core::domain::ids` (BLAKE3 hash wrapper) and
//! `trendlab-core::data::cache::ParquetCache` (hash-tagged metadata sidecar),
//! adapted here to an in-process `HashMap<CacheKey, CacheEntry>` rather than
//! a parquet-backed disk cache, since the cached value (`ZoneAnalysisResult`)
//! already owns its own persistence via [`crate::result`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use polars::prelude::*;
use serde_json::Value;

use crate::result::ZoneAnalysisResult;

/// Bumped on breaking changes to what gets hashed or how a cached result is
/// shaped, so stale entries from an older crate version never get served.
pub const CACHE_VERSION: u32 = 1;

/// Chosen answer to the §8 scenario-6 open question: column order is
/// significant. Reordering the same columns with the same values produces a
/// different `data_hash` and therefore a cache miss, rather than being
/// canonicalized to the same key. Stamped into `ResultMetadata::cache_key_policy`
/// by the builder so it is visible on every result, not just in this module.
pub const CACHE_KEY_POLICY: &str = "column_order_significant";

/// `blake3` over the data's column names, dtypes, and row values in column
/// order — content identity, not column order identity (reordering the same
/// columns changes the hash, matching "hash of values and index").
fn hash_dataframe(df: &DataFrame) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&df.height().to_le_bytes());
    for name in df.get_column_names() {
        hasher.update(name.as_bytes());
        if let Ok(col) = df.column(name) {
            hasher.update(format!("{:?}", col.dtype()).as_bytes());
            if let Ok(s) = col.cast(&DataType::String) {
                if let Ok(ca) = s.str() {
                    for v in ca.into_iter().flatten() {
                        hasher.update(v.as_bytes());
                    }
                }
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// `blake3` over a canonical JSON encoding of the builder's config (every
/// field except callables, per §4.6). Serde's `Map<String, Value>` preserves
/// insertion order, not sort order, so callers must build `config` with a
/// stable field order (the builder always serializes fields in declaration
/// order) for this to be deterministic across runs.
fn hash_config(config: &Value) -> String {
    blake3::hash(config.to_string().as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    version: u32,
    data_hash: String,
    config_hash: String,
}

impl CacheKey {
    pub fn new(df: &DataFrame, config: &Value) -> Self {
        Self {
            version: CACHE_VERSION,
            data_hash: hash_dataframe(df),
            config_hash: hash_config(config),
        }
    }
}

struct CacheEntry {
    result: ZoneAnalysisResult,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.inserted_at.elapsed() > ttl)
    }
}

/// In-process cache of full `ZoneAnalysisResult`s keyed by `(CACHE_VERSION,
/// data_hash, config_hash)`. One `ZoneAnalysisBuilder` owns one cache
/// instance; sharing across builders is a caller concern.
#[derive(Default)]
pub struct ZoneAnalysisCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ZoneAnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a cached result, cloning it out (§5: "a hit returns a
    /// logically immutable result"). Evicts the entry in place if its TTL
    /// has elapsed, so an expired hit is indistinguishable from a miss.
    pub fn get(&mut self, key: &CacheKey) -> Option<ZoneAnalysisResult> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                if entry.get().is_expired() {
                    entry.remove();
                    None
                } else {
                    Some(entry.get().result.clone())
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Overwrites any existing entry for `key` (§5: "concurrent writers for
    /// the same key race, and the last writer wins").
    pub fn insert(&mut self, key: CacheKey, result: ZoneAnalysisResult, ttl_seconds: Option<u64>) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
                ttl: ttl_seconds.map(Duration::from_secs),
            },
        );
    }
}

/// Process-wide cache instance (§5 "Shared resource policy": one in-memory
/// store shared by every `build()` call in the process, not one per
/// builder). Lazily initialized on first use.
pub fn global() -> &'static Mutex<ZoneAnalysisCache> {
    static CACHE: OnceLock<Mutex<ZoneAnalysisCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(ZoneAnalysisCache::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::distribution::compute_distribution_summary;
    use crate::stats::HypothesisBatterySummary;
    use crate::zone::{IndicatorContext, Zone, ZoneId};
    use crate::result::{RegressionBundle, ResultMetadata};
    use chrono::NaiveDate;

    fn t(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn sample_result() -> ZoneAnalysisResult {
        let df = df! { "close" => &[1.0, 2.0] }.unwrap();
        let zone = Zone::new(ZoneId::Int(0), "bull", 0, 1, t(1), t(2), df, IndicatorContext::new()).unwrap();
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
                analysis_timestamp: "x".to_string(),
                total_zones: 1,
                zone_types: vec!["bull".to_string()],
                clustering_performed: false,
                regression_performed: false,
                validation_performed: false,
                symbol: None,
                timeframe: None,
                source: None,
                cache_key_policy: Some(CACHE_KEY_POLICY.to_string()),
            },
        }
    }

    #[test]
    fn identical_data_and_config_hash_to_the_same_key() {
        let df = df! { "close" => &[1.0, 2.0, 3.0] }.unwrap();
        let config = serde_json::json!({"strategy": "zero_crossing"});
        let k1 = CacheKey::new(&df, &config);
        let k2 = CacheKey::new(&df, &config);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_data_hashes_to_a_different_key() {
        let df1 = df! { "close" => &[1.0, 2.0, 3.0] }.unwrap();
        let df2 = df! { "close" => &[1.0, 2.0, 4.0] }.unwrap();
        let config = serde_json::json!({"strategy": "zero_crossing"});
        assert_ne!(CacheKey::new(&df1, &config), CacheKey::new(&df2, &config));
    }

    #[test]
    fn cache_hit_after_insert() {
        let df = df! { "close" => &[1.0, 2.0] }.unwrap();
        let config = serde_json::json!({"strategy": "zero_crossing"});
        let key = CacheKey::new(&df, &config);
        let mut cache = ZoneAnalysisCache::new();
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), sample_result(), None);
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn expired_entry_is_evicted() {
        let df = df! { "close" => &[1.0, 2.0] }.unwrap();
        let config = serde_json::json!({"strategy": "zero_crossing"});
        let key = CacheKey::new(&df, &config);
        let mut cache = ZoneAnalysisCache::new();
        cache.insert(key.clone(), sample_result(), Some(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }
}
