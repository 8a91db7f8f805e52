//! Pipeline orchestration (C6): the fluent builder and its result cache.

pub mod builder;
pub mod cache;

pub use builder::{AnalysisOptions, ZoneAnalysisBuilder};
pub use cache::{CacheKey, ZoneAnalysisCache, CACHE_VERSION};
