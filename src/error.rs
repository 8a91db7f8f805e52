use thiserror::Error;

/// Crate-level error, named after the semantic kinds the pipeline can fail with.
///
/// `Config` and `Data` halt `build()` before any partial result is produced.
/// `InsufficientData`, `Cache`, and `Strategy` are recovered locally by the
/// component that encounters them and never escape a successful `build()` call.
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("config error: {0}")]
    Config(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("strategy failure in '{strategy}': {reason}")]
    Strategy { strategy: String, reason: String },
}

impl ZoneError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn strategy(strategy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Strategy {
            strategy: strategy.into(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for ZoneError {
    fn from(e: polars::error::PolarsError) -> Self {
        Self::Data(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ZoneError>;
