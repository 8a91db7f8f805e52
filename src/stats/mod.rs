//! Statistical aggregation over a zone population (C5): distribution
//! summaries, a fixed hypothesis-test battery, sequence analysis, and
//! optional clustering/regression/validation.

pub mod clustering;
pub mod distribution;
pub mod hypothesis;
pub mod regression;
pub mod sequence;
pub mod validation;

use serde::{Deserialize, Serialize};

/// `{statistic, p_value, alpha, significant, effect_size, metadata}` — the
/// one record shape every hypothesis test returns, run or skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisTestRecord {
    pub test_name: String,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub alpha: f64,
    pub significant: Option<bool>,
    pub effect_size: Option<f64>,
    pub metadata: serde_json::Value,
    pub skipped_reason: Option<String>,
}

impl HypothesisTestRecord {
    pub fn skipped(test_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            statistic: None,
            p_value: None,
            alpha: 0.05,
            significant: None,
            effect_size: None,
            metadata: serde_json::json!({}),
            skipped_reason: Some(reason.into()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ran(
        test_name: impl Into<String>,
        statistic: f64,
        p_value: f64,
        alpha: f64,
        effect_size: Option<f64>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            statistic: Some(statistic),
            p_value: Some(p_value),
            alpha,
            significant: Some(p_value < alpha),
            effect_size,
            metadata,
            skipped_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HypothesisBatterySummary {
    pub total_tests: usize,
    pub significant_tests: usize,
    pub skipped_tests: usize,
    pub tests: Vec<HypothesisTestRecord>,
}

impl HypothesisBatterySummary {
    pub fn from_records(tests: Vec<HypothesisTestRecord>) -> Self {
        let significant_tests = tests.iter().filter(|t| t.significant == Some(true)).count();
        let skipped_tests = tests.iter().filter(|t| t.skipped_reason.is_some()).count();
        Self {
            total_tests: tests.len(),
            significant_tests,
            skipped_tests,
            tests,
        }
    }
}
