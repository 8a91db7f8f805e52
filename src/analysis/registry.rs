//! Name -> strategy resolution, mirroring `detection::build_strategy` and,
//! further back, the teacher's `signals::registry::build_signal`.

use super::{divergence::DivergenceStrategy, shape::ShapeStrategy, volatility::VolatilityStrategy, volume::VolumeStrategy};
use super::swing::{SwingAlgorithm, SwingStrategy};
use super::AnalyticalStrategy;
use crate::error::{Result, ZoneError};

/// Resolve an analytical-strategy registry name to its implementation.
///
/// Swing has three interchangeable algorithms sharing one record shape
/// (spec §4.3.1); they are exposed as three catalog entries rather than one
/// entry with a sub-parameter, matching how the other four families are
/// each addressed by a single flat name.
pub fn build_strategy(name: &str) -> Result<Box<dyn AnalyticalStrategy>> {
    match name {
        "swing" | "swing_zigzag" | "zigzag" => Ok(Box::new(SwingStrategy::new(SwingAlgorithm::ZigZag {
            legs: 3,
            deviation_pct: 1.0,
        }))),
        "swing_peak_finding" | "peak_finding" => Ok(Box::new(SwingStrategy::new(SwingAlgorithm::PeakFinding {
            prominence: None,
            distance: 1,
            min_amplitude_pct: 0.0,
        }))),
        "swing_pivot_points" | "pivot_points" => Ok(Box::new(SwingStrategy::new(SwingAlgorithm::PivotPoints {
            left_bars: 2,
            right_bars: 2,
            min_amplitude_pct: 0.0,
        }))),
        "shape" => Ok(Box::new(ShapeStrategy::default())),
        "divergence" => Ok(Box::new(DivergenceStrategy::default())),
        "volatility" => Ok(Box::new(VolatilityStrategy::default())),
        "volume" => Ok(Box::new(VolumeStrategy)),
        other => Err(ZoneError::config(format!("unknown analytical strategy '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_is_config_error() {
        let err = build_strategy("not_a_strategy").unwrap_err();
        assert!(matches!(err, ZoneError::Config(_)));
    }

    #[test]
    fn all_five_families_resolve() {
        for name in ["swing", "shape", "divergence", "volatility", "volume"] {
            assert!(build_strategy(name).is_ok(), "{name} should resolve");
        }
    }
}
