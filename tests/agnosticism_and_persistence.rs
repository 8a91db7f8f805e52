//! Indicator-agnosticism and result-persistence scenarios run end to end
//! (spec §8 scenario 4, round-trip invariant, cache invariant).

mod common;

use bquant_zones::detection::DetectionRules;
use bquant_zones::pipeline::ZoneAnalysisBuilder;
use bquant_zones::result::PersistFormat;

fn full_pipeline_result(column_name: &str) -> bquant_zones::result::ZoneAnalysisResult {
    let df = common::agnostic_column_series(200, column_name);
    ZoneAnalysisBuilder::new(df)
        .detect_zones("zero_crossing", DetectionRules::zero_crossing(column_name))
        .with_strategies(
            Some("swing".to_string()),
            Some("shape".to_string()),
            Some("divergence".to_string()),
            Some("volatility".to_string()),
            Some("volume".to_string()),
        )
        .build()
        .unwrap()
}

#[test]
fn arbitrary_column_name_runs_the_full_pipeline_without_branching_on_it() {
    let result = full_pipeline_result("WHATEVER_42");
    assert!(!result.zones.is_empty());
    for zone in &result.zones {
        let shape = &zone.features["metadata"]["shape_metrics"];
        assert_eq!(shape["strategy_params"]["indicator_col"], "WHATEVER_42");
        assert!(zone.features.get("hist_amplitude").is_some());
    }
}

#[test]
fn swapping_indicator_column_name_changes_nothing_but_the_context() {
    let a = full_pipeline_result("COLUMN_A");
    let b = full_pipeline_result("COLUMN_B");
    assert_eq!(a.zones.len(), b.zones.len());
    for (za, zb) in a.zones.iter().zip(b.zones.iter()) {
        assert_eq!(za.zone_type, zb.zone_type);
        assert_eq!(za.features["duration"], zb.features["duration"]);
    }
}

#[test]
fn structured_text_round_trip_preserves_every_field_but_zone_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.json");
    let result = full_pipeline_result("osc");

    result.save(&path, PersistFormat::StructuredText).unwrap();
    let loaded = bquant_zones::result::ZoneAnalysisResult::load(&path, PersistFormat::StructuredText).unwrap();

    assert_eq!(loaded.zones.len(), result.zones.len());
    for (original, reloaded) in result.zones.iter().zip(loaded.zones.iter()) {
        assert_eq!(original.zone_type, reloaded.zone_type);
        assert_eq!(original.features, reloaded.features);
        assert_eq!(reloaded.data.height(), 0);
    }
    assert_eq!(loaded.metadata.total_zones, result.metadata.total_zones);
}

#[test]
fn binary_round_trip_preserves_per_zone_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result_dir");
    let result = full_pipeline_result("osc");

    result.save(&path, PersistFormat::Binary).unwrap();
    let loaded = bquant_zones::result::ZoneAnalysisResult::load(&path, PersistFormat::Binary).unwrap();

    for (original, reloaded) in result.zones.iter().zip(loaded.zones.iter()) {
        assert_eq!(original.data.height(), reloaded.data.height());
    }
}

#[test]
fn repeated_build_with_identical_input_and_config_hits_the_cache() {
    let df = common::sine_oscillator_series(200, 50.0);
    let run = || {
        ZoneAnalysisBuilder::new(df.clone())
            .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
            .with_cache(true, None)
            .build()
            .unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.metadata.total_zones, second.metadata.total_zones);
    assert_eq!(first.metadata.analysis_timestamp, second.metadata.analysis_timestamp);
}

#[test]
fn changing_the_config_after_a_cached_run_does_not_reuse_the_stale_result() {
    let df = common::sine_oscillator_series(200, 50.0);
    let cached = ZoneAnalysisBuilder::new(df.clone())
        .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
        .with_cache(true, None)
        .build()
        .unwrap();
    let different = ZoneAnalysisBuilder::new(df)
        .detect_zones("zero_crossing", DetectionRules::zero_crossing("osc"))
        .with_min_duration(5)
        .with_cache(true, None)
        .build()
        .unwrap();
    assert_ne!(cached.metadata.analysis_timestamp, different.metadata.analysis_timestamp);
}
