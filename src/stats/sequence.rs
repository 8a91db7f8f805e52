//! Sequence analysis over consecutive zone types (spec §4.5 "Sequence
//! analysis"): transition counts, transition probabilities, and optional
//! pattern mining of short subsequences. Omitted entirely when fewer than 3
//! zones are present (spec §8 boundary behaviors).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::zone::Zone;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SequenceAnalysis {
    pub transitions: BTreeMap<String, usize>,
    pub transition_probabilities: BTreeMap<String, f64>,
    pub patterns_length_2: BTreeMap<String, usize>,
    pub patterns_length_3: BTreeMap<String, usize>,
}

fn transition_key(from: &str, to: &str) -> String {
    format!("{from}_to_{to}")
}

/// `None` when `zones.len() < 3` (spec §8: "< 3 zones -> sequence_analysis omitted").
pub fn compute_sequence_analysis(zones: &[Zone]) -> Option<SequenceAnalysis> {
    if zones.len() < 3 {
        return None;
    }
    let types: Vec<&str> = zones.iter().map(|z| z.zone_type.as_str()).collect();

    let mut transitions: BTreeMap<String, usize> = BTreeMap::new();
    let mut from_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for w in types.windows(2) {
        *transitions.entry(transition_key(w[0], w[1])).or_insert(0) += 1;
        *from_counts.entry(w[0]).or_insert(0) += 1;
    }

    let mut transition_probabilities = BTreeMap::new();
    for (key, count) in &transitions {
        let from = key.split("_to_").next().unwrap_or_default();
        let total_from = from_counts.get(from).copied().unwrap_or(1);
        transition_probabilities.insert(key.clone(), *count as f64 / total_from as f64);
    }

    let mut patterns_length_2: BTreeMap<String, usize> = BTreeMap::new();
    for w in types.windows(2) {
        *patterns_length_2.entry(w.join("->")).or_insert(0) += 1;
    }
    let mut patterns_length_3: BTreeMap<String, usize> = BTreeMap::new();
    for w in types.windows(3) {
        *patterns_length_3.entry(w.join("->")).or_insert(0) += 1;
    }

    Some(SequenceAnalysis {
        transitions,
        transition_probabilities,
        patterns_length_2,
        patterns_length_3,
    })
}
