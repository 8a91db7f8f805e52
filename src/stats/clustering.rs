//! K-means clustering over a standardized feature subset (spec §4.5
//! "Clustering"). Runs only when enabled and `|zones| >= n_clusters`.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::zone::Zone;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringResult {
    pub labels: Vec<usize>,
    pub cluster_sizes: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub feature_names: Vec<String>,
    pub feature_importance: Vec<f64>,
    pub n_clusters: usize,
    pub iterations: usize,
}

fn standardize(columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    columns
        .iter()
        .map(|col| {
            let n = col.len() as f64;
            let mean = col.iter().sum::<f64>() / n;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            if std > 0.0 {
                col.iter().map(|v| (v - mean) / std).collect()
            } else {
                vec![0.0; col.len()]
            }
        })
        .collect()
}

fn euclidean_dist(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (a - b).norm()
}

/// Deterministic seeding (first `k` rows) rather than random restarts, to
/// keep a cache hit reproducible for identical input and config (spec §5
/// "Hypothesis tests and aggregations are order-deterministic given
/// identical input and seed").
fn kmeans(rows: &[DVector<f64>], k: usize, max_iter: usize) -> (Vec<usize>, Vec<DVector<f64>>, usize) {
    let dim = rows[0].len();
    let mut centroids: Vec<DVector<f64>> = (0..k).map(|i| rows[i % rows.len()].clone()).collect();
    let mut labels = vec![0usize; rows.len()];
    let mut iterations = 0;

    for _ in 0..max_iter {
        iterations += 1;
        let mut changed = false;
        for (i, row) in rows.iter().enumerate() {
            let (best, _) = centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| (c, euclidean_dist(row, centroid)))
                .fold((0usize, f64::MAX), |acc, x| if x.1 < acc.1 { x } else { acc });
            if labels[i] != best {
                changed = true;
            }
            labels[i] = best;
        }
        if !changed && iterations > 1 {
            break;
        }
        for c in 0..k {
            let members: Vec<&DVector<f64>> = rows.iter().zip(labels.iter()).filter(|(_, l)| **l == c).map(|(r, _)| r).collect();
            if members.is_empty() {
                continue;
            }
            let mut sum = DVector::zeros(dim);
            for m in &members {
                sum += *m;
            }
            centroids[c] = sum / members.len() as f64;
        }
    }
    (labels, centroids, iterations)
}

/// `feature_names` fixes which zone features feed the model, in order.
/// Zones missing a value contribute `0.0` post-standardization (treated as
/// "at the mean").
pub fn run_kmeans(zones: &[Zone], feature_names: &[String], n_clusters: usize) -> Option<ClusteringResult> {
    if zones.len() < n_clusters || n_clusters == 0 {
        return None;
    }
    let columns: Vec<Vec<f64>> = feature_names
        .iter()
        .map(|name| {
            zones
                .iter()
                .map(|z| z.features.get(name).and_then(|v| v.as_f64()).unwrap_or(f64::NAN))
                .map(|v| if v.is_finite() { v } else { 0.0 })
                .collect()
        })
        .collect();
    let standardized = standardize(&columns);

    let rows: Vec<DVector<f64>> = (0..zones.len())
        .map(|i| DVector::from_vec(standardized.iter().map(|col| col[i]).collect()))
        .collect();

    let (labels, centroids, iterations) = kmeans(&rows, n_clusters, 100);

    let mut cluster_sizes = vec![0usize; n_clusters];
    for &l in &labels {
        cluster_sizes[l] += 1;
    }

    // Feature importance: inter-cluster centroid variance per feature dimension.
    let feature_importance: Vec<f64> = (0..feature_names.len())
        .map(|dim| {
            let values: Vec<f64> = centroids.iter().map(|c| c[dim]).collect();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
        })
        .collect();

    Some(ClusteringResult {
        labels,
        cluster_sizes,
        centroids: centroids.into_iter().map(|c| c.iter().copied().collect()).collect(),
        feature_names: feature_names.to_vec(),
        feature_importance,
        n_clusters,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{IndicatorContext, ZoneId};
    use chrono::NaiveDate;
    use polars::prelude::*;

    fn t(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn zone_with(duration_feature: f64, ret: f64) -> Zone {
        let df = df! { "close" => &[1.0] }.unwrap();
        let mut z = Zone::new(ZoneId::Int(0), "bull", 0, 0, t(1), t(1), df, IndicatorContext::new()).unwrap();
        z.features.insert("duration".to_string(), serde_json::json!(duration_feature));
        z.features.insert("price_return".to_string(), serde_json::json!(ret));
        z
    }

    #[test]
    fn too_few_zones_returns_none() {
        let zones = vec![zone_with(1.0, 0.1), zone_with(2.0, 0.2)];
        assert!(run_kmeans(&zones, &["duration".to_string()], 3).is_none());
    }

    #[test]
    fn separable_clusters_get_distinct_labels() {
        let zones = vec![
            zone_with(1.0, 0.01),
            zone_with(1.2, 0.01),
            zone_with(50.0, 5.0),
            zone_with(52.0, 5.1),
        ];
        let result = run_kmeans(&zones, &["duration".to_string(), "price_return".to_string()], 2).unwrap();
        assert_eq!(result.labels.len(), 4);
        assert_eq!(result.labels[0], result.labels[1]);
        assert_eq!(result.labels[2], result.labels[3]);
        assert_ne!(result.labels[0], result.labels[2]);
    }
}
