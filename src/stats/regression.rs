//! OLS regression over the zone population (spec §4.5 "Regression"): runs
//! only when enabled and `|zones| > 10`. Two named models share one engine:
//! `predict_zone_duration` and `predict_price_return`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

use crate::zone::Zone;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coefficient {
    pub predictor: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub vif: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionResult {
    pub target: String,
    pub n: usize,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    pub f_statistic: f64,
    pub f_p_value: f64,
    pub aic: f64,
    pub bic: f64,
    pub durbin_watson: f64,
    pub condition_number: f64,
    pub coefficients: Vec<Coefficient>,
    pub predictions: Vec<f64>,
    pub residuals: Vec<f64>,
}

fn design_matrix(predictors: &[Vec<f64>], n: usize) -> DMatrix<f64> {
    let k = predictors.len() + 1;
    let mut data = vec![0.0; n * k];
    for row in 0..n {
        data[row * k] = 1.0;
        for (col, predictor) in predictors.iter().enumerate() {
            data[row * k + col + 1] = predictor[row];
        }
    }
    DMatrix::from_row_slice(n, k, &data)
}

fn variance_inflation_factors(predictors: &[Vec<f64>], n: usize) -> Vec<Option<f64>> {
    predictors
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if predictors.len() < 2 {
                return None;
            }
            let others: Vec<Vec<f64>> = predictors
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| p.clone())
                .collect();
            let x = design_matrix(&others, n);
            let y = DVector::from_vec(predictors[i].clone());
            let xtx = x.transpose() * &x;
            let xtx_inv = xtx.try_inverse()?;
            let beta = &xtx_inv * x.transpose() * &y;
            let fitted = &x * beta;
            let residuals = &y - fitted;
            let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
            let mean_y = y.iter().sum::<f64>() / y.len() as f64;
            let ss_tot: f64 = y.iter().map(|v| (v - mean_y).powi(2)).sum();
            if ss_tot <= 0.0 {
                return None;
            }
            let r2 = 1.0 - ss_res / ss_tot;
            if (1.0 - r2).abs() < 1e-9 {
                None
            } else {
                Some(1.0 / (1.0 - r2))
            }
        })
        .collect()
}

/// Ordinary least squares via QR-free normal equations (`(X'X)^-1 X'y`),
/// matching `nalgebra`'s dense linear-algebra idiom used elsewhere in this
/// crate for clustering centroid math.
pub fn ols(target: &str, y: &[f64], predictor_names: &[String], predictors: &[Vec<f64>]) -> Option<RegressionResult> {
    let n = y.len();
    let k = predictors.len() + 1;
    if n <= k || n == 0 {
        return None;
    }

    let x = design_matrix(predictors, n);
    let y_vec = DVector::from_vec(y.to_vec());
    let xtx = x.transpose() * &x;
    let xtx_inv = xtx.clone().try_inverse()?;
    let beta = &xtx_inv * x.transpose() * &y_vec;

    let fitted = &x * &beta;
    let residuals = &y_vec - &fitted;
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    let mean_y = y_vec.iter().sum::<f64>() / y_vec.len() as f64;
    let ss_tot: f64 = y_vec.iter().map(|v| (v - mean_y).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    let df_model = (k - 1) as f64;
    let df_resid = (n - k) as f64;
    let adjusted_r_squared = if df_resid > 0.0 {
        1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / df_resid
    } else {
        r_squared
    };

    let mse = if df_resid > 0.0 { ss_res / df_resid } else { f64::NAN };
    let f_statistic = if df_model > 0.0 && mse > 0.0 {
        (ss_tot - ss_res) / df_model / mse
    } else {
        0.0
    };
    let f_p_value = FisherSnedecor::new(df_model, df_resid)
        .ok()
        .map(|dist| 1.0 - dist.cdf(f_statistic.max(0.0)))
        .unwrap_or(1.0);

    let log_likelihood = if mse > 0.0 {
        -0.5 * n as f64 * ((2.0 * std::f64::consts::PI * mse).ln() + 1.0)
    } else {
        0.0
    };
    let aic = 2.0 * k as f64 - 2.0 * log_likelihood;
    let bic = (n as f64).ln() * k as f64 - 2.0 * log_likelihood;

    let dw_num: f64 = residuals.as_slice().windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    let dw_den: f64 = residuals.iter().map(|r| r * r).sum();
    let durbin_watson = if dw_den > 0.0 { dw_num / dw_den } else { f64::NAN };

    let condition_number = {
        let svd = x.clone().svd(false, false);
        let singular_values = svd.singular_values;
        let max_sv = singular_values.iter().cloned().fold(0.0_f64, f64::max);
        let min_sv = singular_values.iter().cloned().fold(f64::MAX, f64::min);
        if min_sv > 1e-12 { max_sv / min_sv } else { f64::INFINITY }
    };

    let se_matrix = xtx_inv.diagonal().map(|v| (v * mse).max(0.0).sqrt());
    let t_dist = StudentsT::new(0.0, 1.0, df_resid.max(1.0)).ok();
    let vifs = variance_inflation_factors(predictors, n);

    let mut coefficients = Vec::with_capacity(k);
    let names: Vec<String> = std::iter::once("intercept".to_string()).chain(predictor_names.iter().cloned()).collect();
    for (i, name) in names.iter().enumerate() {
        let estimate = beta[i];
        let std_error = se_matrix[i];
        let t_stat = if std_error > 0.0 { estimate / std_error } else { 0.0 };
        let p_value = t_dist
            .as_ref()
            .map(|dist| 2.0 * (1.0 - dist.cdf(t_stat.abs())))
            .unwrap_or(1.0);
        coefficients.push(Coefficient {
            predictor: name.clone(),
            estimate,
            std_error,
            t_statistic: t_stat,
            p_value,
            vif: if i == 0 { None } else { vifs.get(i - 1).copied().flatten() },
        });
    }

    Some(RegressionResult {
        target: target.to_string(),
        n,
        r_squared,
        adjusted_r_squared,
        f_statistic,
        f_p_value,
        aic,
        bic,
        durbin_watson,
        condition_number,
        coefficients,
        predictions: fitted.iter().copied().collect(),
        residuals: residuals.iter().copied().collect(),
    })
}

fn feature(zones: &[Zone], key: &str) -> Vec<f64> {
    zones.iter().map(|z| z.features.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)).collect()
}

/// `predict_zone_duration`: duration ~ amplitude + shape skewness + correlation.
pub fn predict_zone_duration(zones: &[Zone]) -> Option<RegressionResult> {
    if zones.len() <= 10 {
        return None;
    }
    let y = feature(zones, "duration");
    let amplitude = feature(zones, "hist_amplitude");
    let skew = zones
        .iter()
        .map(|z| z.features.get("metadata").and_then(|m| m.get("shape_metrics")).and_then(|s| s.get("hist_skewness")).and_then(|v| v.as_f64()).unwrap_or(0.0))
        .collect();
    let correlation = feature(zones, "correlation_price_hist");
    ols(
        "duration",
        &y,
        &["hist_amplitude".to_string(), "shape_skewness".to_string(), "correlation_price_hist".to_string()],
        &[amplitude, skew, correlation],
    )
}

/// `predict_price_return`: price_return ~ duration + amplitude + correlation.
pub fn predict_price_return(zones: &[Zone]) -> Option<RegressionResult> {
    if zones.len() <= 10 {
        return None;
    }
    let y = feature(zones, "price_return");
    let duration = feature(zones, "duration");
    let amplitude = feature(zones, "hist_amplitude");
    let correlation = feature(zones, "correlation_price_hist");
    ols(
        "price_return",
        &y,
        &["duration".to_string(), "hist_amplitude".to_string(), "correlation_price_hist".to_string()],
        &[duration, amplitude, correlation],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ols_recovers_linear_relationship() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 5.0).collect();
        let result = ols("y", &y, &["x".to_string()], &[x]).unwrap();
        assert!((result.coefficients[1].estimate - 2.0).abs() < 1e-6);
        assert!((result.coefficients[0].estimate - 5.0).abs() < 1e-6);
        assert!(result.r_squared > 0.999);
    }

    #[test]
    fn insufficient_rows_returns_none() {
        let y = vec![1.0, 2.0, 3.0];
        let x = vec![1.0, 2.0, 3.0];
        assert!(ols("y", &y, &["x".to_string()], &[x]).is_none());
    }
}
