//! Kullback-Leibler divergence between two multivariate normals.

use ndarray::{Array1, ArrayView1};

use crate::covariance::Covariance;
use crate::error::{MixtureError, Result};

/// `KL(a ‖ b)` in nats:
///
/// ```text
/// ½ [ tr(Σ_b⁻¹ Σ_a) + (μ_b − μ_a)ᵀ Σ_b⁻¹ (μ_b − μ_a) − D + ln(|Σ_b| / |Σ_a|) ]
/// ```
///
/// The trace is accumulated column by column through [`Covariance::solve`].
/// Rounding can push the exact zero of identical inputs slightly negative, so
/// the result is clamped at zero.
pub fn kullback_leibler(
    mean_a: ArrayView1<'_, f64>,
    covariance_a: &Covariance,
    mean_b: ArrayView1<'_, f64>,
    covariance_b: &Covariance,
) -> Result<f64> {
    let d = mean_a.len();
    if mean_b.len() != d || covariance_a.dimension() != d || covariance_b.dimension() != d {
        return Err(MixtureError::numerical("divergence between mismatched dimensions"));
    }

    let dense_a = covariance_a.to_dense();
    let trace: f64 = (0..d)
        .map(|j| covariance_b.solve(dense_a.column(j))[j])
        .sum();

    let offset: Array1<f64> = &mean_b - &mean_a;
    let quadratic = covariance_b.mahalanobis_squared(offset.view());

    let log_ratio = covariance_b.log_determinant() - covariance_a.log_determinant();
    let divergence = 0.5 * (trace + quadratic - d as f64 + log_ratio);
    if !divergence.is_finite() {
        return Err(MixtureError::numerical("divergence is not finite"));
    }
    Ok(divergence.max(0.0))
}
