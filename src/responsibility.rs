//! Responsibility evaluation: soft component membership of every observation.
//!
//! For component k and observation n the log joint density is
//!
//! ```text
//! ln w_k − ½ (D ln 2π + ln|C_k| + ‖L_k⁻¹ (y_n − μ_k)‖²)
//! ```
//!
//! evaluated through the covariance's Cholesky factor. Columns are normalized
//! with log-sum-exp, so a far-away observation never underflows every
//! component at once.
//!
//! # Invariants
//!
//! - Every entry of [`Responsibility::matrix`] lies in `[f64::EPSILON, 1]`.
//! - Every column sums to one within floating-point rounding.
//! - All values are finite, or [`compute`] returns an error instead.

use core::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::covariance::Covariance;
use crate::error::{MixtureError, Result};
use crate::state::MixtureState;

/// Soft membership of N observations in K components.
#[derive(Clone, Debug, PartialEq)]
pub struct Responsibility {
    matrix: Array2<f64>,
    log_likelihood: Array1<f64>,
}

impl Responsibility {
    /// K×N membership probabilities.
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    /// Row `k`: membership of every observation in component `k`.
    pub fn row(&self, k: usize) -> ArrayView1<'_, f64> {
        self.matrix.row(k)
    }

    /// Per-observation log-likelihood `ln Σ_k w_k N(y_n | μ_k, C_k)`.
    pub fn log_likelihood(&self) -> ArrayView1<'_, f64> {
        self.log_likelihood.view()
    }

    /// Sum of the per-observation log-likelihoods.
    pub fn total_log_likelihood(&self) -> f64 {
        self.log_likelihood.sum()
    }

    /// Soft observation count of each component (row sums).
    pub fn effective_membership(&self) -> Array1<f64> {
        self.matrix.sum_axis(Axis(1))
    }

    /// Number of components K.
    pub fn n_components(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of observations N.
    pub fn n_observations(&self) -> usize {
        self.matrix.ncols()
    }

    /// Hard labels: the most responsible component per observation. Ties go
    /// to the lower index.
    pub fn assignments(&self) -> Vec<usize> {
        self.matrix
            .axis_iter(Axis(1))
            .map(|column| {
                let mut best = 0;
                for (k, r) in column.iter().enumerate() {
                    if *r > column[best] {
                        best = k;
                    }
                }
                best
            })
            .collect()
    }

    /// Take ownership of the K×N matrix.
    pub fn into_matrix(self) -> Array2<f64> {
        self.matrix
    }
}

/// Log-density of every observation under one Gaussian component.
pub fn log_density(
    y: ArrayView2<'_, f64>,
    mean: ArrayView1<'_, f64>,
    covariance: &Covariance,
) -> Array1<f64> {
    let d = y.ncols() as f64;
    let constant = -0.5 * (d * (2.0 * PI).ln() + covariance.log_determinant());
    let diff = &y - &mean;
    diff.outer_iter()
        .map(|row| constant - 0.5 * covariance.mahalanobis_squared(row))
        .collect()
}

/// Evaluate responsibilities and per-observation log-likelihoods of `y`
/// (N×D) under `state`.
pub fn compute(y: ArrayView2<'_, f64>, state: &MixtureState) -> Result<Responsibility> {
    if y.ncols() != state.dimension() {
        return Err(MixtureError::numerical(format!(
            "observations have {} dimensions, mixture has {}",
            y.ncols(),
            state.dimension()
        )));
    }
    let k = state.n_components();
    let n = y.nrows();

    let mut log_joint = Array2::<f64>::zeros((k, n));
    for (j, component) in state.components().enumerate() {
        let mut row = log_joint.row_mut(j);
        row.assign(&log_density(y, component.mean, component.covariance));
        row += component.weight.ln();
    }

    let log_likelihood: Array1<f64> = log_joint
        .axis_iter(Axis(1))
        .map(log_sum_exp)
        .collect();
    if let Some(i) = log_likelihood.iter().position(|v| !v.is_finite()) {
        return Err(MixtureError::numerical(format!(
            "log-likelihood of observation {i} is not finite"
        )));
    }

    let mut matrix = log_joint;
    for (mut column, ll) in matrix.axis_iter_mut(Axis(1)).zip(log_likelihood.iter()) {
        column.mapv_inplace(|v| (v - ll).exp().clamp(f64::EPSILON, 1.0));
        let total = column.sum();
        column /= total;
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(MixtureError::numerical(
            "responsibility is not finite after normalization",
        ));
    }

    tracing::trace!(
        components = k,
        observations = n,
        log_likelihood = log_likelihood.sum(),
        "responsibilities evaluated"
    );
    Ok(Responsibility {
        matrix,
        log_likelihood,
    })
}

fn log_sum_exp(values: ArrayView1<'_, f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
