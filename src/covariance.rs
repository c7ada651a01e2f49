//! Component covariance: one tagged representation for every structure.
//!
//! [`Covariance`] hides whether a component stores a dense matrix or a vector
//! of variances. Responsibility evaluation, scoring, divergence and the
//! perturbation operators go through its methods ([`Covariance::solve`],
//! [`Covariance::log_determinant`], [`Covariance::whiten`], …) and never
//! branch on the storage shape themselves.
//!
//! # Invariants
//!
//! - A `Covariance` value is always symmetric positive-definite: both
//!   constructors factorize (or check) their input and return
//!   [`MixtureError::Numerical`] otherwise.
//! - Dense input is symmetrized as `(C + Cᵀ)/2` before factorization.
//! - Values are immutable once built.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::config::CovarianceType;
use crate::error::{MixtureError, Result};
use crate::linalg::{cholesky, solve_lower, solve_lower_transpose, symmetrize, SymmetricEigen};

// ─── Covariance ───────────────────────────────────────────────────────────────

/// Symmetric positive-definite covariance of one mixture component.
#[derive(Clone, Debug, PartialEq)]
pub enum Covariance {
    /// Dense D×D matrix with its cached lower Cholesky factor.
    Full {
        /// The covariance matrix.
        matrix: Array2<f64>,
        /// Lower-triangular `L` with `L Lᵀ = matrix`.
        cholesky: Array2<f64>,
    },
    /// Independent per-dimension variances.
    Diagonal {
        /// Strictly positive variances.
        variances: Array1<f64>,
    },
}

impl Covariance {
    /// Build a full covariance, factorizing it.
    pub fn full(matrix: Array2<f64>) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(MixtureError::numerical(format!(
                "covariance must be square, got {}×{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let matrix = symmetrize(matrix.view());
        let cholesky = cholesky(matrix.view()).ok_or_else(|| {
            MixtureError::numerical("covariance matrix is not positive-definite")
        })?;
        Ok(Self::Full { matrix, cholesky })
    }

    /// Build a diagonal covariance from strictly positive variances.
    pub fn diagonal(variances: Array1<f64>) -> Result<Self> {
        if variances.iter().any(|v| !(*v > 0.0) || !v.is_finite()) {
            return Err(MixtureError::numerical(
                "diagonal covariance has a non-positive or non-finite variance",
            ));
        }
        Ok(Self::Diagonal { variances })
    }

    /// Build the given structure from a dense matrix. Diagonal structures
    /// keep only the matrix diagonal.
    pub fn from_dense(matrix: Array2<f64>, structure: CovarianceType) -> Result<Self> {
        match structure {
            CovarianceType::Full => Self::full(matrix),
            CovarianceType::Diagonal => Self::diagonal(matrix.diag().to_owned()),
            other => Err(other.unsupported()),
        }
    }

    /// Storage structure of this covariance.
    pub fn structure(&self) -> CovarianceType {
        match self {
            Self::Full { .. } => CovarianceType::Full,
            Self::Diagonal { .. } => CovarianceType::Diagonal,
        }
    }

    /// Dimension D.
    pub fn dimension(&self) -> usize {
        match self {
            Self::Full { matrix, .. } => matrix.nrows(),
            Self::Diagonal { variances } => variances.len(),
        }
    }

    /// `ln |C|`, computed from the factorization.
    pub fn log_determinant(&self) -> f64 {
        match self {
            Self::Full { cholesky, .. } => 2.0 * cholesky.diag().iter().map(|x| x.ln()).sum::<f64>(),
            Self::Diagonal { variances } => variances.iter().map(|v| v.ln()).sum(),
        }
    }

    /// `|C|`. Prefer [`Covariance::log_determinant`] in scoring code.
    pub fn determinant(&self) -> f64 {
        self.log_determinant().exp()
    }

    /// Lower Cholesky factor `L` as a dense matrix.
    pub fn cholesky_factor(&self) -> Array2<f64> {
        match self {
            Self::Full { cholesky, .. } => cholesky.clone(),
            Self::Diagonal { variances } => Array2::from_diag(&variances.mapv(f64::sqrt)),
        }
    }

    /// `L⁻¹ v`. Its squared norm is the Mahalanobis distance of `v`.
    pub fn whiten(&self, v: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            Self::Full { cholesky, .. } => solve_lower(cholesky.view(), v),
            Self::Diagonal { variances } => &v / &variances.mapv(f64::sqrt),
        }
    }

    /// `vᵀ C⁻¹ v`.
    pub fn mahalanobis_squared(&self, v: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Full { .. } => self.whiten(v).iter().map(|z| z * z).sum(),
            Self::Diagonal { variances } => {
                v.iter().zip(variances.iter()).map(|(x, s)| x * x / s).sum()
            }
        }
    }

    /// `C⁻¹ b`, via two triangular solves.
    pub fn solve(&self, b: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            Self::Full { cholesky, .. } => {
                let y = solve_lower(cholesky.view(), b);
                solve_lower_transpose(cholesky.view(), y.view())
            }
            Self::Diagonal { variances } => &b / variances,
        }
    }

    /// Dense D×D matrix.
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Full { matrix, .. } => matrix.clone(),
            Self::Diagonal { variances } => Array2::from_diag(variances),
        }
    }

    /// Variance along and direction of the axis of maximum variance.
    ///
    /// The direction is a unit vector; its sign is arbitrary. For diagonal
    /// covariances ties go to the lowest dimension.
    pub fn principal_axis(&self) -> (f64, Array1<f64>) {
        match self {
            Self::Full { matrix, .. } => {
                let eigen = SymmetricEigen::new(matrix.view());
                (eigen.eigenvalues[0], eigen.eigenvectors.column(0).to_owned())
            }
            Self::Diagonal { variances } => {
                let mut best = 0;
                for (d, v) in variances.iter().enumerate() {
                    if *v > variances[best] {
                        best = d;
                    }
                }
                let mut axis = Array1::zeros(variances.len());
                axis[best] = 1.0;
                (variances[best], axis)
            }
        }
    }
}

// ─── Estimation ───────────────────────────────────────────────────────────────

/// Responsibility-weighted covariance of `y` about `mean`.
///
/// The scatter is divided by `n − 1` when the effective membership `n`
/// exceeds one and by `n` otherwise, then `regularization` is added to the
/// diagonal.
pub fn estimate_covariance(
    y: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    mean: ArrayView1<'_, f64>,
    structure: CovarianceType,
    regularization: f64,
) -> Result<Covariance> {
    structure.ensure_supported()?;
    let membership: f64 = weights.sum();
    let denominator = if membership > 1.0 { membership - 1.0 } else { membership };
    if !(denominator > 0.0) || !denominator.is_finite() {
        return Err(MixtureError::numerical(format!(
            "cannot estimate a covariance from effective membership {membership}"
        )));
    }

    let diff = &y - &mean;
    let weighted = &diff * &weights.insert_axis(Axis(1));
    match structure {
        CovarianceType::Diagonal => {
            let variances = (&weighted * &diff).sum_axis(Axis(0)) / denominator + regularization;
            Covariance::diagonal(variances)
        }
        _ => {
            let mut scatter = weighted.t().dot(&diff) / denominator;
            scatter.diag_mut().mapv_inplace(|v| v + regularization);
            Covariance::full(scatter)
        }
    }
}

/// One covariance per row of the K×N `responsibility` matrix.
pub fn estimate_covariances(
    y: ArrayView2<'_, f64>,
    responsibility: ArrayView2<'_, f64>,
    means: ArrayView2<'_, f64>,
    structure: CovarianceType,
    regularization: f64,
) -> Result<Vec<Covariance>> {
    responsibility
        .outer_iter()
        .zip(means.outer_iter())
        .enumerate()
        .map(|(k, (r, mean))| {
            estimate_covariance(y, r, mean, structure, regularization).map_err(|e| match e {
                MixtureError::Numerical(m) => MixtureError::numerical(format!("component {k}: {m}")),
                other => other,
            })
        })
        .collect()
}

/// Responsibility-weighted mean of the rows of `y`.
pub fn weighted_mean(y: ArrayView2<'_, f64>, weights: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
    let total = weights.sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(MixtureError::numerical(format!(
            "cannot estimate a mean from effective membership {total}"
        )));
    }
    Ok(weights.dot(&y) / total)
}
