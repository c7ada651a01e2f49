//! Minimum-message-length cost of a mixture and the data it explains.
//!
//! All terms are in bits. With K components, N observations in D dimensions,
//! P parameters per component and `Q = K·P + (K − 1)` free parameters:
//!
//! | Term | Value |
//! |------|-------|
//! | component count | `K` |
//! | weights | `[(K−1)/2·ln N − ½Σ ln w_k − ln (K−1)!] / ln 2` |
//! | parameters | `Σ_k ½ ln|F(θ_k)| / ln 2` |
//! | lattice | `½ Q ln κ_Q / ln 2` |
//! | data | `(nll − D·N·ln ε) / ln 2 + ½Q / ln 2` |
//!
//! where `ln|F(θ_k)| = P ln n_k − D ln 2 − c ln|C_k|`, `n_k` is the effective
//! membership of component k, `c` is `D + 2` for full and `3` for diagonal
//! covariances, and `ε` is [`DATA_PRECISION`].

use core::f64::consts::{LN_2, PI};

use ndarray::{ArrayView2, Axis};

use crate::config::CovarianceType;
use crate::error::{MixtureError, Result};
use crate::linalg::ln_factorial;
use crate::state::MixtureState;

/// Precision to which each observed value is stated.
pub const DATA_PRECISION: f64 = 0.001;

/// Message length of a mixture, broken down by term. Every field is in bits.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageLength {
    /// Cost of stating the component count.
    pub components: f64,
    /// Cost of the mixing weights.
    pub weights: f64,
    /// Cost of all means and covariances.
    pub parameters: f64,
    /// Lattice quantization constant.
    pub lattice: f64,
    /// Cost of the data given the model, including the quantization-error
    /// term.
    pub data: f64,
    /// Sum of the above.
    pub total: f64,
}

/// Natural log of the optimal lattice constant κ in `q` dimensions.
pub fn log_kappa(q: f64) -> f64 {
    let cd = -0.5 * q * (2.0 * PI).ln() + 0.5 * (q * PI).ln();
    -1.0 + 2.0 * cd / q
}

/// Determinant exponent `c` in the Fisher-information approximation.
fn determinant_exponent(structure: CovarianceType, dimension: usize) -> Result<f64> {
    match structure {
        CovarianceType::Full => Ok(dimension as f64 + 2.0),
        CovarianceType::Diagonal => Ok(3.0),
        other => Err(other.unsupported()),
    }
}

/// Score `state` against `y` (N×D), given its K×N `responsibility` and the
/// negative log-likelihood (nats) of `y` under it.
pub fn score(
    y: ArrayView2<'_, f64>,
    state: &MixtureState,
    responsibility: ArrayView2<'_, f64>,
    negative_log_likelihood: f64,
) -> Result<MessageLength> {
    let n = y.nrows() as f64;
    let d = state.dimension();
    let k = state.n_components();
    if responsibility.nrows() != k || responsibility.ncols() != y.nrows() {
        return Err(MixtureError::numerical(format!(
            "responsibility is {}×{}, expected {k}×{}",
            responsibility.nrows(),
            responsibility.ncols(),
            y.nrows()
        )));
    }
    let structure = state.structure();
    let p = structure.parameters_per_component(d)? as f64;
    let c = determinant_exponent(structure, d)?;
    let kf = k as f64;

    let components = kf;

    let weights = ((kf - 1.0) / 2.0 * n.ln()
        - 0.5 * state.weights().iter().map(|w| w.ln()).sum::<f64>()
        - ln_factorial(k - 1))
        / LN_2;

    let membership = responsibility.sum_axis(Axis(1));
    let parameters = membership
        .iter()
        .zip(state.covariances())
        .map(|(n_k, cov)| {
            let log_fisher = p * n_k.ln() - d as f64 * LN_2 - c * cov.log_determinant();
            0.5 * log_fisher / LN_2
        })
        .sum::<f64>();

    let q = kf * p + (kf - 1.0);
    let lattice = 0.5 * q * log_kappa(q) / LN_2;

    let data = (negative_log_likelihood - d as f64 * n * DATA_PRECISION.ln()) / LN_2
        + 0.5 * q / LN_2;

    let total = components + weights + parameters + lattice + data;
    if !total.is_finite() || total <= 0.0 {
        return Err(MixtureError::numerical(format!(
            "message length {total} is not finite and positive"
        )));
    }
    Ok(MessageLength {
        components,
        weights,
        parameters,
        lattice,
        data,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::Covariance;
    use crate::responsibility;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn grid() -> Array2<f64> {
        let mut y = Array2::zeros((25, 2));
        for i in 0..5 {
            for j in 0..5 {
                y[[i * 5 + j, 0]] = i as f64;
                y[[i * 5 + j, 1]] = j as f64 * 0.5;
            }
        }
        y
    }

    #[test]
    fn test_log_kappa_matches_known_values() {
        // q = 1: -1 + 2(-½ ln 2π + ½ ln π) = -1 - ln 2
        assert_abs_diff_eq!(log_kappa(1.0), -1.0 - LN_2, epsilon = 1e-12);
        assert!(log_kappa(10.0) < 0.0);
    }

    #[test]
    fn test_single_component_terms() {
        let y = grid();
        let state = MixtureState::initialize(y.view(), &Default::default()).unwrap();
        let r = responsibility::compute(y.view(), &state).unwrap();
        let nll = -r.total_log_likelihood();
        let m = score(y.view(), &state, r.matrix(), nll).unwrap();

        assert_eq!(m.components, 1.0);
        // K = 1: no count term, ln 1 = 0, ln 0! = 0.
        assert_abs_diff_eq!(m.weights, 0.0, epsilon = 1e-12);
        let p = 5.0;
        let expected = 0.5
            * (p * 25.0_f64.ln() - 2.0 * LN_2 - 4.0 * state.covariance(0).log_determinant())
            / LN_2;
        assert_abs_diff_eq!(m.parameters, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(m.lattice, 0.5 * p * log_kappa(p) / LN_2, epsilon = 1e-12);
        assert_abs_diff_eq!(
            m.total,
            m.components + m.weights + m.parameters + m.lattice + m.data,
            epsilon = 1e-9
        );
        assert!(m.total > 0.0);
    }

    #[test]
    fn test_weight_term_for_two_components() {
        let y = grid();
        let state = MixtureState::new(
            array![[1.0, 0.5], [3.0, 1.5]],
            vec![
                Covariance::full(Array2::eye(2)).unwrap(),
                Covariance::full(Array2::eye(2)).unwrap(),
            ],
            array![0.5, 0.5],
        )
        .unwrap();
        let r = responsibility::compute(y.view(), &state).unwrap();
        let m = score(y.view(), &state, r.matrix(), -r.total_log_likelihood()).unwrap();
        let expected = (0.5 * 25.0_f64.ln() - 0.5 * 2.0 * 0.5_f64.ln()) / LN_2;
        assert_abs_diff_eq!(m.weights, expected, epsilon = 1e-12);
        assert_eq!(m.components, 2.0);
    }

    #[test]
    fn test_diagonal_structure_uses_its_own_counts() {
        let y = grid();
        let config = crate::config::SearchConfig::new(CovarianceType::Diagonal);
        let state = MixtureState::initialize(y.view(), &config).unwrap();
        let r = responsibility::compute(y.view(), &state).unwrap();
        let m = score(y.view(), &state, r.matrix(), -r.total_log_likelihood()).unwrap();
        let p = 4.0;
        let expected = 0.5
            * (p * 25.0_f64.ln() - 2.0 * LN_2 - 3.0 * state.covariance(0).log_determinant())
            / LN_2;
        assert_abs_diff_eq!(m.parameters, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_total_is_rejected() {
        let y = grid();
        let state = MixtureState::initialize(y.view(), &Default::default()).unwrap();
        let r = responsibility::compute(y.view(), &state).unwrap();
        let err = score(y.view(), &state, r.matrix(), f64::NAN).unwrap_err();
        assert!(err.is_numerical());
        let err = score(y.view(), &state, r.matrix(), -1e12).unwrap_err();
        assert!(err.is_numerical());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let y = grid();
        let state = MixtureState::initialize(y.view(), &Default::default()).unwrap();
        let wrong = Array2::<f64>::ones((2, 25));
        assert!(score(y.view(), &state, wrong.view(), 10.0).is_err());
    }
}
