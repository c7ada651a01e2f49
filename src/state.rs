//! The mixture itself: K components' means, covariances and weights.
//!
//! A [`MixtureState`] is a value. Nothing in the crate mutates one after it is
//! built; EM steps and perturbations construct a new state and the search
//! controller swaps the whole value on acceptance.
//!
//! # Invariants
//!
//! - At least one component; means, covariances and weights agree on K and D.
//! - Weights are finite, strictly positive and sum to one within
//!   [`WEIGHT_SUM_TOLERANCE`].
//! - Every covariance has the same structure and is positive-definite (the
//!   latter is guaranteed by [`Covariance`] itself).

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::config::{CovarianceType, SearchConfig};
use crate::covariance::{estimate_covariance, Covariance};
use crate::error::{MixtureError, Result};

/// Allowed deviation of `Σ weights` from one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-8;

/// Borrowed view of one component.
#[derive(Clone, Copy, Debug)]
pub struct Component<'a> {
    /// Mean vector (length D).
    pub mean: ArrayView1<'a, f64>,
    /// Covariance.
    pub covariance: &'a Covariance,
    /// Mixing weight in (0, 1].
    pub weight: f64,
}

/// Parameters of a Gaussian mixture.
#[derive(Clone, Debug, PartialEq)]
pub struct MixtureState {
    means: Array2<f64>,
    covariances: Vec<Covariance>,
    weights: Array1<f64>,
}

impl MixtureState {
    /// Assemble a state, checking every invariant.
    ///
    /// `means` is K×D, one row per component.
    pub fn new(means: Array2<f64>, covariances: Vec<Covariance>, weights: Array1<f64>) -> Result<Self> {
        let k = means.nrows();
        let d = means.ncols();
        if k == 0 {
            return Err(MixtureError::numerical("a mixture needs at least one component"));
        }
        if covariances.len() != k || weights.len() != k {
            return Err(MixtureError::numerical(format!(
                "component count mismatch: {k} means, {} covariances, {} weights",
                covariances.len(),
                weights.len()
            )));
        }
        let structure = covariances[0].structure();
        for (j, c) in covariances.iter().enumerate() {
            if c.dimension() != d {
                return Err(MixtureError::numerical(format!(
                    "covariance {j} has dimension {}, means have {d}",
                    c.dimension()
                )));
            }
            if c.structure() != structure {
                return Err(MixtureError::numerical("components mix covariance structures"));
            }
        }
        if means.iter().any(|m| !m.is_finite()) {
            return Err(MixtureError::numerical("non-finite component mean"));
        }
        if weights.iter().any(|w| !(*w > 0.0) || !w.is_finite()) {
            return Err(MixtureError::numerical(format!(
                "weights must be finite and positive: {weights}"
            )));
        }
        let total = weights.sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(MixtureError::numerical(format!(
                "weights sum to {total}, expected 1"
            )));
        }
        Ok(Self {
            means,
            covariances,
            weights,
        })
    }

    /// Single component over all of `y`: sample mean, sample covariance
    /// (plus regularization), weight one.
    pub fn initialize(y: ArrayView2<'_, f64>, config: &SearchConfig) -> Result<Self> {
        config.covariance_type.ensure_supported()?;
        check_observations(y)?;
        let n = y.nrows();
        let ones = Array1::<f64>::ones(n);
        let mean = ones.dot(&y) / n as f64;
        let covariance = estimate_covariance(
            y,
            ones.view(),
            mean.view(),
            config.covariance_type,
            config.covariance_regularization,
        )?;
        Self::new(mean.insert_axis(Axis(0)), vec![covariance], Array1::ones(1))
    }

    /// Number of components K.
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    /// Dimension D.
    pub fn dimension(&self) -> usize {
        self.means.ncols()
    }

    /// Covariance structure shared by all components.
    pub fn structure(&self) -> CovarianceType {
        self.covariances[0].structure()
    }

    /// K×D means.
    pub fn means(&self) -> ArrayView2<'_, f64> {
        self.means.view()
    }

    /// Mean of component `k`.
    pub fn mean(&self, k: usize) -> ArrayView1<'_, f64> {
        self.means.row(k)
    }

    /// All covariances in component order.
    pub fn covariances(&self) -> &[Covariance] {
        &self.covariances
    }

    /// Covariance of component `k`.
    pub fn covariance(&self, k: usize) -> &Covariance {
        &self.covariances[k]
    }

    /// Mixing weights.
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// Weight of component `k`.
    pub fn weight(&self, k: usize) -> f64 {
        self.weights[k]
    }

    /// Component `k` as a borrowed view.
    pub fn component(&self, k: usize) -> Component<'_> {
        Component {
            mean: self.means.row(k),
            covariance: &self.covariances[k],
            weight: self.weights[k],
        }
    }

    /// Iterate over components in order.
    pub fn components(&self) -> impl Iterator<Item = Component<'_>> + '_ {
        (0..self.n_components()).map(move |k| self.component(k))
    }

    /// Fail with a configuration error unless `k` names a component.
    pub fn check_index(&self, k: usize) -> Result<()> {
        if k >= self.n_components() {
            return Err(MixtureError::configuration(format!(
                "component index {k} out of range for {} components",
                self.n_components()
            )));
        }
        Ok(())
    }

    /// Decompose into `(means, covariances, weights)`.
    pub fn into_parts(self) -> (Array2<f64>, Vec<Covariance>, Array1<f64>) {
        (self.means, self.covariances, self.weights)
    }
}

/// Reject empty or non-finite observation matrices.
pub(crate) fn check_observations(y: ArrayView2<'_, f64>) -> Result<()> {
    if y.nrows() < 2 || y.ncols() == 0 {
        return Err(MixtureError::configuration(format!(
            "need at least two observations of at least one dimension, got {}×{}",
            y.nrows(),
            y.ncols()
        )));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(MixtureError::configuration("observations contain non-finite values"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn unit(d: usize) -> Covariance {
        Covariance::full(Array2::eye(d)).unwrap()
    }

    #[test]
    fn test_new_accepts_valid_state() {
        let s = MixtureState::new(
            array![[0.0, 0.0], [5.0, 5.0]],
            vec![unit(2), unit(2)],
            array![0.25, 0.75],
        )
        .unwrap();
        assert_eq!(s.n_components(), 2);
        assert_eq!(s.dimension(), 2);
        assert_eq!(s.structure(), CovarianceType::Full);
        assert_eq!(s.component(1).weight, 0.75);
        assert_eq!(s.components().count(), 2);
    }

    #[test]
    fn test_new_rejects_unnormalized_or_non_positive_weights() {
        let bad = [array![0.5, 0.6], array![1.0, 0.0], array![1.5, -0.5]];
        for w in bad {
            let r = MixtureState::new(array![[0.0], [1.0]], vec![unit(1), unit(1)], w);
            assert!(r.unwrap_err().is_numerical());
        }
    }

    #[test]
    fn test_new_rejects_shape_mismatch() {
        let r = MixtureState::new(array![[0.0, 0.0]], vec![unit(3)], array![1.0]);
        assert!(r.is_err());
        let r = MixtureState::new(array![[0.0], [1.0]], vec![unit(1)], array![0.5, 0.5]);
        assert!(r.is_err());
        let r = MixtureState::new(Array2::zeros((0, 2)), vec![], Array1::zeros(0));
        assert!(r.is_err());
    }

    #[test]
    fn test_new_rejects_mixed_structures() {
        let diag = Covariance::diagonal(array![1.0]).unwrap();
        let r = MixtureState::new(array![[0.0], [1.0]], vec![unit(1), diag], array![0.5, 0.5]);
        assert!(r.is_err());
    }

    #[test]
    fn test_initialize_uses_sample_moments() {
        let y = array![[1.0, 2.0], [3.0, 2.0], [1.0, 4.0], [3.0, 4.0]];
        let s = MixtureState::initialize(y.view(), &SearchConfig::default()).unwrap();
        assert_eq!(s.n_components(), 1);
        assert_eq!(s.weight(0), 1.0);
        assert_abs_diff_eq!(s.mean(0)[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.mean(0)[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.covariance(0).to_dense()[[0, 0]], 4.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_initialize_rejects_tied_and_bad_input() {
        let y = array![[1.0], [2.0], [3.0]];
        let tied = SearchConfig::new(CovarianceType::Tied);
        assert!(matches!(
            MixtureState::initialize(y.view(), &tied),
            Err(MixtureError::UnsupportedFeature(_))
        ));
        let one = array![[1.0, 2.0]];
        assert!(matches!(
            MixtureState::initialize(one.view(), &SearchConfig::default()),
            Err(MixtureError::Configuration(_))
        ));
        let nan = array![[1.0], [f64::NAN]];
        assert!(MixtureState::initialize(nan.view(), &SearchConfig::default()).is_err());
    }

    #[test]
    fn test_check_index() {
        let s = MixtureState::new(array![[0.0]], vec![unit(1)], array![1.0]).unwrap();
        assert!(s.check_index(0).is_ok());
        assert!(matches!(s.check_index(1), Err(MixtureError::Configuration(_))));
    }
}
