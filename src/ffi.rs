//! Python FFI bindings via PyO3.
//!
//! Observations cross the boundary as a list of equal-length float lists
//! (one per observation); results come back as nested lists.
//!
//! # Building the Python extension
//!
//! ```bash
//! pip install maturin
//! maturin develop --features python-ffi
//! ```
//!
//! # Usage
//!
//! ```python
//! from mml_mixture import GaussianMixture
//!
//! model = GaussianMixture(covariance_type="full", threshold=1e-5)
//! fitted = model.fit(observations)       # list of [x, y, ...] rows
//! print(fitted.n_components, fitted.weights)
//! print(fitted.message_length)           # bits
//! labels = fitted.labels                 # component index per row
//! ```

use ndarray::Array2;
use pyo3::exceptions::{PyArithmeticError, PyNotImplementedError, PyValueError};
use pyo3::prelude::*;

use crate::config::{CovarianceType, SearchConfig};
use crate::error::MixtureError;
use crate::search::{FittedMixture as RustFittedMixture, MixtureSearch};

fn to_py_err(e: MixtureError) -> PyErr {
    match e {
        MixtureError::Configuration(_) => PyValueError::new_err(e.to_string()),
        MixtureError::Numerical(_) => PyArithmeticError::new_err(e.to_string()),
        MixtureError::UnsupportedFeature(_) => PyNotImplementedError::new_err(e.to_string()),
    }
}

fn rows_to_array(rows: &[Vec<f64>]) -> PyResult<Array2<f64>> {
    let n = rows.len();
    let d = rows.first().map_or(0, Vec::len);
    if let Some(i) = rows.iter().position(|r| r.len() != d) {
        return Err(PyValueError::new_err(format!(
            "row {i} has {} values, expected {d}",
            rows[i].len()
        )));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((n, d), flat).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn array_to_rows(a: ndarray::ArrayView2<'_, f64>) -> Vec<Vec<f64>> {
    a.outer_iter().map(|r| r.to_vec()).collect()
}

// ── GaussianMixture ───────────────────────────────────────────────────────────

/// Gaussian mixture whose component count is chosen by minimum message length.
#[pyclass(name = "GaussianMixture")]
#[derive(Clone)]
pub struct PyGaussianMixture {
    inner: SearchConfig,
}

#[pymethods]
impl PyGaussianMixture {
    /// Create a model.
    ///
    /// Args:
    ///     covariance_type: "full" or "diag" ("tied" variants raise NotImplementedError on fit)
    ///     covariance_regularization: added to every covariance diagonal (default 0.0)
    ///     threshold: relative log-likelihood change that stops EM (default 1e-5)
    ///     max_em_iterations: EM iteration cap (default 10000)
    #[new]
    #[pyo3(signature = (covariance_type="full", covariance_regularization=0.0, threshold=1e-5, max_em_iterations=10_000))]
    pub fn new(
        covariance_type: &str,
        covariance_regularization: f64,
        threshold: f64,
        max_em_iterations: usize,
    ) -> PyResult<Self> {
        let covariance_type: CovarianceType = covariance_type.parse().map_err(to_py_err)?;
        let inner = SearchConfig::new(covariance_type)
            .with_covariance_regularization(covariance_regularization)
            .with_em_convergence_threshold(threshold)
            .with_max_em_iterations(max_em_iterations);
        inner.validate().map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Covariance structure name.
    #[getter]
    pub fn covariance_type(&self) -> &'static str {
        self.inner.covariance_type.as_str()
    }

    /// Diagonal regularization.
    #[getter]
    pub fn covariance_regularization(&self) -> f64 {
        self.inner.covariance_regularization
    }

    /// EM convergence threshold.
    #[getter]
    pub fn threshold(&self) -> f64 {
        self.inner.em_convergence_threshold
    }

    /// EM iteration cap.
    #[getter]
    pub fn max_em_iterations(&self) -> usize {
        self.inner.max_em_iterations
    }

    /// Search for the mixture with the shortest message.
    pub fn fit(&self, y: Vec<Vec<f64>>) -> PyResult<PyFittedMixture> {
        let y = rows_to_array(&y)?;
        let mut search = MixtureSearch::new(self.inner.clone()).map_err(to_py_err)?;
        let inner = search.fit(y.view()).map_err(to_py_err)?;
        Ok(PyFittedMixture { inner })
    }

    /// Grow a mixture of exactly `n_components` by repeated splitting.
    pub fn fit_components(&self, y: Vec<Vec<f64>>, n_components: usize) -> PyResult<PyFittedMixture> {
        let y = rows_to_array(&y)?;
        let mut search = MixtureSearch::new(self.inner.clone()).map_err(to_py_err)?;
        let inner = search.fit_components(y.view(), n_components).map_err(to_py_err)?;
        Ok(PyFittedMixture { inner })
    }

    /// Python repr string.
    pub fn __repr__(&self) -> String {
        format!(
            "GaussianMixture(covariance_type='{}', covariance_regularization={}, threshold={}, max_em_iterations={})",
            self.inner.covariance_type,
            self.inner.covariance_regularization,
            self.inner.em_convergence_threshold,
            self.inner.max_em_iterations,
        )
    }
}

// ── FittedMixture ─────────────────────────────────────────────────────────────

/// Result of `GaussianMixture.fit`.
#[pyclass(name = "FittedMixture")]
#[derive(Clone)]
pub struct PyFittedMixture {
    inner: RustFittedMixture,
}

#[pymethods]
impl PyFittedMixture {
    /// Number of components.
    #[getter]
    pub fn n_components(&self) -> usize {
        self.inner.n_components()
    }

    /// Component means, one list per component.
    #[getter]
    pub fn means(&self) -> Vec<Vec<f64>> {
        array_to_rows(self.inner.state.means())
    }

    /// Dense covariance matrices, one per component.
    #[getter]
    pub fn covariances(&self) -> Vec<Vec<Vec<f64>>> {
        self.inner
            .state
            .covariances()
            .iter()
            .map(|c| array_to_rows(c.to_dense().view()))
            .collect()
    }

    /// Mixing weights.
    #[getter]
    pub fn weights(&self) -> Vec<f64> {
        self.inner.state.weights().to_vec()
    }

    /// Total message length in bits.
    #[getter]
    pub fn message_length(&self) -> f64 {
        self.inner.message_length.total
    }

    /// Most responsible component per observation.
    #[getter]
    pub fn labels(&self) -> Vec<usize> {
        self.inner.labels()
    }

    /// Whether any EM run stopped at its iteration cap.
    #[getter]
    pub fn convergence_warning(&self) -> bool {
        self.inner.diagnostics.convergence_warning()
    }

    /// Python repr string.
    pub fn __repr__(&self) -> String {
        format!(
            "FittedMixture(n_components={}, message_length={:.3})",
            self.inner.n_components(),
            self.inner.message_length.total,
        )
    }
}

// ── Module ────────────────────────────────────────────────────────────────────

/// Python module definition.
#[pymodule]
pub fn mml_mixture(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyGaussianMixture>()?;
    m.add_class::<PyFittedMixture>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
