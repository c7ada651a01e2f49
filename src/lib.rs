//! # mml-mixture
//!
//! Gaussian mixture modelling where the number of components is not an input.
//! A greedy search over split, delete and merge moves picks the mixture with
//! the shortest minimum-message-length (MML) encoding of the data.
//!
//! ---
//!
//! ## How the search works
//!
//! The search starts from one component fitted to all observations. Each
//! round it builds every elementary neighbour of the current mixture:
//!
//! - **split** any component in two along its principal axis
//! - **delete** any component and hand its mass to the rest
//! - **merge** any component with its nearest neighbour in KL divergence
//!
//! Every neighbour is refined with expectation-maximization and scored. The
//! cheapest one replaces the incumbent only if its message is strictly
//! shorter; otherwise the search stops. Message length trades goodness of fit
//! against the cost of stating more parameters, so extra components have to
//! pay for themselves.
//!
//! ---
//!
//! ## The pipeline
//!
//! ```text
//! MixtureSearch ──► perturbation ──► em ──► responsibility
//!       ▲                                        │
//!       └──────────── message_length ◄───────────┘
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`config`] | [`SearchConfig`], [`CovarianceType`] | Covariance structure, regularization, EM and round limits |
//! | [`covariance`] | [`Covariance`] | Positive-definite covariance with cached factorization; weighted estimation |
//! | [`state`] | [`MixtureState`] | Validated means, covariances and weights |
//! | [`responsibility`] | [`Responsibility`] | Log-sum-exp membership probabilities and log-likelihood |
//! | [`em`] | [`EmOutcome`], [`EmDiagnostics`] | Expectation-maximization with parent-scaled updates |
//! | [`message_length`] | [`MessageLength`] | MML cost with per-term breakdown |
//! | [`divergence`] | [`kullback_leibler`] | KL divergence between multivariate normals |
//! | [`perturbation`] | [`Operation`], [`Perturbation`] | Split, delete and merge candidates |
//! | [`search`] | [`MixtureSearch`], [`FittedMixture`] | The search controller |
//! | [`diagnostics`] | [`DiagnosticsSink`], [`SearchEvent`] | Injected event sink and fit summary |
//! | [`linalg`] | [`SymmetricEigen`](linalg::SymmetricEigen) | Cholesky, triangular solves, Jacobi eigensolver |
//!
//! ## Example
//!
//! ```
//! use mml_mixture::{MixtureSearch, SearchConfig};
//! use ndarray::Array2;
//!
//! // Two well-separated 3×3 grids.
//! let mut flat = Vec::new();
//! for centre in [0.0, 10.0] {
//!     for i in 0..3 {
//!         for j in 0..3 {
//!             flat.push(centre + 0.5 * (i as f64 - 1.0));
//!             flat.push(centre + 0.5 * (j as f64 - 1.0));
//!         }
//!     }
//! }
//! let y = Array2::from_shape_vec((18, 2), flat).unwrap();
//!
//! let mut search = MixtureSearch::new(SearchConfig::default()).unwrap();
//! let fitted = search.fit(y.view()).unwrap();
//! assert!(fitted.n_components() >= 1);
//! ```
//!
//! ## Features
//!
//! - `serde`: `Serialize`/`Deserialize` for configuration and diagnostics.
//! - `python-ffi`: PyO3 bindings (module `mml_mixture`).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod covariance;
pub mod diagnostics;
pub mod divergence;
pub mod em;
pub mod error;
pub mod linalg;
pub mod message_length;
pub mod perturbation;
pub mod responsibility;
pub mod search;
pub mod state;

#[cfg(feature = "python-ffi")]
#[cfg_attr(docsrs, doc(cfg(feature = "python-ffi")))]
pub mod ffi;

pub use config::{CovarianceType, SearchConfig};
pub use covariance::Covariance;
pub use diagnostics::{
    AcceptedMove, DiagnosticsSink, FitDiagnostics, RecordingSink, SearchEvent, TracingSink,
};
pub use divergence::kullback_leibler;
pub use em::{EmDiagnostics, EmOutcome};
pub use error::{MixtureError, Result};
pub use message_length::MessageLength;
pub use perturbation::{
    delete_component, merge_component, split_component, Operation, Perturbation,
};
pub use responsibility::Responsibility;
pub use search::{FittedMixture, MixtureSearch, SearchPhase};
pub use state::MixtureState;
