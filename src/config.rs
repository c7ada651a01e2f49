//! Fit configuration: covariance structure, regularization and EM limits.
//!
//! [`SearchConfig`] is validated once, when the search controller is built.
//! Tied structures parse and validate, then fail with
//! [`MixtureError::UnsupportedFeature`] the first time the engine needs them.

use core::fmt;
use core::str::FromStr;

use crate::error::{MixtureError, Result};

// ─── CovarianceType ───────────────────────────────────────────────────────────

/// Parametrization constraint shared by all component covariances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CovarianceType {
    /// Free symmetric positive-definite matrix per component.
    #[default]
    Full,
    /// Per-component variances only.
    Diagonal,
    /// One full matrix shared by every component. Not implemented.
    Tied,
    /// One diagonal shared by every component. Not implemented.
    TiedDiagonal,
}

impl CovarianceType {
    /// Number of free parameters (mean plus covariance) of one component in
    /// `dimension` dimensions.
    pub fn parameters_per_component(self, dimension: usize) -> Result<usize> {
        match self {
            Self::Full => Ok(dimension + dimension * (dimension + 1) / 2),
            Self::Diagonal => Ok(2 * dimension),
            Self::Tied | Self::TiedDiagonal => Err(self.unsupported()),
        }
    }

    /// Fail unless this structure is implemented by the engine.
    pub fn ensure_supported(self) -> Result<()> {
        match self {
            Self::Full | Self::Diagonal => Ok(()),
            Self::Tied | Self::TiedDiagonal => Err(self.unsupported()),
        }
    }

    /// Canonical lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Diagonal => "diagonal",
            Self::Tied => "tied",
            Self::TiedDiagonal => "tied-diagonal",
        }
    }

    pub(crate) fn unsupported(self) -> MixtureError {
        MixtureError::UnsupportedFeature(format!(
            "'{}' covariance structure is not implemented",
            self.as_str()
        ))
    }
}

impl fmt::Display for CovarianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CovarianceType {
    type Err = MixtureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "free" => Ok(Self::Full),
            "diag" | "diagonal" => Ok(Self::Diagonal),
            "tied" => Ok(Self::Tied),
            "tied_diag" | "tied-diag" | "tied_diagonal" | "tied-diagonal" => {
                Ok(Self::TiedDiagonal)
            }
            other => Err(MixtureError::configuration(format!(
                "covariance type '{other}' is invalid; must be one of: \
                 full, diagonal, tied, tied-diagonal"
            ))),
        }
    }
}

// ─── SearchConfig ─────────────────────────────────────────────────────────────

/// Default relative log-likelihood change at which EM stops.
pub const DEFAULT_EM_CONVERGENCE_THRESHOLD: f64 = 1e-5;

/// Default cap on E/M iterations per EM run.
pub const DEFAULT_MAX_EM_ITERATIONS: usize = 10_000;

/// Configuration for the EM optimizer and the model-space search.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchConfig {
    /// Covariance structure of every component. Default: full.
    pub covariance_type: CovarianceType,

    /// Added to each covariance diagonal after every estimate. Must be
    /// non-negative. Default: 0.
    pub covariance_regularization: f64,

    /// EM stops once `|ΔlogL / logL|` is at or below this value. Must be
    /// positive. Default: 1e-5.
    pub em_convergence_threshold: f64,

    /// Hard cap on E/M iterations per run. Must be positive. Default: 10 000.
    pub max_em_iterations: usize,

    /// Optional cap on accepted search rounds. `None` searches until no
    /// perturbation improves the message length.
    pub max_search_rounds: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            covariance_type: CovarianceType::Full,
            covariance_regularization: 0.0,
            em_convergence_threshold: DEFAULT_EM_CONVERGENCE_THRESHOLD,
            max_em_iterations: DEFAULT_MAX_EM_ITERATIONS,
            max_search_rounds: None,
        }
    }
}

impl SearchConfig {
    /// Default configuration with the given covariance structure.
    pub fn new(covariance_type: CovarianceType) -> Self {
        Self {
            covariance_type,
            ..Self::default()
        }
    }

    /// Set the diagonal regularization.
    pub fn with_covariance_regularization(mut self, regularization: f64) -> Self {
        self.covariance_regularization = regularization;
        self
    }

    /// Set the EM convergence threshold.
    pub fn with_em_convergence_threshold(mut self, threshold: f64) -> Self {
        self.em_convergence_threshold = threshold;
        self
    }

    /// Set the EM iteration cap.
    pub fn with_max_em_iterations(mut self, iterations: usize) -> Self {
        self.max_em_iterations = iterations;
        self
    }

    /// Limit the number of accepted search rounds.
    pub fn with_max_search_rounds(mut self, rounds: usize) -> Self {
        self.max_search_rounds = Some(rounds);
        self
    }

    /// Check every scalar bound. Tied structures pass here and fail at
    /// first use.
    pub fn validate(&self) -> Result<()> {
        if !(self.covariance_regularization >= 0.0) || !self.covariance_regularization.is_finite()
        {
            return Err(MixtureError::configuration(
                "covariance_regularization must be a non-negative finite float",
            ));
        }
        if !(self.em_convergence_threshold > 0.0) || !self.em_convergence_threshold.is_finite() {
            return Err(MixtureError::configuration(
                "em_convergence_threshold must be a positive finite float",
            ));
        }
        if self.max_em_iterations == 0 {
            return Err(MixtureError::configuration(
                "max_em_iterations must be a positive integer",
            ));
        }
        if self.max_search_rounds == Some(0) {
            return Err(MixtureError::configuration(
                "max_search_rounds must be positive when set",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_aliases_and_case() {
        assert_eq!(" Full ".parse::<CovarianceType>(), Ok(CovarianceType::Full));
        assert_eq!("free".parse::<CovarianceType>(), Ok(CovarianceType::Full));
        assert_eq!("DIAG".parse::<CovarianceType>(), Ok(CovarianceType::Diagonal));
        assert_eq!("tied".parse::<CovarianceType>(), Ok(CovarianceType::Tied));
        assert_eq!(
            "tied_diag".parse::<CovarianceType>(),
            Ok(CovarianceType::TiedDiagonal)
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = "spherical".parse::<CovarianceType>().unwrap_err();
        assert!(matches!(err, MixtureError::Configuration(_)));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for t in [
            CovarianceType::Full,
            CovarianceType::Diagonal,
            CovarianceType::Tied,
            CovarianceType::TiedDiagonal,
        ] {
            assert_eq!(t.to_string().parse::<CovarianceType>(), Ok(t));
        }
    }

    #[test]
    fn test_parameter_counts() {
        assert_eq!(CovarianceType::Full.parameters_per_component(2), Ok(5));
        assert_eq!(CovarianceType::Full.parameters_per_component(3), Ok(9));
        assert_eq!(CovarianceType::Diagonal.parameters_per_component(3), Ok(6));
        assert!(matches!(
            CovarianceType::Tied.parameters_per_component(3),
            Err(MixtureError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let c = SearchConfig::default();
        assert_eq!(c.covariance_type, CovarianceType::Full);
        assert_eq!(c.covariance_regularization, 0.0);
        assert_eq!(c.em_convergence_threshold, 1e-5);
        assert_eq!(c.max_em_iterations, 10_000);
        assert_eq!(c.max_search_rounds, None);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_scalars() {
        let bad = [
            SearchConfig::default().with_covariance_regularization(-1e-3),
            SearchConfig::default().with_covariance_regularization(f64::NAN),
            SearchConfig::default().with_em_convergence_threshold(0.0),
            SearchConfig::default().with_em_convergence_threshold(-1.0),
            SearchConfig::default().with_max_em_iterations(0),
            SearchConfig::default().with_max_search_rounds(0),
        ];
        for c in bad {
            assert!(
                matches!(c.validate(), Err(MixtureError::Configuration(_))),
                "{c:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_tied_validates_but_is_unsupported() {
        let c = SearchConfig::new(CovarianceType::Tied);
        assert!(c.validate().is_ok());
        assert!(matches!(
            c.covariance_type.ensure_supported(),
            Err(MixtureError::UnsupportedFeature(_))
        ));
    }
}
