//! Error type shared by every stage of the fit.
//!
//! Three failure classes exist. Configuration problems are caught before any
//! arithmetic happens. Numerical problems abort the fit that hit them (the
//! search controller may instead disqualify a single candidate, see
//! [`crate::search`]). Unsupported covariance structures fail at first use.
//!
//! A capped EM run is *not* an error: it is reported through
//! [`crate::em::EmDiagnostics::hit_iteration_cap`].

use thiserror::Error;

/// Errors raised while configuring or fitting a mixture.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixtureError {
    /// Invalid configuration or arguments: bad covariance type, non-positive
    /// threshold or iteration cap, negative regularization, out-of-range
    /// component index, empty input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A covariance was not positive-definite, or a likelihood,
    /// responsibility or message length was non-finite.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// The requested covariance structure is declared but not implemented.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
}

impl MixtureError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical(message.into())
    }

    /// `true` for [`MixtureError::Numerical`].
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, MixtureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_class_and_message() {
        let e = MixtureError::numerical("covariance 2 is not positive-definite");
        assert_eq!(
            e.to_string(),
            "numerical error: covariance 2 is not positive-definite"
        );
        assert!(e.is_numerical());
        assert!(!MixtureError::configuration("x").is_numerical());
    }
}
