//! Expectation-maximization refinement of a mixture.
//!
//! [`run`] evaluates the starting state once (E-step and score), then
//! alternates M-steps and E-steps until the relative change in total
//! log-likelihood is at or below [`SearchConfig::em_convergence_threshold`]
//! or [`SearchConfig::max_em_iterations`] M-steps have run. An E/M pair
//! that lengthens the message by more than [`MESSAGE_LENGTH_TOLERANCE`] is
//! discarded and the run stops on the state before it, so the message length
//! never grows across the trace.
//!
//! The M-step uses closed-form updates:
//!
//! - weight: `(n_k + ½) / (N + K/2)`, renormalized to sum to one
//! - mean: responsibility-weighted average of the observations
//! - covariance: responsibility-weighted scatter over `n_k − 1` (or `n_k`
//!   when `n_k ≤ 1`) plus the configured diagonal regularization
//!
//! When a parent responsibility vector is supplied, the mean and covariance
//! updates use `parent ⊙ responsibility` while the weights keep the unscaled
//! responsibilities. This is how the two children of a split are refined in
//! isolation without claiming more than their parent's share of the data.
//!
//! # Invariants
//!
//! - Every returned state satisfies [`MixtureState`]'s invariants.
//! - A non-finite log-likelihood or convergence ratio is an error.
//! - `message_length_trace` is non-increasing up to the tolerance.
//! - Reaching the iteration cap is not an error; it sets
//!   [`EmDiagnostics::hit_iteration_cap`].

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::config::SearchConfig;
use crate::covariance::{estimate_covariances, weighted_mean};
use crate::error::{MixtureError, Result};
use crate::message_length::{self, MessageLength};
use crate::responsibility::{self, Responsibility};
use crate::state::MixtureState;

/// Relative growth of the message length (bits) tolerated across one E/M pair.
pub const MESSAGE_LENGTH_TOLERANCE: f64 = 1e-9;

/// Convergence record of one EM run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmDiagnostics {
    /// M-steps performed.
    pub iterations: usize,
    /// Whether the run stopped before the cap, either on the relative
    /// log-likelihood threshold or on a step that would lengthen the message.
    pub converged: bool,
    /// Whether the last M-step was discarded because it lengthened the
    /// message.
    pub message_length_increased: bool,
    /// Whether the run stopped at the iteration cap without converging.
    pub hit_iteration_cap: bool,
    /// Final total log-likelihood (nats).
    pub log_likelihood: f64,
    /// Total log-likelihood of the starting state and after every M-step.
    pub log_likelihood_trace: Vec<f64>,
    /// Total message length (bits), aligned with `log_likelihood_trace`.
    pub message_length_trace: Vec<f64>,
}

/// Result of an EM run: the refined state, its responsibilities and score.
#[derive(Clone, Debug)]
pub struct EmOutcome {
    /// Refined mixture.
    pub state: MixtureState,
    /// Responsibilities of `state`.
    pub responsibility: Responsibility,
    /// Convergence record.
    pub diagnostics: EmDiagnostics,
    /// Message length of `state`.
    pub message_length: MessageLength,
}

/// Refine `state` against `y` (N×D).
///
/// `seed` replaces the responsibilities of the starting state in the first
/// M-step. `parent` scales the mean and covariance updates per observation.
pub fn run(
    y: ArrayView2<'_, f64>,
    state: MixtureState,
    seed: Option<ArrayView2<'_, f64>>,
    parent: Option<ArrayView1<'_, f64>>,
    config: &SearchConfig,
) -> Result<EmOutcome> {
    let n = y.nrows();
    let k = state.n_components();
    if let Some(seed) = seed {
        if seed.dim() != (k, n) {
            return Err(MixtureError::numerical(format!(
                "seed responsibility is {:?}, expected ({k}, {n})",
                seed.dim()
            )));
        }
    }
    if let Some(parent) = parent {
        if parent.len() != n {
            return Err(MixtureError::numerical(format!(
                "parent responsibility has {} entries, expected {n}",
                parent.len()
            )));
        }
    }

    let (mut responsibility, mut message_length) = evaluate(y, &state)?;
    let mut state = state;
    let mut log_likelihood_trace = vec![responsibility.total_log_likelihood()];
    let mut message_length_trace = vec![message_length.total];

    let mut iterations = 0;
    let mut converged = false;
    let mut message_length_increased = false;
    let mut pending_seed = seed;
    loop {
        let next_state = match pending_seed.take() {
            Some(seed) => maximize(y, &state, seed, parent, config)?,
            None => maximize(y, &state, responsibility.matrix(), parent, config)?,
        };
        let (next_responsibility, next_message_length) = evaluate(y, &next_state)?;

        let previous = responsibility.total_log_likelihood();
        let current = next_responsibility.total_log_likelihood();
        let relative_change = ((current - previous) / previous).abs();
        if !relative_change.is_finite() {
            return Err(MixtureError::numerical(format!(
                "relative log-likelihood change is not finite ({previous} → {current})"
            )));
        }

        let allowed = message_length.total + MESSAGE_LENGTH_TOLERANCE * message_length.total.abs();
        if next_message_length.total > allowed {
            tracing::debug!(
                iteration = iterations + 1,
                message_length = message_length.total,
                rejected = next_message_length.total,
                "em step lengthened the message; keeping the previous state"
            );
            message_length_increased = true;
            converged = true;
            break;
        }

        iterations += 1;
        state = next_state;
        responsibility = next_responsibility;
        message_length = next_message_length;
        log_likelihood_trace.push(current);
        message_length_trace.push(message_length.total);

        tracing::trace!(
            iteration = iterations,
            log_likelihood = current,
            message_length = message_length.total,
            relative_change,
            "em step"
        );

        if relative_change <= config.em_convergence_threshold {
            converged = true;
            break;
        }
        if iterations >= config.max_em_iterations {
            break;
        }
    }

    let hit_iteration_cap = !converged;
    if hit_iteration_cap {
        tracing::debug!(
            max_em_iterations = config.max_em_iterations,
            components = k,
            "em reached its iteration cap"
        );
    }

    let diagnostics = EmDiagnostics {
        iterations,
        converged,
        message_length_increased,
        hit_iteration_cap,
        log_likelihood: responsibility.total_log_likelihood(),
        log_likelihood_trace,
        message_length_trace,
    };
    Ok(EmOutcome {
        state,
        responsibility,
        diagnostics,
        message_length,
    })
}

/// E-step plus scoring of a fixed state.
fn evaluate(y: ArrayView2<'_, f64>, state: &MixtureState) -> Result<(Responsibility, MessageLength)> {
    let responsibility = responsibility::compute(y, state)?;
    let length = message_length::score(
        y,
        state,
        responsibility.matrix(),
        -responsibility.total_log_likelihood(),
    )?;
    Ok((responsibility, length))
}

/// Closed-form M-step from a K×N responsibility matrix.
pub fn maximize(
    y: ArrayView2<'_, f64>,
    state: &MixtureState,
    responsibility: ArrayView2<'_, f64>,
    parent: Option<ArrayView1<'_, f64>>,
    config: &SearchConfig,
) -> Result<MixtureState> {
    let n = y.nrows() as f64;
    let k = responsibility.nrows();

    let membership = responsibility.sum_axis(Axis(1));
    let mut weights: Array1<f64> = membership.mapv(|m| (m + 0.5) / (n + k as f64 / 2.0));
    let total = weights.sum();
    weights /= total;

    let scaled: Array2<f64> = match parent {
        Some(parent) => &responsibility * &parent.insert_axis(Axis(0)),
        None => responsibility.to_owned(),
    };

    let mut means = Array2::<f64>::zeros((k, y.ncols()));
    for (j, (mut mean, r)) in means.outer_iter_mut().zip(scaled.outer_iter()).enumerate() {
        let estimate = weighted_mean(y, r).map_err(|e| match e {
            MixtureError::Numerical(m) => MixtureError::numerical(format!("component {j}: {m}")),
            other => other,
        })?;
        mean.assign(&estimate);
    }
    let covariances = estimate_covariances(
        y,
        scaled.view(),
        means.view(),
        state.structure(),
        config.covariance_regularization,
    )?;
    MixtureState::new(means, covariances, weights)
}
