//! Elementary moves between mixtures with different component counts.
//!
//! Each operator builds a new candidate from the incumbent state and its
//! responsibilities, then refines the candidate with a full EM run. Inputs
//! are only borrowed; the incumbent is never touched.
//!
//! - **Split** replaces one component with two children placed one standard
//!   deviation either side of its mean along its principal axis.
//! - **Delete** drops one component and redistributes its mass.
//! - **Merge** fuses one component with its nearest neighbour in
//!   Kullback-Leibler divergence.
//!
//! # Invariants
//!
//! - An out-of-range index is a configuration error.
//! - Delete and merge need at least two components.
//! - Candidate weights sum to one before refinement starts.

use core::fmt;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::config::SearchConfig;
use crate::covariance::{estimate_covariance, estimate_covariances, weighted_mean};
use crate::divergence::kullback_leibler;
use crate::em::{self, EmDiagnostics, EmOutcome};
use crate::error::{MixtureError, Result};
use crate::responsibility::Responsibility;
use crate::state::MixtureState;

// ─── Operation ────────────────────────────────────────────────────────────────

/// The three elementary moves, in search evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Operation {
    /// K → K + 1.
    Split,
    /// K → K − 1 by removal.
    Delete,
    /// K → K − 1 by fusion.
    Merge,
}

impl Operation {
    /// All operations in evaluation order.
    pub const ALL: [Operation; 3] = [Operation::Split, Operation::Delete, Operation::Merge];

    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Delete => "delete",
            Self::Merge => "merge",
        }
    }

    /// Change in component count when this operation is accepted.
    pub fn component_delta(self) -> isize {
        match self {
            Self::Split => 1,
            Self::Delete | Self::Merge => -1,
        }
    }

    /// Whether the operation applies to a mixture of `n_components`.
    pub fn applies_to(self, n_components: usize) -> bool {
        match self {
            Self::Split => n_components >= 1,
            Self::Delete | Self::Merge => n_components >= 2,
        }
    }

    /// Run this operation on component `index`.
    pub fn apply(
        self,
        y: ArrayView2<'_, f64>,
        state: &MixtureState,
        responsibility: &Responsibility,
        index: usize,
        config: &SearchConfig,
    ) -> Result<Perturbation> {
        match self {
            Self::Split => split_component(y, state, responsibility, index, config),
            Self::Delete => delete_component(y, state, responsibility, index, config),
            Self::Merge => merge_component(y, state, responsibility, index, config),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Perturbation ─────────────────────────────────────────────────────────────

/// A refined candidate mixture produced by one operation.
#[derive(Clone, Debug)]
pub struct Perturbation {
    /// Which move produced the candidate.
    pub operation: Operation,
    /// Component the move was applied to.
    pub index: usize,
    /// Merge partner chosen by divergence; `None` for split and delete.
    pub partner: Option<usize>,
    /// EM record of the two children refined in isolation (split only).
    pub child_diagnostics: Option<EmDiagnostics>,
    /// The refined candidate.
    pub outcome: EmOutcome,
}

impl Perturbation {
    /// Total message length of the candidate in bits.
    pub fn message_length(&self) -> f64 {
        self.outcome.message_length.total
    }
}

fn check_inputs(
    y: ArrayView2<'_, f64>,
    state: &MixtureState,
    responsibility: &Responsibility,
    index: usize,
) -> Result<()> {
    state.check_index(index)?;
    state.structure().ensure_supported()?;
    if y.ncols() != state.dimension() {
        return Err(MixtureError::configuration(format!(
            "observations have {} dimensions, mixture has {}",
            y.ncols(),
            state.dimension()
        )));
    }
    if responsibility.n_components() != state.n_components()
        || responsibility.n_observations() != y.nrows()
    {
        return Err(MixtureError::configuration(format!(
            "responsibility is {}×{}, expected {}×{}",
            responsibility.n_components(),
            responsibility.n_observations(),
            state.n_components(),
            y.nrows()
        )));
    }
    Ok(())
}

fn require_two_components(operation: Operation, state: &MixtureState) -> Result<()> {
    if !operation.applies_to(state.n_components()) {
        return Err(MixtureError::configuration(format!(
            "cannot {operation} a component of a single-component mixture"
        )));
    }
    Ok(())
}

// ─── Split ────────────────────────────────────────────────────────────────────

/// Split component `index` along its principal axis.
///
/// The children are seeded by assigning every observation to the nearer
/// child mean (ties to the first child), refined alone with the parent's
/// responsibilities scaling their updates, then spliced back in: the first
/// child keeps `index`, the second is appended. The spliced mixture is
/// refined again as a whole.
pub fn split_component(
    y: ArrayView2<'_, f64>,
    state: &MixtureState,
    responsibility: &Responsibility,
    index: usize,
    config: &SearchConfig,
) -> Result<Perturbation> {
    check_inputs(y, state, responsibility, index)?;
    let k = state.n_components();
    let d = state.dimension();
    let n = y.nrows();
    let structure = state.structure();

    let (variance, axis) = state.covariance(index).principal_axis();
    let step = axis * variance.sqrt();
    let mean = state.mean(index);
    let mut child_means = Array2::<f64>::zeros((2, d));
    child_means.row_mut(0).assign(&(&mean - &step));
    child_means.row_mut(1).assign(&(&mean + &step));

    let mut child_seed = Array2::<f64>::zeros((2, n));
    for (i, row) in y.outer_iter().enumerate() {
        let d0: f64 = (&row - &child_means.row(0)).mapv(|v| v * v).sum();
        let d1: f64 = (&row - &child_means.row(1)).mapv(|v| v * v).sum();
        child_seed[[usize::from(d1 < d0), i]] = 1.0;
    }

    let child_covariances = estimate_covariances(
        y,
        child_seed.view(),
        child_means.view(),
        structure,
        config.covariance_regularization,
    )?;
    let membership = child_seed.sum_axis(Axis(1));
    let child_weights = &membership / membership.sum();
    let children = MixtureState::new(child_means, child_covariances, child_weights)?;

    let parent_responsibility = responsibility.row(index);
    let clipped_parent = parent_responsibility.mapv(|r| r.clamp(f64::EPSILON, 1.0));
    let refined = em::run(
        y,
        children,
        Some(child_seed.view()),
        Some(clipped_parent.view()),
        config,
    )?;
    let child_diagnostics = refined.diagnostics;
    let child_matrix = refined.responsibility.into_matrix();
    let (child_means, mut child_covariances, child_weights) = refined.state.into_parts();

    let parent_weight = state.weight(index);

    let mut means = Array2::<f64>::zeros((k + 1, d));
    means.slice_mut(s![..k, ..]).assign(&state.means());
    means.row_mut(index).assign(&child_means.row(0));
    means.row_mut(k).assign(&child_means.row(1));

    let second = child_covariances.pop();
    let first = child_covariances.pop();
    let (first, second) = first.zip(second).ok_or_else(|| {
        MixtureError::numerical("split refinement did not return two children")
    })?;
    let mut covariances = state.covariances().to_vec();
    covariances[index] = first;
    covariances.push(second);

    let mut weights = Array1::<f64>::zeros(k + 1);
    weights.slice_mut(s![..k]).assign(&state.weights());
    weights[index] = parent_weight * child_weights[0];
    weights[k] = parent_weight * child_weights[1];

    let mut seed = Array2::<f64>::zeros((k + 1, n));
    seed.slice_mut(s![..k, ..]).assign(&responsibility.matrix());
    seed.row_mut(index).assign(&(&parent_responsibility * &child_matrix.row(0)));
    seed.row_mut(k).assign(&(&parent_responsibility * &child_matrix.row(1)));

    let candidate = MixtureState::new(means, covariances, weights)?;
    let outcome = em::run(y, candidate, Some(seed.view()), None, config)?;
    tracing::debug!(
        index,
        components = k + 1,
        message_length = outcome.message_length.total,
        "split candidate refined"
    );
    Ok(Perturbation {
        operation: Operation::Split,
        index,
        partner: None,
        child_diagnostics: Some(child_diagnostics),
        outcome,
    })
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// Remove component `index`.
///
/// Remaining weights are divided by `1 − w_index`; remaining responsibility
/// rows by `1 − r_index` per observation, clipped to `[0, 1]` with
/// non-finite entries set to zero.
pub fn delete_component(
    y: ArrayView2<'_, f64>,
    state: &MixtureState,
    responsibility: &Responsibility,
    index: usize,
    config: &SearchConfig,
) -> Result<Perturbation> {
    check_inputs(y, state, responsibility, index)?;
    require_two_components(Operation::Delete, state)?;
    let k = state.n_components();
    let keep: Vec<usize> = (0..k).filter(|&j| j != index).collect();

    let removed_weight = state.weight(index);
    let weights = state
        .weights()
        .select(Axis(0), &keep)
        .mapv(|w| (w / (1.0 - removed_weight)).clamp(0.0, 1.0));

    let mut seed = responsibility.matrix().select(Axis(0), &keep);
    redistribute_removed(&mut seed, responsibility.row(index));

    let means = state.means().select(Axis(0), &keep);
    let covariances = keep.iter().map(|&j| state.covariance(j).clone()).collect();
    let candidate = MixtureState::new(means, covariances, weights)?;
    let outcome = em::run(y, candidate, Some(seed.view()), None, config)?;
    tracing::debug!(
        index,
        components = k - 1,
        message_length = outcome.message_length.total,
        "delete candidate refined"
    );
    Ok(Perturbation {
        operation: Operation::Delete,
        index,
        partner: None,
        child_diagnostics: None,
        outcome,
    })
}

/// Divide every row of `rows` by `1 − removed` per observation, clipping to
/// `[0, 1]` and zeroing non-finite entries.
fn redistribute_removed(rows: &mut Array2<f64>, removed: ArrayView1<'_, f64>) {
    for mut row in rows.outer_iter_mut() {
        row.zip_mut_with(&removed, |r, &gone| {
            let v = (*r / (1.0 - gone)).clamp(0.0, 1.0);
            *r = if v.is_finite() { v } else { 0.0 };
        });
    }
}

// ─── Merge ────────────────────────────────────────────────────────────────────

/// Component with the smallest `KL(index ‖ other)`. Ties go to the lowest
/// index.
pub fn nearest_component(state: &MixtureState, index: usize) -> Result<usize> {
    state.check_index(index)?;
    let a = state.component(index);
    let mut best: Option<(usize, f64)> = None;
    for (j, b) in state.components().enumerate() {
        if j == index {
            continue;
        }
        let kl = kullback_leibler(a.mean, a.covariance, b.mean, b.covariance)?;
        if best.map_or(true, |(_, current)| kl < current) {
            best = Some((j, kl));
        }
    }
    best.map(|(j, _)| j).ok_or_else(|| {
        MixtureError::configuration("a single-component mixture has no merge partner")
    })
}

/// Fuse component `index` with its nearest neighbour.
///
/// Weights and responsibility rows are summed, then one mean and covariance
/// is estimated from the combined responsibilities. The merged component
/// takes the lower of the two indices; the higher one is removed.
pub fn merge_component(
    y: ArrayView2<'_, f64>,
    state: &MixtureState,
    responsibility: &Responsibility,
    index: usize,
    config: &SearchConfig,
) -> Result<Perturbation> {
    check_inputs(y, state, responsibility, index)?;
    require_two_components(Operation::Merge, state)?;
    let k = state.n_components();
    let partner = nearest_component(state, index)?;

    let merged_weight = state.weight(index) + state.weight(partner);
    let merged_responsibility = &responsibility.row(index) + &responsibility.row(partner);
    let merged_mean = weighted_mean(y, merged_responsibility.view())?;
    let merged_covariance = estimate_covariance(
        y,
        merged_responsibility.view(),
        merged_mean.view(),
        state.structure(),
        config.covariance_regularization,
    )?;

    let keep_index = index.min(partner);
    let drop_index = index.max(partner);
    let keep: Vec<usize> = (0..k).filter(|&j| j != drop_index).collect();

    let mut means = state.means().select(Axis(0), &keep);
    means.row_mut(keep_index).assign(&merged_mean);
    let mut covariances: Vec<_> = keep.iter().map(|&j| state.covariance(j).clone()).collect();
    covariances[keep_index] = merged_covariance;
    let mut weights = state.weights().select(Axis(0), &keep);
    weights[keep_index] = merged_weight;
    let mut seed = responsibility.matrix().select(Axis(0), &keep);
    seed.row_mut(keep_index).assign(&merged_responsibility);

    let candidate = MixtureState::new(means, covariances, weights)?;
    let outcome = em::run(y, candidate, Some(seed.view()), None, config)?;
    tracing::debug!(
        index,
        partner,
        components = k - 1,
        message_length = outcome.message_length.total,
        "merge candidate refined"
    );
    Ok(Perturbation {
        operation: Operation::Merge,
        index,
        partner: Some(partner),
        child_diagnostics: None,
        outcome,
    })
}
