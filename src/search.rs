//! Greedy model-space search driven by message length.
//!
//! [`MixtureSearch`] starts from a single component fitted to all the data.
//! Every round it refines one candidate per (operation, component) pair,
//! keeps the cheapest, and accepts it only if it strictly beats the
//! incumbent. The search stops at the first round without an improvement.
//!
//! ```text
//! Initializing ──► Searching ──► Converged
//!       │              │ ▲
//!       │              └─┘ accepted
//!       └──────────────┴──► Failed
//! ```
//!
//! # Invariants
//!
//! - Candidates are evaluated split, delete, merge, each by ascending
//!   component index; the first of equally cheap candidates wins.
//! - The incumbent is replaced as a whole, and only on acceptance.
//! - A candidate that fails numerically is disqualified for its round and
//!   reported to the sink. So is a candidate with a component whose effective
//!   membership does not exceed its free parameter count. Configuration and unsupported-feature errors abort
//!   the search.
//! - An unsupported covariance structure or malformed input is rejected
//!   before the phase changes.

use ndarray::ArrayView2;

use crate::config::SearchConfig;
use crate::diagnostics::{AcceptedMove, DiagnosticsSink, FitDiagnostics, SearchEvent, TracingSink};
use crate::em::{self, EmDiagnostics, EmOutcome};
use crate::error::{MixtureError, Result};
use crate::message_length::MessageLength;
use crate::perturbation::{Operation, Perturbation};
use crate::responsibility::Responsibility;
use crate::state::{check_observations, MixtureState};

// ─── SearchPhase ──────────────────────────────────────────────────────────────

/// Lifecycle of a search controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchPhase {
    /// No fit has started, or the last one was rejected before it began.
    Initializing,
    /// Rounds are being evaluated.
    Searching,
    /// The last fit finished.
    Converged,
    /// The last fit aborted with an error.
    Failed,
}

// ─── BestPerturbation ─────────────────────────────────────────────────────────

/// Cheapest candidate seen in the current round.
#[derive(Debug)]
struct BestPerturbation {
    cost: f64,
    candidate: Option<Perturbation>,
}

impl BestPerturbation {
    fn new() -> Self {
        Self {
            cost: f64::INFINITY,
            candidate: None,
        }
    }

    /// Keep `candidate` if it is strictly cheaper than the current best.
    fn offer(&mut self, candidate: Perturbation) {
        let cost = candidate.message_length();
        if cost < self.cost {
            self.cost = cost;
            self.candidate = Some(candidate);
        }
    }
}

// ─── FittedMixture ────────────────────────────────────────────────────────────

/// Result of a completed search.
#[derive(Clone, Debug)]
pub struct FittedMixture {
    /// Final mixture.
    pub state: MixtureState,
    /// Responsibilities of the data under `state`.
    pub responsibility: Responsibility,
    /// Message length breakdown of `state`.
    pub message_length: MessageLength,
    /// Search summary.
    pub diagnostics: FitDiagnostics,
}

impl FittedMixture {
    /// Number of components found.
    pub fn n_components(&self) -> usize {
        self.state.n_components()
    }

    /// Most responsible component for every observation.
    pub fn labels(&self) -> Vec<usize> {
        self.responsibility.assignments()
    }
}

// ─── MixtureSearch ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
enum Goal {
    /// Accept moves while they shorten the message.
    Minimize,
    /// Split until this many components exist.
    Grow(usize),
}

/// Search controller.
#[derive(Debug)]
pub struct MixtureSearch<S = TracingSink> {
    config: SearchConfig,
    sink: S,
    phase: SearchPhase,
}

impl MixtureSearch<TracingSink> {
    /// Controller reporting through `tracing`.
    pub fn new(config: SearchConfig) -> Result<Self> {
        Self::with_sink(config, TracingSink)
    }
}

impl<S: DiagnosticsSink> MixtureSearch<S> {
    /// Controller reporting to `sink`. Fails if `config` is invalid.
    pub fn with_sink(config: SearchConfig, sink: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sink,
            phase: SearchPhase::Initializing,
        })
    }

    /// Validated configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    /// The diagnostics sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the controller, returning its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Search for the mixture of `y` (N×D) with the shortest message.
    pub fn fit(&mut self, y: ArrayView2<'_, f64>) -> Result<FittedMixture> {
        self.run(y, Goal::Minimize)
    }

    /// Grow a mixture of exactly `n_components` by repeatedly accepting the
    /// cheapest split, whether or not it shortens the message.
    ///
    /// [`SearchConfig::max_search_rounds`] does not apply here.
    pub fn fit_components(
        &mut self,
        y: ArrayView2<'_, f64>,
        n_components: usize,
    ) -> Result<FittedMixture> {
        if n_components == 0 {
            return Err(MixtureError::configuration(
                "n_components must be a positive integer",
            ));
        }
        if n_components > y.nrows() {
            return Err(MixtureError::configuration(format!(
                "cannot fit {n_components} components to {} observations",
                y.nrows()
            )));
        }
        self.run(y, Goal::Grow(n_components))
    }

    fn run(&mut self, y: ArrayView2<'_, f64>, goal: Goal) -> Result<FittedMixture> {
        self.config.covariance_type.ensure_supported()?;
        check_observations(y)?;

        self.phase = SearchPhase::Initializing;
        match self.search(y, goal) {
            Ok(fitted) => {
                self.phase = SearchPhase::Converged;
                Ok(fitted)
            }
            Err(e) => {
                self.phase = SearchPhase::Failed;
                self.sink.record(&SearchEvent::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn search(&mut self, y: ArrayView2<'_, f64>, goal: Goal) -> Result<FittedMixture> {
        let config = self.config.clone();
        let mut summary = Summary::default();

        let initial = MixtureState::initialize(y, &config)?;
        let mut incumbent = em::run(y, initial, None, None, &config)?;
        self.sink.record(&SearchEvent::Initialized {
            message_length: incumbent.message_length.total,
            log_likelihood: incumbent.diagnostics.log_likelihood,
        });
        self.note_cap(&mut summary, &incumbent.diagnostics, 0, None, 0);

        self.phase = SearchPhase::Searching;
        loop {
            let k = incumbent.state.n_components();
            if let Goal::Grow(target) = goal {
                if k >= target {
                    break;
                }
            }
            if matches!(goal, Goal::Minimize) && config.max_search_rounds == Some(summary.rounds) {
                summary.round_limit_reached = true;
                self.sink.record(&SearchEvent::RoundLimitReached {
                    rounds: summary.rounds,
                });
                break;
            }

            let round = summary.rounds + 1;
            let operations: &[Operation] = match goal {
                Goal::Minimize => &Operation::ALL,
                Goal::Grow(_) => &[Operation::Split],
            };
            let best = self.evaluate_round(y, &incumbent, operations, round, &mut summary)?;

            let Some(candidate) = best.candidate else {
                if let Goal::Grow(_) = goal {
                    return Err(MixtureError::numerical(format!(
                        "every split candidate failed at {k} components"
                    )));
                }
                break;
            };
            let previous = incumbent.message_length.total;
            let improves = candidate.message_length() < previous;
            if !improves && matches!(goal, Goal::Minimize) {
                break;
            }

            let n_components = candidate.outcome.state.n_components();
            let message_length = candidate.message_length();
            self.sink.record(&SearchEvent::Accepted {
                round,
                operation: candidate.operation,
                index: candidate.index,
                n_components,
                message_length,
                improvement: previous - message_length,
            });
            summary.accepted.push(AcceptedMove {
                round,
                operation: candidate.operation,
                index: candidate.index,
                n_components,
                message_length,
            });
            summary.rounds = round;
            incumbent = candidate.outcome;
        }

        self.sink.record(&SearchEvent::Converged {
            rounds: summary.rounds,
            n_components: incumbent.state.n_components(),
            message_length: incumbent.message_length.total,
        });
        Ok(summary.finish(incumbent))
    }

    /// Refine every candidate of one round and return the cheapest.
    fn evaluate_round(
        &mut self,
        y: ArrayView2<'_, f64>,
        incumbent: &EmOutcome,
        operations: &[Operation],
        round: usize,
        summary: &mut Summary,
    ) -> Result<BestPerturbation> {
        let k = incumbent.state.n_components();
        let mut best = BestPerturbation::new();
        for &operation in operations {
            if !operation.applies_to(k) {
                continue;
            }
            for index in 0..k {
                let result = operation
                    .apply(y, &incumbent.state, &incumbent.responsibility, index, &self.config)
                    .and_then(|candidate| {
                        let outcome = &candidate.outcome;
                        check_membership(&outcome.state, &outcome.responsibility)?;
                        Ok(candidate)
                    });
                match result {
                    Ok(candidate) => {
                        summary.candidates_evaluated += 1;
                        self.sink.record(&SearchEvent::CandidateEvaluated {
                            round,
                            operation,
                            index,
                            n_components: candidate.outcome.state.n_components(),
                            message_length: candidate.message_length(),
                        });
                        if let Some(child) = &candidate.child_diagnostics {
                            self.note_cap(summary, child, round, Some(operation), index);
                        }
                        self.note_cap(
                            summary,
                            &candidate.outcome.diagnostics,
                            round,
                            Some(operation),
                            index,
                        );
                        best.offer(candidate);
                    }
                    Err(e) if e.is_numerical() => {
                        summary.candidates_disqualified += 1;
                        self.sink.record(&SearchEvent::CandidateDisqualified {
                            round,
                            operation,
                            index,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(best)
    }

    fn note_cap(
        &mut self,
        summary: &mut Summary,
        diagnostics: &EmDiagnostics,
        round: usize,
        operation: Option<Operation>,
        index: usize,
    ) {
        if diagnostics.hit_iteration_cap {
            summary.iteration_cap_hits += 1;
            self.sink.record(&SearchEvent::IterationCapReached {
                round,
                operation,
                index,
                iterations: diagnostics.iterations,
            });
        }
    }
}

/// Reject an outcome with a component supported by no more observations
/// than it has free parameters.
fn check_membership(state: &MixtureState, responsibility: &Responsibility) -> Result<()> {
    let parameters = state.structure().parameters_per_component(state.dimension())? as f64;
    let membership = responsibility.effective_membership();
    match membership.iter().position(|&n_k| n_k <= parameters) {
        Some(j) => Err(MixtureError::numerical(format!(
            "component {j} has effective membership {:.3}, needs more than {parameters}",
            membership[j]
        ))),
        None => Ok(()),
    }
}

/// Counters accumulated while a search runs.
#[derive(Debug, Default)]
struct Summary {
    rounds: usize,
    accepted: Vec<AcceptedMove>,
    candidates_evaluated: usize,
    candidates_disqualified: usize,
    iteration_cap_hits: usize,
    round_limit_reached: bool,
}

impl Summary {
    fn finish(self, incumbent: EmOutcome) -> FittedMixture {
        FittedMixture {
            state: incumbent.state,
            responsibility: incumbent.responsibility,
            message_length: incumbent.message_length,
            diagnostics: FitDiagnostics {
                rounds: self.rounds,
                accepted: self.accepted,
                candidates_evaluated: self.candidates_evaluated,
                candidates_disqualified: self.candidates_disqualified,
                iteration_cap_hits: self.iteration_cap_hits,
                round_limit_reached: self.round_limit_reached,
                em: incumbent.diagnostics,
            },
        }
    }
}
