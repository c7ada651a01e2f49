//! Search diagnostics: events, sinks and the per-fit summary.
//!
//! The search controller reports what it does through a [`DiagnosticsSink`]
//! supplied by the caller rather than a process-wide logger. Three sinks ship
//! with the crate:
//!
//! | Sink | Behaviour |
//! |------|-----------|
//! | [`TracingSink`] | forwards every event to `tracing` (default) |
//! | [`RecordingSink`] | keeps every event in memory |
//! | `()` | discards everything |
//!
//! Independently of the sink, EM steps and perturbation operators emit
//! `trace`/`debug` spans through `tracing` directly.

use crate::em::EmDiagnostics;
use crate::perturbation::Operation;

// ─── Events ───────────────────────────────────────────────────────────────────

/// One observable step of a mixture search.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchEvent {
    /// The single-component starting mixture has been refined and scored.
    Initialized {
        /// Message length of the starting mixture (bits).
        message_length: f64,
        /// Its total log-likelihood (nats).
        log_likelihood: f64,
    },
    /// A candidate was built and refined.
    CandidateEvaluated {
        /// Search round, starting at 1.
        round: usize,
        /// Move that produced the candidate.
        operation: Operation,
        /// Component the move was applied to.
        index: usize,
        /// Component count of the candidate.
        n_components: usize,
        /// Candidate message length (bits).
        message_length: f64,
    },
    /// A candidate failed numerically and was left out of the round.
    CandidateDisqualified {
        /// Search round, starting at 1.
        round: usize,
        /// Move that failed.
        operation: Operation,
        /// Component the move was applied to.
        index: usize,
        /// Error message.
        reason: String,
    },
    /// An EM run stopped at its iteration cap without converging.
    IterationCapReached {
        /// Search round, or 0 for the starting mixture.
        round: usize,
        /// Move whose refinement was capped; `None` for the starting mixture.
        operation: Option<Operation>,
        /// Component the move was applied to.
        index: usize,
        /// Iterations performed.
        iterations: usize,
    },
    /// The best candidate of a round beat the incumbent and replaced it.
    Accepted {
        /// Search round, starting at 1.
        round: usize,
        /// Winning move.
        operation: Operation,
        /// Component the move was applied to.
        index: usize,
        /// New component count.
        n_components: usize,
        /// New message length (bits).
        message_length: f64,
        /// Bits saved relative to the previous incumbent.
        improvement: f64,
    },
    /// No candidate improved on the incumbent, or the target size was
    /// reached.
    Converged {
        /// Rounds with an accepted move.
        rounds: usize,
        /// Final component count.
        n_components: usize,
        /// Final message length (bits).
        message_length: f64,
    },
    /// The configured round limit stopped the search.
    RoundLimitReached {
        /// Rounds with an accepted move.
        rounds: usize,
    },
    /// The search aborted.
    Failed {
        /// Error message.
        reason: String,
    },
}

// ─── Sinks ────────────────────────────────────────────────────────────────────

/// Receiver of search events.
pub trait DiagnosticsSink {
    /// Handle one event.
    fn record(&mut self, event: &SearchEvent);
}

impl DiagnosticsSink for () {
    fn record(&mut self, _event: &SearchEvent) {}
}

impl<S: DiagnosticsSink + ?Sized> DiagnosticsSink for &mut S {
    fn record(&mut self, event: &SearchEvent) {
        (**self).record(event);
    }
}

/// Forwards events to `tracing` with structured fields.
///
/// Candidate evaluations go out at `debug`, accepted moves and termination
/// at `info`, disqualifications and capped EM runs at `warn`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&mut self, event: &SearchEvent) {
        match event {
            SearchEvent::Initialized {
                message_length,
                log_likelihood,
            } => tracing::info!(message_length, log_likelihood, "search initialized"),
            SearchEvent::CandidateEvaluated {
                round,
                operation,
                index,
                n_components,
                message_length,
            } => tracing::debug!(
                round,
                operation = operation.as_str(),
                index,
                n_components,
                message_length,
                "candidate evaluated"
            ),
            SearchEvent::CandidateDisqualified {
                round,
                operation,
                index,
                reason,
            } => tracing::warn!(
                round,
                operation = operation.as_str(),
                index,
                reason = reason.as_str(),
                "candidate disqualified"
            ),
            SearchEvent::IterationCapReached {
                round,
                operation,
                index,
                iterations,
            } => tracing::warn!(
                round,
                operation = operation.map_or("initialize", Operation::as_str),
                index,
                iterations,
                "em iteration cap reached"
            ),
            SearchEvent::Accepted {
                round,
                operation,
                index,
                n_components,
                message_length,
                improvement,
            } => tracing::info!(
                round,
                operation = operation.as_str(),
                index,
                n_components,
                message_length,
                improvement,
                "perturbation accepted"
            ),
            SearchEvent::Converged {
                rounds,
                n_components,
                message_length,
            } => tracing::info!(rounds, n_components, message_length, "search converged"),
            SearchEvent::RoundLimitReached { rounds } => {
                tracing::info!(rounds, "search round limit reached")
            }
            SearchEvent::Failed { reason } => {
                tracing::warn!(reason = reason.as_str(), "search failed")
            }
        }
    }
}

/// Keeps every event, in order.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    /// Recorded events.
    pub events: Vec<SearchEvent>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SearchEvent) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn record(&mut self, event: &SearchEvent) {
        self.events.push(event.clone());
    }
}

// ─── Summary ──────────────────────────────────────────────────────────────────

/// A move accepted during the search.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcceptedMove {
    /// Search round, starting at 1.
    pub round: usize,
    /// Winning move.
    pub operation: Operation,
    /// Component the move was applied to.
    pub index: usize,
    /// Component count after the move.
    pub n_components: usize,
    /// Message length after the move (bits).
    pub message_length: f64,
}

/// Summary of one fit.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitDiagnostics {
    /// Rounds with an accepted move.
    pub rounds: usize,
    /// Every accepted move, in order.
    pub accepted: Vec<AcceptedMove>,
    /// Candidates refined and scored.
    pub candidates_evaluated: usize,
    /// Candidates left out after a numerical failure.
    pub candidates_disqualified: usize,
    /// EM runs (starting mixture and candidates) that hit the iteration cap.
    pub iteration_cap_hits: usize,
    /// Whether `max_search_rounds` stopped the search.
    pub round_limit_reached: bool,
    /// EM record of the final mixture.
    pub em: EmDiagnostics,
}

impl FitDiagnostics {
    /// `true` if any EM run stopped at its iteration cap.
    pub fn convergence_warning(&self) -> bool {
        self.iteration_cap_hits > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let mut sink = RecordingSink::new();
        sink.record(&SearchEvent::RoundLimitReached { rounds: 1 });
        sink.record(&SearchEvent::Failed {
            reason: "x".into(),
        });
        assert_eq!(sink.events.len(), 2);
        assert_eq!(sink.events[0], SearchEvent::RoundLimitReached { rounds: 1 });
        assert_eq!(
            sink.count(|e| matches!(e, SearchEvent::Failed { .. })),
            1
        );
    }

    #[test]
    fn test_mut_reference_forwards() {
        fn feed<S: DiagnosticsSink>(mut sink: S) {
            sink.record(&SearchEvent::RoundLimitReached { rounds: 2 });
        }
        let mut sink = RecordingSink::new();
        feed(&mut sink);
        feed(&mut sink);
        assert_eq!(sink.events.len(), 2);
    }

    #[test]
    fn test_tracing_and_unit_sinks_accept_every_event() {
        let events = [
            SearchEvent::Initialized {
                message_length: 10.0,
                log_likelihood: -3.0,
            },
            SearchEvent::IterationCapReached {
                round: 0,
                operation: None,
                index: 0,
                iterations: 5,
            },
            SearchEvent::Converged {
                rounds: 0,
                n_components: 1,
                message_length: 10.0,
            },
        ];
        for e in &events {
            TracingSink.record(e);
            ().record(e);
        }
    }
}
