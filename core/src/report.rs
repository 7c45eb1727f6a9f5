//! Sink for claim outcomes.

use crate::outcome::{AggregateResult, ClaimOutcome};

/// Receives each attempt's outcome as it settles, and the run summary.
///
/// Called concurrently from claim tasks, so implementations must be
/// `Send + Sync` and should not block for long.
pub trait OutcomeReporter: Send + Sync {
    /// One attempt reached a terminal state.
    fn attempt(&self, outcome: &ClaimOutcome);

    /// All attempts settled and the store was cross-checked.
    fn summary(&self, result: &AggregateResult);
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl OutcomeReporter for NoopReporter {
    fn attempt(&self, _outcome: &ClaimOutcome) {}

    fn summary(&self, _result: &AggregateResult) {}
}
