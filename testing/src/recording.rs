//! Reporter that records what it is told, for assertions.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use seatclaim_core::{AggregateResult, ClaimOutcome, OutcomeReporter, TraceLine};
use std::sync::Mutex;

/// Captures every attempt outcome and summary it receives.
///
/// # Example
///
/// ```
/// use seatclaim_testing::RecordingReporter;
/// use seatclaim_core::{ClaimOutcome, OutcomeReporter, SeatId, UserId};
///
/// let reporter = RecordingReporter::new();
/// reporter.attempt(&ClaimOutcome::Bound { user: UserId::new(1), seat: SeatId::new(4) });
///
/// assert_eq!(reporter.attempts().len(), 1);
/// assert!(reporter.summaries().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct RecordingReporter {
    attempts: Mutex<Vec<ClaimOutcome>>,
    summaries: Mutex<Vec<AggregateResult>>,
}

impl RecordingReporter {
    /// Create an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes in the order they were reported.
    #[must_use]
    pub fn attempts(&self) -> Vec<ClaimOutcome> {
        self.attempts.lock().unwrap().clone()
    }

    /// Summaries in the order they were reported.
    #[must_use]
    pub fn summaries(&self) -> Vec<AggregateResult> {
        self.summaries.lock().unwrap().clone()
    }

    /// Trace lines for every recorded attempt.
    #[must_use]
    pub fn trace_lines(&self) -> Vec<TraceLine> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(ClaimOutcome::trace_line)
            .collect()
    }
}

impl OutcomeReporter for RecordingReporter {
    fn attempt(&self, outcome: &ClaimOutcome) {
        self.attempts.lock().unwrap().push(outcome.clone());
    }

    fn summary(&self, result: &AggregateResult) {
        self.summaries.lock().unwrap().push(result.clone());
    }
}
