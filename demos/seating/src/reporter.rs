//! Console output for claim runs.

use seatclaim_core::{AggregateResult, ClaimOutcome, OutcomeReporter};
use seatclaim_runtime::TracingReporter;
use std::io::Write;

/// Prints one JSON trace line per attempt on stdout, and forwards
/// everything to [`TracingReporter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConsoleReporter {
    trace: bool,
    logs: TracingReporter,
}

impl JsonConsoleReporter {
    /// Create a reporter; `trace` enables the per-attempt lines.
    #[must_use]
    pub const fn new(trace: bool) -> Self {
        Self {
            trace,
            logs: TracingReporter,
        }
    }

    /// The JSON line printed for `outcome`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the line cannot be encoded.
    pub fn line(outcome: &ClaimOutcome) -> serde_json::Result<String> {
        serde_json::to_string(&outcome.trace_line())
    }
}

impl OutcomeReporter for JsonConsoleReporter {
    fn attempt(&self, outcome: &ClaimOutcome) {
        self.logs.attempt(outcome);

        if !self.trace {
            return;
        }
        match Self::line(outcome) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = writeln!(stdout, "{line}") {
                    tracing::warn!(error = %e, "Failed to write trace line");
                }
            }
            Err(e) => tracing::warn!(user_id = %outcome.user(), error = %e, "Failed to encode trace line"),
        }
    }

    fn summary(&self, result: &AggregateResult) {
        self.logs.summary(result);
    }
}
