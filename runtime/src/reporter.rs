//! Reporter that writes outcomes to `tracing`.

use seatclaim_core::{AggregateResult, ClaimOutcome, OutcomeReporter, RejectReason};

/// Logs each attempt and the run summary as structured events.
///
/// Bound seats are logged at `debug`, expected rejections at `info` and store
/// faults at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl OutcomeReporter for TracingReporter {
    fn attempt(&self, outcome: &ClaimOutcome) {
        match outcome {
            ClaimOutcome::Bound { user, seat } => {
                tracing::debug!(user_id = %user, seat_id = %seat, "Seat bound");
            }
            ClaimOutcome::Rejected { user, reason } => match reason {
                RejectReason::NoSeatAvailable | RejectReason::VersionConflict => {
                    tracing::info!(user_id = %user, reason = reason.label(), "Claim rejected");
                }
                RejectReason::StoreUnavailable(_) | RejectReason::TaskFailed(_) => {
                    tracing::warn!(user_id = %user, error = %reason, "Claim failed");
                }
            },
        }
    }

    fn summary(&self, result: &AggregateResult) {
        tracing::info!(
            strategy = %result.strategy,
            users = result.total_claimants,
            bound = result.bound_count,
            rejected = result.rejected_count,
            busy = result.observed_busy_resources,
            no_seat = result.rejections.no_seat_available,
            version_conflict = result.rejections.version_conflict,
            store_errors = result.rejections.store_errors,
            "Claim summary"
        );
    }
}
