//! Claim errors, per-attempt outcomes and the aggregate run result.

use crate::store::StoreError;
use crate::types::{SeatId, SeatVersion, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for [`StrategyKind`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown strategy: {0} (expected `optimistic` or `pessimistic`)")]
pub struct ParseStrategyKindError(String);

/// Concurrency-control discipline used for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Version-stamped, lock-free, conflict detected at write time.
    Optimistic,
    /// Row-locked with `SKIP LOCKED`, conflict avoided up front.
    Pessimistic,
}

impl StrategyKind {
    /// Lowercase name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Pessimistic => "pessimistic",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ParseStrategyKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" | "occ" => Ok(Self::Optimistic),
            "pessimistic" | "pcc" => Ok(Self::Pessimistic),
            other => Err(ParseStrategyKindError(other.to_string())),
        }
    }
}

/// Why a single claim attempt did not bind a seat.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// No free seat existed, or none was visible to this attempt.
    #[error("No available seats.")]
    NoSeatAvailable,

    /// The optimistic update lost the race for this seat.
    ///
    /// Covers both "someone bound it after we read it" and "it was already
    /// stale when we read it"; the two are not distinguished.
    #[error("The seat was updated by another transaction (seat {seat_id}, expected version {expected}).")]
    VersionConflict {
        /// Seat whose version moved
        seat_id: SeatId,
        /// Version this attempt read before updating
        expected: SeatVersion,
    },

    /// Infrastructure fault while talking to the store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClaimError {
    /// Expected rejections under contention, as opposed to system faults.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::NoSeatAvailable | Self::VersionConflict { .. })
    }
}

/// Reason recorded for a rejected claim.
///
/// Every reason counts as "rejected" when tallying; the distinction is kept
/// for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum RejectReason {
    /// No free seat was visible.
    NoSeatAvailable,
    /// Optimistic version check failed.
    VersionConflict,
    /// The store failed during this attempt.
    StoreUnavailable(String),
    /// The claim task panicked or was aborted.
    TaskFailed(String),
}

impl RejectReason {
    /// Short label used for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NoSeatAvailable => "no_seat_available",
            Self::VersionConflict => "version_conflict",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::TaskFailed(_) => "task_failed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSeatAvailable => f.write_str("No available seats."),
            Self::VersionConflict => {
                f.write_str("The seat was updated by another transaction.")
            }
            Self::StoreUnavailable(msg) => write!(f, "{msg}"),
            Self::TaskFailed(msg) => write!(f, "Claim task failed: {msg}"),
        }
    }
}

impl From<&ClaimError> for RejectReason {
    fn from(error: &ClaimError) -> Self {
        match error {
            ClaimError::NoSeatAvailable => Self::NoSeatAvailable,
            ClaimError::VersionConflict { .. } => Self::VersionConflict,
            ClaimError::Store(e) => Self::StoreUnavailable(e.to_string()),
        }
    }
}

/// Terminal state of one claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The user now owns `seat`.
    Bound {
        /// Claimant
        user: UserId,
        /// Seat bound to the claimant
        seat: SeatId,
    },
    /// The user got nothing.
    Rejected {
        /// Claimant
        user: UserId,
        /// Why the attempt failed
        reason: RejectReason,
    },
}

impl ClaimOutcome {
    /// Build an outcome from a strategy result.
    #[must_use]
    pub fn from_result(user: UserId, result: &Result<SeatId, ClaimError>) -> Self {
        match result {
            Ok(seat) => Self::Bound { user, seat: *seat },
            Err(error) => Self::Rejected {
                user,
                reason: RejectReason::from(error),
            },
        }
    }

    /// The claimant this outcome belongs to.
    #[must_use]
    pub const fn user(&self) -> UserId {
        match self {
            Self::Bound { user, .. } | Self::Rejected { user, .. } => *user,
        }
    }

    /// The bound seat, if any.
    #[must_use]
    pub const fn seat(&self) -> Option<SeatId> {
        match self {
            Self::Bound { seat, .. } => Some(*seat),
            Self::Rejected { .. } => None,
        }
    }

    /// Whether the attempt bound a seat.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }

    /// The per-attempt trace line for this outcome.
    #[must_use]
    pub fn trace_line(&self) -> TraceLine {
        match self {
            Self::Bound { user, seat } => TraceLine {
                user_id: *user,
                seat_id: Some(*seat),
                error: None,
            },
            Self::Rejected { user, reason } => TraceLine {
                user_id: *user,
                seat_id: None,
                error: Some(reason.to_string()),
            },
        }
    }
}

/// One line of the per-attempt trace.
///
/// Serializes as `{"userId":1,"seatId":7}` or `{"userId":1,"error":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceLine {
    /// Claimant
    pub user_id: UserId,
    /// Bound seat
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seat_id: Option<SeatId>,
    /// Rejection message
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Rejections split by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBreakdown {
    /// `NoSeatAvailable` rejections
    pub no_seat_available: u64,
    /// `VersionConflict` rejections
    pub version_conflict: u64,
    /// Store failures and failed tasks
    pub store_errors: u64,
}

impl RejectionBreakdown {
    /// Sum over every reason.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.no_seat_available + self.version_conflict + self.store_errors
    }

    fn record(&mut self, reason: &RejectReason) {
        match reason {
            RejectReason::NoSeatAvailable => self.no_seat_available += 1,
            RejectReason::VersionConflict => self.version_conflict += 1,
            RejectReason::StoreUnavailable(_) | RejectReason::TaskFailed(_) => {
                self.store_errors += 1;
            }
        }
    }
}

/// Tally of a whole run.
///
/// `observed_busy_resources` comes from the store after every attempt has
/// settled, not from the in-memory tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    /// Strategy the run used
    pub strategy: StrategyKind,
    /// Number of claim attempts dispatched
    pub total_claimants: u64,
    /// Attempts that bound a seat
    pub bound_count: u64,
    /// Attempts that were rejected for any reason
    pub rejected_count: u64,
    /// Bound seats counted in the store after the run
    pub observed_busy_resources: u64,
    /// Rejections by reason
    pub rejections: RejectionBreakdown,
    /// Wall-clock time of the fan-out, in milliseconds
    pub elapsed_ms: u64,
}

impl AggregateResult {
    /// Tally `outcomes` and attach the store's busy-seat count.
    #[must_use]
    pub fn from_outcomes(
        strategy: StrategyKind,
        outcomes: &[ClaimOutcome],
        observed_busy_resources: u64,
        elapsed_ms: u64,
    ) -> Self {
        let mut bound_count = 0;
        let mut rejections = RejectionBreakdown::default();
        for outcome in outcomes {
            match outcome {
                ClaimOutcome::Bound { .. } => bound_count += 1,
                ClaimOutcome::Rejected { reason, .. } => rejections.record(reason),
            }
        }

        Self {
            strategy,
            total_claimants: outcomes.len() as u64,
            bound_count,
            rejected_count: rejections.total(),
            observed_busy_resources,
            rejections,
            elapsed_ms,
        }
    }

    /// `bound + rejected == total`.
    #[must_use]
    pub const fn is_conserved(&self) -> bool {
        self.bound_count + self.rejected_count == self.total_claimants
    }

    /// `bound == busy`; holds when the table started with no bound seats.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.bound_count == self.observed_busy_resources
    }
}
