//! Fan-out of claim attempts and aggregation of their outcomes.
//!
//! The orchestrator spawns one task per user, all at once. Each task draws its
//! own pooled connection, so the pool size bounds real parallelism; the rest
//! wait for a connection. Tasks never share in-process state: every conflict
//! is resolved by the store's transactions and locks.
//!
//! Once every task has settled, the store is asked how many seats are bound.
//! That count is reported next to the tally as an independent cross-check.
//!
//! # Example
//!
//! ```ignore
//! use seatclaim_runtime::{ClaimOrchestrator, claimants};
//! use seatclaim_core::StrategyKind;
//!
//! let orchestrator = ClaimOrchestrator::for_kind(store, StrategyKind::Pessimistic);
//! let report = orchestrator.run(claimants(1200)).await?;
//! assert_eq!(report.summary.bound_count, report.summary.observed_busy_resources);
//! ```

use crate::metrics::ClaimMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::strategy::{ClaimStrategy, build_strategy};
use futures::future::join_all;
use seatclaim_core::{
    AggregateResult, ClaimError, ClaimOutcome, NoopReporter, OutcomeReporter, RejectReason,
    SeatId, SeatStore, StoreError, StrategyKind, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Users `1..=count`, matching a freshly seeded user table.
#[must_use]
pub fn claimants(count: i32) -> Vec<UserId> {
    (1..=count).map(UserId::new).collect()
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Aggregate counts and the store cross-check
    pub summary: AggregateResult,
    /// Every attempt's terminal outcome, in dispatch order
    pub outcomes: Vec<ClaimOutcome>,
}

impl RunReport {
    /// `(user, seat)` for every successful attempt.
    #[must_use]
    pub fn bound_seats(&self) -> Vec<(UserId, SeatId)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.seat().map(|seat| (o.user(), seat)))
            .collect()
    }

    /// Whether no seat was reported bound to two different attempts.
    #[must_use]
    pub fn bindings_are_exclusive(&self) -> bool {
        let mut seen = HashSet::new();
        self.bound_seats().into_iter().all(|(_, seat)| seen.insert(seat))
    }
}

/// Runs one claim attempt per user and tallies the results.
pub struct ClaimOrchestrator<S> {
    store: Arc<S>,
    strategy: Arc<dyn ClaimStrategy>,
    reporter: Arc<dyn OutcomeReporter>,
    retry: RetryPolicy,
}

impl<S: SeatStore> ClaimOrchestrator<S> {
    /// Create an orchestrator with an explicit strategy.
    ///
    /// Outcomes are not reported anywhere and nothing is retried until
    /// configured otherwise.
    #[must_use]
    pub fn new(store: Arc<S>, strategy: Arc<dyn ClaimStrategy>) -> Self {
        Self {
            store,
            strategy,
            reporter: Arc::new(NoopReporter),
            retry: RetryPolicy::none(),
        }
    }

    /// Create an orchestrator using the standard strategy for `kind`.
    #[must_use]
    pub fn for_kind(store: Arc<S>, kind: StrategyKind) -> Self {
        let strategy = build_strategy(kind, Arc::clone(&store));
        Self::new(store, strategy)
    }

    /// Send outcomes and the summary to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn OutcomeReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Retry attempts that lose an optimistic race, per `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Claim one seat for every user, concurrently.
    ///
    /// Individual failures never abort the run: every error, expected or
    /// not, becomes a rejected outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only if the final busy-seat count cannot be read.
    pub async fn run(
        &self,
        users: impl IntoIterator<Item = UserId>,
    ) -> Result<RunReport, StoreError> {
        let kind = self.strategy.kind();
        let started = Instant::now();

        let handles: Vec<_> = users
            .into_iter()
            .map(|user| {
                let strategy = Arc::clone(&self.strategy);
                let reporter = Arc::clone(&self.reporter);
                let retry = self.retry.clone();
                let task = async move {
                    let outcome = attempt(strategy.as_ref(), user, &retry).await;
                    reporter.attempt(&outcome);
                    outcome
                };
                let handle = tokio::spawn(
                    task.instrument(tracing::debug_span!("claim", user_id = %user, strategy = %kind)),
                );
                (user, handle)
            })
            .collect();

        tracing::info!(
            claimants = handles.len(),
            strategy = %kind,
            retries = self.retry.retries(),
            "Claims dispatched"
        );

        let joined = join_all(
            handles
                .into_iter()
                .map(|(user, handle)| async move { (user, handle.await) }),
        )
        .await;

        let outcomes: Vec<ClaimOutcome> = joined
            .into_iter()
            .map(|(user, result)| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(user_id = %user, error = %e, "Claim task failed");
                    let outcome = ClaimOutcome::Rejected {
                        user,
                        reason: RejectReason::TaskFailed(e.to_string()),
                    };
                    self.reporter.attempt(&outcome);
                    outcome
                }
            })
            .collect();

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let busy = self.store.count_bound().await?;
        ClaimMetrics::record_busy(kind, busy);

        let summary = AggregateResult::from_outcomes(kind, &outcomes, busy, elapsed_ms);
        if summary.is_consistent() {
            tracing::info!(
                strategy = %kind,
                bound = summary.bound_count,
                rejected = summary.rejected_count,
                busy = summary.observed_busy_resources,
                elapsed_ms,
                "Claim run finished"
            );
        } else {
            // Expected when seats were already bound before the run.
            tracing::warn!(
                strategy = %kind,
                bound = summary.bound_count,
                busy = summary.observed_busy_resources,
                "Bound count differs from busy seats in the store"
            );
        }

        self.reporter.summary(&summary);

        Ok(RunReport { summary, outcomes })
    }
}

async fn attempt(strategy: &dyn ClaimStrategy, user: UserId, retry: &RetryPolicy) -> ClaimOutcome {
    let kind = strategy.kind();
    ClaimMetrics::record_attempt(kind);
    let started = Instant::now();

    let mut tries = 0usize;
    let result = retry_with_predicate(
        retry,
        || {
            if tries > 0 {
                ClaimMetrics::record_retry(kind);
            }
            tries += 1;
            strategy.claim(user)
        },
        |e: &ClaimError| matches!(e, ClaimError::VersionConflict { .. }),
    )
    .await;

    let outcome = ClaimOutcome::from_result(user, &result);
    match &outcome {
        ClaimOutcome::Bound { .. } => ClaimMetrics::record_bound(kind, started.elapsed()),
        ClaimOutcome::Rejected { reason, .. } => {
            ClaimMetrics::record_rejected(kind, reason, started.elapsed());
        }
    }
    outcome
}
