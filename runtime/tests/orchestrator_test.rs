//! End-to-end claim runs against the in-memory seat store.
//!
//! The in-memory store has the same locking and visibility rules as the
//! `PostgreSQL` store, so these runs check the orchestrator and both strategies
//! under real task concurrency without Docker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use proptest::prelude::*;
use seatclaim_core::{
    BoxFuture, ClaimError, ClaimOutcome, RejectReason, SeatId, SeatStore, StrategyKind, UserId,
};
use seatclaim_runtime::{
    ClaimOrchestrator, ClaimStrategy, OptimisticStrategy, RetryPolicy, build_strategy, claimants,
};
use seatclaim_testing::{
    InMemorySeatStore, RecordingReporter, assert_bindings_match, assert_exclusive_owners,
};
use std::sync::Arc;
use std::time::Duration;

async fn run(
    store: &Arc<InMemorySeatStore>,
    kind: StrategyKind,
    users: i32,
) -> seatclaim_runtime::RunReport {
    ClaimOrchestrator::for_kind(Arc::clone(store), kind)
        .run(claimants(users))
        .await
        .expect("run failed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pessimistic_run_binds_every_seat_once() {
    let store = Arc::new(InMemorySeatStore::with_free_seats(100).with_max_connections(8));

    let report = run(&store, StrategyKind::Pessimistic, 120).await;

    assert_eq!(report.summary.total_claimants, 120);
    assert_eq!(report.summary.bound_count, 100);
    assert_eq!(report.summary.rejected_count, 20);
    assert_eq!(report.summary.observed_busy_resources, 100);
    assert_eq!(report.summary.rejections.no_seat_available, 20);
    assert!(report.summary.is_conserved());
    assert!(report.summary.is_consistent());

    let seats = store.seats();
    assert_eq!(assert_exclusive_owners(&seats), 100);
    assert_bindings_match(&report.bound_seats(), &seats);
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optimistic_run_never_double_books() {
    let store = Arc::new(InMemorySeatStore::with_free_seats(100).with_max_connections(8));

    let report = run(&store, StrategyKind::Optimistic, 120).await;

    let summary = &report.summary;
    assert!(summary.is_conserved());
    assert!(summary.is_consistent());
    assert!(summary.bound_count >= 1);
    assert!(summary.bound_count <= 100);
    assert_eq!(summary.rejections.store_errors, 0);
    assert!(report.bindings_are_exclusive());

    let seats = store.seats();
    assert_eq!(assert_exclusive_owners(&seats) as u64, summary.bound_count);
    assert_bindings_match(&report.bound_seats(), &seats);
}

#[tokio::test]
async fn more_seats_than_users_leaves_the_rest_free() {
    let store = Arc::new(InMemorySeatStore::with_free_seats(10));

    let report = run(&store, StrategyKind::Pessimistic, 4).await;

    assert_eq!(report.summary.bound_count, 4);
    assert_eq!(store.seats().iter().filter(|s| s.is_free()).count(), 6);
}

#[tokio::test]
async fn zero_free_seats_rejects_everyone() {
    for kind in [StrategyKind::Optimistic, StrategyKind::Pessimistic] {
        let store = Arc::new(InMemorySeatStore::with_free_seats(0));

        let report = run(&store, kind, 25).await;

        assert_eq!(report.summary.bound_count, 0, "{kind}");
        assert_eq!(report.summary.rejections.no_seat_available, 25, "{kind}");
        assert_eq!(report.summary.observed_busy_resources, 0, "{kind}");
    }
}

#[tokio::test]
async fn store_failures_are_isolated_to_their_attempts() {
    let store = Arc::new(InMemorySeatStore::with_free_seats(10));
    store.fail_next_acquires(3);

    let report = run(&store, StrategyKind::Pessimistic, 10).await;

    assert_eq!(report.summary.bound_count, 7);
    assert_eq!(report.summary.rejections.store_errors, 3);
    assert_eq!(report.summary.observed_busy_resources, 7);
    assert!(report.summary.is_consistent());

    let unavailable = report
        .outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                ClaimOutcome::Rejected {
                    reason: RejectReason::StoreUnavailable(_),
                    ..
                }
            )
        })
        .count();
    assert_eq!(unavailable, 3);
}

/// Delegates to a real strategy, except that one user's task panics.
struct PanicsFor {
    user: UserId,
    inner: Arc<dyn ClaimStrategy>,
}

impl ClaimStrategy for PanicsFor {
    fn kind(&self) -> StrategyKind {
        self.inner.kind()
    }

    fn claim(&self, user: UserId) -> BoxFuture<'_, Result<SeatId, ClaimError>> {
        Box::pin(async move {
            if user == self.user {
                panic!("claim task for user {user} blew up");
            }
            self.inner.claim(user).await
        })
    }
}

#[tokio::test]
async fn panicking_task_does_not_abort_the_run() {
    let store = Arc::new(InMemorySeatStore::with_free_seats(10));
    let reporter = Arc::new(RecordingReporter::new());
    let strategy = Arc::new(PanicsFor {
        user: UserId::new(3),
        inner: build_strategy(StrategyKind::Pessimistic, Arc::clone(&store)),
    });

    let report = ClaimOrchestrator::new(Arc::clone(&store), strategy)
        .with_reporter(reporter.clone())
        .run(claimants(5))
        .await
        .unwrap();

    let summary = &report.summary;
    assert!(summary.is_conserved());
    assert!(summary.is_consistent());
    assert_eq!(summary.total_claimants, 5);
    assert_eq!(summary.bound_count, 4);
    assert_eq!(summary.rejections.store_errors, 1);
    assert_eq!(summary.observed_busy_resources, 4);

    let failed: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                ClaimOutcome::Rejected {
                    reason: RejectReason::TaskFailed(_),
                    ..
                }
            )
        })
        .map(ClaimOutcome::user)
        .collect();
    assert_eq!(failed, vec![UserId::new(3)]);

    assert_eq!(reporter.attempts().len(), 5);
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test]
async fn saturated_table_rejects_a_second_wave() {
    for kind in [StrategyKind::Optimistic, StrategyKind::Pessimistic] {
        let store = Arc::new(InMemorySeatStore::with_free_seats(5));
        let first = run(&store, StrategyKind::Pessimistic, 5).await;
        assert_eq!(first.summary.bound_count, 5);
        let before = store.seats();

        let report = ClaimOrchestrator::for_kind(Arc::clone(&store), kind)
            .run((101..=110).map(UserId::new))
            .await
            .unwrap();

        assert_eq!(report.summary.bound_count, 0, "{kind}");
        assert_eq!(report.summary.rejected_count, 10, "{kind}");
        assert_eq!(report.summary.rejections.no_seat_available, 10, "{kind}");
        assert_eq!(report.summary.observed_busy_resources, 5, "{kind}");
        // Owners and versions are untouched by rejected attempts.
        assert_eq!(store.seats(), before, "{kind}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_size_bounds_parallel_sessions() {
    let store = Arc::new(InMemorySeatStore::with_free_seats(40).with_max_connections(4));

    let report = run(&store, StrategyKind::Pessimistic, 60).await;

    assert_eq!(report.summary.bound_count, 40);
    assert!(store.peak_sessions() <= 4, "peak {}", store.peak_sessions());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optimistic_retries_recover_lost_races() {
    // Each failed attempt is caused by another user's commit, so with ten users
    // nobody can lose more than nine times.
    let store = Arc::new(InMemorySeatStore::with_free_seats(10).with_max_connections(10));
    let policy = RetryPolicy::builder()
        .max_retries(10)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build();

    let report = ClaimOrchestrator::new(
        Arc::clone(&store),
        Arc::new(OptimisticStrategy::new(Arc::clone(&store))),
    )
    .with_retry(policy)
    .run(claimants(10))
    .await
    .unwrap();

    assert_eq!(report.summary.bound_count, 10);
    assert_eq!(report.summary.rejections.version_conflict, 0);
    assert_eq!(store.count_bound().await.unwrap(), 10);
}

#[tokio::test]
async fn every_attempt_yields_one_trace_line() {
    let store = Arc::new(InMemorySeatStore::with_free_seats(2));
    let reporter = Arc::new(RecordingReporter::new());

    ClaimOrchestrator::for_kind(Arc::clone(&store), StrategyKind::Pessimistic)
        .with_reporter(reporter.clone())
        .run(claimants(3))
        .await
        .unwrap();

    let lines = reporter.trace_lines();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines.iter().filter(|l| l.seat_id.is_some()).count(), 2);

    let rejected: Vec<_> = lines.iter().filter(|l| l.seat_id.is_none()).collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].error.as_deref(), Some("No available seats."));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn runs_conserve_claimants_and_keep_owners_exclusive(
        seats in 0i32..30,
        users in 0i32..40,
        pool in 1usize..6,
        optimistic in any::<bool>(),
    ) {
        let kind = if optimistic { StrategyKind::Optimistic } else { StrategyKind::Pessimistic };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let (report, final_seats) = runtime.block_on(async {
            let store = Arc::new(InMemorySeatStore::with_free_seats(seats).with_max_connections(pool));
            let report = run(&store, kind, users).await;
            (report, store.seats())
        });

        let summary = &report.summary;
        prop_assert!(summary.is_conserved());
        prop_assert!(summary.is_consistent());
        prop_assert_eq!(summary.total_claimants, u64::try_from(users).unwrap());
        prop_assert_eq!(assert_exclusive_owners(&final_seats) as u64, summary.bound_count);
        assert_bindings_match(&report.bound_seats(), &final_seats);

        if kind == StrategyKind::Pessimistic {
            prop_assert_eq!(summary.bound_count, u64::try_from(seats.min(users)).unwrap());
        }
    }
}
