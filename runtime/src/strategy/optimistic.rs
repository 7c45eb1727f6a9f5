//! Optimistic claims: version-stamped, no row lock.

use super::{ClaimStrategy, settle};
use seatclaim_core::{
    BoxFuture, ClaimError, ClaimSession, Seat, SeatId, SeatStore, StrategyKind, UserId,
};
use std::sync::Arc;

/// Binds a seat with a compare-and-swap on its version.
///
/// 1. Read one free seat and its version, without a lock.
/// 2. Begin a transaction.
/// 3. No seat read: roll back, `NoSeatAvailable`.
/// 4. `UPDATE ... WHERE version = read_version`.
/// 5. Zero rows: roll back, `VersionConflict`.
/// 6. Commit.
///
/// Under heavy contention on a small pool many attempts read the same free
/// seat, so the rejection rate climbs sharply.
pub struct OptimisticStrategy<S> {
    store: Arc<S>,
}

impl<S: SeatStore> OptimisticStrategy<S> {
    /// Create an optimistic strategy over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn claim_seat(&self, user: UserId) -> Result<SeatId, ClaimError> {
        let mut session = self.store.acquire().await?;

        let candidate = session.find_one_free().await?;

        session.begin().await?;
        let result = Self::bind(&mut session, candidate, user).await;
        settle(&mut session, result).await
    }

    async fn bind(
        session: &mut S::Session,
        candidate: Option<Seat>,
        user: UserId,
    ) -> Result<SeatId, ClaimError> {
        let Some(seat) = candidate else {
            return Err(ClaimError::NoSeatAvailable);
        };

        let rows = session
            .bind_if_version_matches(seat.id, user, seat.version)
            .await?;

        if rows == 0 {
            return Err(ClaimError::VersionConflict {
                seat_id: seat.id,
                expected: seat.version,
            });
        }

        Ok(seat.id)
    }
}

impl<S: SeatStore> ClaimStrategy for OptimisticStrategy<S> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Optimistic
    }

    fn claim(&self, user: UserId) -> BoxFuture<'_, Result<SeatId, ClaimError>> {
        Box::pin(self.claim_seat(user))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use seatclaim_core::{SeatVersion, StoreError};
    use seatclaim_testing::InMemorySeatStore;

    #[tokio::test]
    async fn binds_free_seat_and_bumps_version() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        let strategy = OptimisticStrategy::new(Arc::clone(&store));

        let seat = strategy.claim(UserId::new(1)).await.unwrap();

        let seats = store.seats();
        assert_eq!(seats[0].id, seat);
        assert_eq!(seats[0].owner, Some(UserId::new(1)));
        assert_eq!(seats[0].version, SeatVersion::new(2));
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn rejects_when_no_free_seat() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        let strategy = OptimisticStrategy::new(Arc::clone(&store));

        strategy.claim(UserId::new(1)).await.unwrap();
        let err = strategy.claim(UserId::new(2)).await.unwrap_err();

        assert_eq!(err, ClaimError::NoSeatAvailable);
        assert_eq!(store.seats()[0].version, SeatVersion::new(2));
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn stale_read_is_a_version_conflict() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        let strategy = OptimisticStrategy::new(Arc::clone(&store));

        // Another writer binds the seat between the unlocked read and the update.
        store.before_next_version_check({
            let store = Arc::clone(&store);
            move || store.force_bind(SeatId::new(1), UserId::new(99))
        });

        let err = strategy.claim(UserId::new(1)).await.unwrap_err();

        assert_eq!(
            err,
            ClaimError::VersionConflict {
                seat_id: SeatId::new(1),
                expected: SeatVersion::initial(),
            }
        );
        assert_eq!(store.seats()[0].owner, Some(UserId::new(99)));
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_store_error() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        store.fail_next_acquires(1);
        let strategy = OptimisticStrategy::new(Arc::clone(&store));

        let err = strategy.claim(UserId::new(1)).await.unwrap_err();

        assert!(matches!(err, ClaimError::Store(StoreError::Unavailable(_))));
        assert!(store.seats()[0].is_free());
    }

    #[tokio::test]
    async fn failed_commit_leaves_seat_free() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        store.fail_next_commits(1);
        let strategy = OptimisticStrategy::new(Arc::clone(&store));

        let err = strategy.claim(UserId::new(1)).await.unwrap_err();

        assert!(matches!(err, ClaimError::Store(_)));
        assert!(store.seats()[0].is_free());
        assert_eq!(store.seats()[0].version, SeatVersion::initial());
        assert_eq!(store.open_transactions(), 0);
    }
}
