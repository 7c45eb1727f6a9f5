//! Pessimistic claims: row lock with `SKIP LOCKED`.

use super::{ClaimStrategy, settle};
use seatclaim_core::{BoxFuture, ClaimError, ClaimSession, SeatId, SeatStore, StrategyKind, UserId};
use std::sync::Arc;

/// Binds a seat while holding its row lock.
///
/// 1. Begin a transaction.
/// 2. `SELECT ... FOR UPDATE SKIP LOCKED` one free seat.
/// 3. None visible: roll back, `NoSeatAvailable`.
/// 4. Update the locked row, no version check needed.
/// 5. Commit, releasing the lock.
///
/// Attempts on different rows proceed in parallel. With `skip_locked` an
/// attempt never queues behind another attempt's lock; if every free seat is
/// locked at that instant it reports `NoSeatAvailable` instead.
pub struct PessimisticStrategy<S> {
    store: Arc<S>,
    skip_locked: bool,
}

impl<S: SeatStore> PessimisticStrategy<S> {
    /// Create a pessimistic strategy that skips locked rows.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self {
            store,
            skip_locked: true,
        }
    }

    /// Create a variant that waits on locked rows (`FOR UPDATE` without
    /// `SKIP LOCKED`).
    ///
    /// Attempts then queue behind each other's locks; useful to compare
    /// against the default.
    #[must_use]
    pub const fn waiting(store: Arc<S>) -> Self {
        Self {
            store,
            skip_locked: false,
        }
    }

    /// Whether locked rows are skipped.
    #[must_use]
    pub const fn skips_locked(&self) -> bool {
        self.skip_locked
    }

    async fn claim_seat(&self, user: UserId) -> Result<SeatId, ClaimError> {
        let mut session = self.store.acquire().await?;

        session.begin().await?;
        let result = Self::lock_and_bind(&mut session, user, self.skip_locked).await;
        settle(&mut session, result).await
    }

    async fn lock_and_bind(
        session: &mut S::Session,
        user: UserId,
        skip_locked: bool,
    ) -> Result<SeatId, ClaimError> {
        let seat = session
            .find_one_free_and_lock(skip_locked)
            .await?
            .ok_or(ClaimError::NoSeatAvailable)?;

        session.bind_unconditionally(seat.id, user).await?;

        Ok(seat.id)
    }
}

impl<S: SeatStore> ClaimStrategy for PessimisticStrategy<S> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pessimistic
    }

    fn claim(&self, user: UserId) -> BoxFuture<'_, Result<SeatId, ClaimError>> {
        Box::pin(self.claim_seat(user))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use seatclaim_core::{SeatStore as _, SeatVersion};
    use seatclaim_testing::InMemorySeatStore;
    use std::time::Duration;

    #[tokio::test]
    async fn binds_locked_seat() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(2));
        let strategy = PessimisticStrategy::new(Arc::clone(&store));

        let seat = strategy.claim(UserId::new(5)).await.unwrap();

        let bound = store.seats().into_iter().find(|s| s.id == seat).unwrap();
        assert_eq!(bound.owner, Some(UserId::new(5)));
        assert_eq!(bound.version, SeatVersion::new(2));
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn locked_only_candidate_is_skipped_not_awaited() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        let strategy = PessimisticStrategy::new(Arc::clone(&store));

        // Hold the only free row's lock from another transaction.
        let mut holder = store.acquire().await.unwrap();
        holder.begin().await.unwrap();
        let locked = holder.find_one_free_and_lock(true).await.unwrap();
        assert!(locked.is_some());

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            strategy.claim(UserId::new(2)),
        )
        .await
        .expect("skip-locked claim must not wait on the lock holder");

        assert_eq!(result, Err(ClaimError::NoSeatAvailable));

        holder.rollback().await.unwrap();
        assert!(store.seats()[0].is_free());
    }

    #[tokio::test]
    async fn waiting_variant_blocks_behind_lock_holder() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        let strategy = PessimisticStrategy::waiting(Arc::clone(&store));
        assert!(!strategy.skips_locked());

        let mut holder = store.acquire().await.unwrap();
        holder.begin().await.unwrap();
        holder.find_one_free_and_lock(true).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), strategy.claim(UserId::new(2))).await;
        assert!(blocked.is_err(), "waiting claim should still be queued");

        holder.rollback().await.unwrap();

        let seat = strategy.claim(UserId::new(2)).await.unwrap();
        assert_eq!(seat, SeatId::new(1));
    }

    #[tokio::test]
    async fn rejects_when_table_is_full() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(0));
        let strategy = PessimisticStrategy::new(Arc::clone(&store));

        let err = strategy.claim(UserId::new(1)).await.unwrap_err();

        assert_eq!(err, ClaimError::NoSeatAvailable);
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn already_bound_seat_is_never_reassigned() {
        let store = Arc::new(InMemorySeatStore::with_free_seats(1));
        store.force_bind(SeatId::new(1), UserId::new(10));
        let strategy = PessimisticStrategy::new(Arc::clone(&store));

        let err = strategy.claim(UserId::new(11)).await.unwrap_err();

        assert_eq!(err, ClaimError::NoSeatAvailable);
        assert_eq!(store.seats()[0].owner, Some(UserId::new(10)));
        assert_eq!(store.count_bound().await.unwrap(), 1);
    }
}
