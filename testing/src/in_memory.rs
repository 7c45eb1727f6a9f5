//! In-memory seat store with row locks.
//!
//! Behaves like a `READ COMMITTED` database as far as the claim protocol can
//! tell:
//!
//! - uncommitted binds are only visible to the session that wrote them;
//! - `UPDATE` and `FOR UPDATE` wait while another transaction holds the row;
//! - `FOR UPDATE SKIP LOCKED` passes over rows locked by others;
//! - commit publishes writes and releases locks, rollback (or dropping the
//!   session mid-transaction) discards them;
//! - at most `max_connections` sessions exist at once, further `acquire`
//!   calls wait.
//!
//! Faults can be injected for acquire and commit, and a hook can run right
//! before a version-checked update to stage a lost race deterministically.

#![allow(clippy::missing_panics_doc)] // Lock poisoning is recovered, not propagated

use seatclaim_core::{
    BoxFuture, ClaimSession, Seat, SeatId, SeatStore, SeatVersion, StoreError, UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Default connection limit, mirroring a small production pool.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    committed: BTreeMap<SeatId, Seat>,
    locks: HashMap<SeatId, u64>,
    pending: HashMap<u64, BTreeMap<SeatId, Seat>>,
    open: HashSet<u64>,
    next_session: u64,
    active_sessions: usize,
    peak_sessions: usize,
    fail_acquires: usize,
    fail_commits: usize,
    version_hook: Option<Hook>,
}

impl State {
    /// The row as `session` sees it: its own pending write, else committed.
    fn view(&self, session: u64, seat: SeatId) -> Option<Seat> {
        self.pending
            .get(&session)
            .and_then(|writes| writes.get(&seat))
            .or_else(|| self.committed.get(&seat))
            .cloned()
    }

    fn locked_by_other(&self, session: u64, seat: SeatId) -> bool {
        self.locks.get(&seat).is_some_and(|holder| *holder != session)
    }

    fn release(&mut self, session: u64) {
        self.pending.remove(&session);
        self.locks.retain(|_, holder| *holder != session);
        self.open.remove(&session);
    }
}

struct Shared {
    state: Mutex<State>,
    released: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Seat store held entirely in memory.
///
/// # Example
///
/// ```
/// use seatclaim_testing::InMemorySeatStore;
/// use seatclaim_core::{ClaimSession, SeatStore, UserId};
///
/// # async fn example() -> Result<(), seatclaim_core::StoreError> {
/// let store = InMemorySeatStore::with_free_seats(10);
///
/// let mut session = store.acquire().await?;
/// session.begin().await?;
/// let seat = session.find_one_free_and_lock(true).await?.expect("free seat");
/// session.bind_unconditionally(seat.id, UserId::new(1)).await?;
/// session.commit().await?;
///
/// assert_eq!(store.count_bound().await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemorySeatStore {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
}

impl InMemorySeatStore {
    /// A store holding `seats`, keyed by their ids.
    #[must_use]
    pub fn with_seats(seats: impl IntoIterator<Item = Seat>) -> Self {
        let state = State {
            committed: seats.into_iter().map(|seat| (seat.id, seat)).collect(),
            ..State::default()
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                released: Notify::new(),
            }),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
        }
    }

    /// A store with seats `1..=count`, all free at the initial version.
    #[must_use]
    pub fn with_free_seats(count: i32) -> Self {
        Self::with_seats((1..=count).map(|id| Seat::free(SeatId::new(id))))
    }

    /// Limit concurrent sessions to `max` (at least 1).
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Committed seats, ordered by id.
    #[must_use]
    pub fn seats(&self) -> Vec<Seat> {
        self.shared.state().committed.values().cloned().collect()
    }

    /// Number of sessions currently inside a transaction.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.shared.state().open.len()
    }

    /// Highest number of sessions that existed at the same time.
    #[must_use]
    pub fn peak_sessions(&self) -> usize {
        self.shared.state().peak_sessions
    }

    /// Commit a bind from "outside" every session, ignoring locks.
    ///
    /// Stands in for a concurrent writer whose transaction already committed.
    pub fn force_bind(&self, seat: SeatId, user: UserId) {
        let mut state = self.shared.state();
        if let Some(row) = state.committed.get_mut(&seat) {
            row.owner = Some(user);
            row.version = row.version.next().unwrap_or(row.version);
        }
    }

    /// Make the next `count` calls to `acquire` fail with `Unavailable`.
    pub fn fail_next_acquires(&self, count: usize) {
        self.shared.state().fail_acquires = count;
    }

    /// Make the next `count` commits fail, leaving the transaction open.
    pub fn fail_next_commits(&self, count: usize) {
        self.shared.state().fail_commits = count;
    }

    /// Run `hook` once, right before the next version-checked update.
    pub fn before_next_version_check(&self, hook: impl FnOnce() + Send + 'static) {
        self.shared.state().version_hook = Some(Box::new(hook));
    }
}

impl SeatStore for InMemorySeatStore {
    type Session = InMemorySeatSession;

    fn acquire(&self) -> BoxFuture<'_, Result<Self::Session, StoreError>> {
        Box::pin(async move {
            {
                let mut state = self.shared.state();
                if state.fail_acquires > 0 {
                    state.fail_acquires -= 1;
                    return Err(StoreError::Unavailable(
                        "injected connection failure".to_string(),
                    ));
                }
            }

            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            let id = {
                let mut state = self.shared.state();
                state.next_session += 1;
                state.active_sessions += 1;
                state.peak_sessions = state.peak_sessions.max(state.active_sessions);
                state.next_session
            };

            Ok(InMemorySeatSession {
                id,
                shared: Arc::clone(&self.shared),
                in_transaction: false,
                _permit: permit,
            })
        })
    }

    fn count_bound(&self) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let state = self.shared.state();
            Ok(state.committed.values().filter(|s| !s.is_free()).count() as u64)
        })
    }

    fn list_seats(&self) -> BoxFuture<'_, Result<Vec<Seat>, StoreError>> {
        Box::pin(async move { Ok(self.seats()) })
    }
}

/// One connection to an [`InMemorySeatStore`].
pub struct InMemorySeatSession {
    id: u64,
    shared: Arc<Shared>,
    in_transaction: bool,
    _permit: OwnedSemaphorePermit,
}

/// What a locking step decided while holding the state lock.
enum Step<T> {
    Done(T),
    Wait,
}

impl InMemorySeatSession {
    fn require_transaction(&self, op: &str) -> Result<(), StoreError> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(StoreError::TransactionError(format!(
                "{op} requires an open transaction"
            )))
        }
    }

    /// Re-run `step` until it stops asking to wait for a row lock.
    async fn until_unlocked<T>(&self, mut step: impl FnMut(&mut State) -> Step<T>) -> T {
        loop {
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let decided = {
                let mut state = self.shared.state();
                step(&mut state)
            };
            match decided {
                Step::Done(value) => return value,
                Step::Wait => notified.await,
            }
        }
    }

    fn finish(&mut self) {
        self.shared.state().release(self.id);
        self.in_transaction = false;
        self.shared.released.notify_waiters();
    }
}

impl ClaimSession for InMemorySeatSession {
    fn find_one_free(&mut self) -> BoxFuture<'_, Result<Option<Seat>, StoreError>> {
        Box::pin(async move {
            let state = self.shared.state();
            let seat = state
                .committed
                .keys()
                .filter_map(|id| state.view(self.id, *id))
                .find(Seat::is_free);
            Ok(seat)
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if self.in_transaction {
                return Err(StoreError::TransactionError(
                    "transaction already open".to_string(),
                ));
            }
            self.shared.state().open.insert(self.id);
            self.in_transaction = true;
            Ok(())
        })
    }

    fn find_one_free_and_lock(
        &mut self,
        skip_locked: bool,
    ) -> BoxFuture<'_, Result<Option<Seat>, StoreError>> {
        Box::pin(async move {
            self.require_transaction("find_one_free_and_lock")?;
            let session = self.id;

            let seat = self
                .until_unlocked(|state| {
                    let ids: Vec<SeatId> = state.committed.keys().copied().collect();
                    for id in ids {
                        let Some(seat) = state.view(session, id) else {
                            continue;
                        };
                        if !seat.is_free() {
                            continue;
                        }
                        if state.locked_by_other(session, id) {
                            if skip_locked {
                                continue;
                            }
                            return Step::Wait;
                        }
                        state.locks.insert(id, session);
                        return Step::Done(Some(seat));
                    }
                    Step::Done(None)
                })
                .await;

            Ok(seat)
        })
    }

    fn bind_if_version_matches(
        &mut self,
        seat: SeatId,
        user: UserId,
        expected: SeatVersion,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            self.require_transaction("bind_if_version_matches")?;

            let hook = self.shared.state().version_hook.take();
            if let Some(hook) = hook {
                hook();
            }

            let session = self.id;
            let rows = self
                .until_unlocked(|state| {
                    if state.locked_by_other(session, seat) {
                        return Step::Wait;
                    }
                    match (state.view(session, seat), expected.next()) {
                        (Some(row), Some(next)) if row.version == expected => {
                            let updated = Seat {
                                id: seat,
                                owner: Some(user),
                                version: next,
                            };
                            state.pending.entry(session).or_default().insert(seat, updated);
                            state.locks.insert(seat, session);
                            Step::Done(1)
                        }
                        _ => Step::Done(0),
                    }
                })
                .await;

            Ok(rows)
        })
    }

    fn bind_unconditionally(
        &mut self,
        seat: SeatId,
        user: UserId,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.require_transaction("bind_unconditionally")?;
            let session = self.id;

            self.until_unlocked(|state| {
                if state.locked_by_other(session, seat) {
                    return Step::Wait;
                }
                let Some(row) = state.view(session, seat) else {
                    return Step::Done(Ok(()));
                };
                let Some(version) = row.version.next() else {
                    return Step::Done(Err(StoreError::DatabaseError(format!(
                        "version of seat {seat} is out of range"
                    ))));
                };
                let updated = Seat {
                    id: seat,
                    owner: Some(user),
                    version,
                };
                state.pending.entry(session).or_default().insert(seat, updated);
                state.locks.insert(seat, session);
                Step::Done(Ok(()))
            })
            .await
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.require_transaction("commit")?;

            {
                let mut state = self.shared.state();
                if state.fail_commits > 0 {
                    state.fail_commits -= 1;
                    return Err(StoreError::DatabaseError(
                        "injected commit failure".to_string(),
                    ));
                }
                if let Some(writes) = state.pending.remove(&self.id) {
                    state.committed.extend(writes);
                }
            }

            self.finish();
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.require_transaction("rollback")?;
            self.finish();
            Ok(())
        })
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Drop for InMemorySeatSession {
    fn drop(&mut self) {
        if self.in_transaction {
            self.finish();
        }
        self.shared.state().active_sessions -= 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn uncommitted_bind_is_invisible_to_other_sessions() {
        let store = InMemorySeatStore::with_free_seats(1);
        let mut writer = store.acquire().await.unwrap();
        let mut reader = store.acquire().await.unwrap();

        writer.begin().await.unwrap();
        let rows = writer
            .bind_if_version_matches(SeatId::new(1), UserId::new(1), SeatVersion::initial())
            .await
            .unwrap();
        assert_eq!(rows, 1);

        assert!(writer.find_one_free().await.unwrap().is_none());
        assert_eq!(reader.find_one_free().await.unwrap().map(|s| s.id), Some(SeatId::new(1)));
        assert_eq!(store.count_bound().await.unwrap(), 0);

        writer.commit().await.unwrap();
        assert!(reader.find_one_free().await.unwrap().is_none());
        assert_eq!(store.count_bound().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn skip_locked_returns_next_unlocked_row() {
        let store = InMemorySeatStore::with_free_seats(2);
        let mut first = store.acquire().await.unwrap();
        let mut second = store.acquire().await.unwrap();

        first.begin().await.unwrap();
        second.begin().await.unwrap();
        let a = first.find_one_free_and_lock(true).await.unwrap().unwrap();
        let b = second.find_one_free_and_lock(true).await.unwrap().unwrap();

        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn version_check_waits_for_lock_then_fails() {
        let store = InMemorySeatStore::with_free_seats(1);
        let mut holder = store.acquire().await.unwrap();
        holder.begin().await.unwrap();
        holder
            .bind_if_version_matches(SeatId::new(1), UserId::new(1), SeatVersion::initial())
            .await
            .unwrap();

        let contender = store.clone();
        let racing = tokio::spawn(async move {
            let mut session = contender.acquire().await.unwrap();
            session.begin().await.unwrap();
            let rows = session
                .bind_if_version_matches(SeatId::new(1), UserId::new(2), SeatVersion::initial())
                .await
                .unwrap();
            session.rollback().await.unwrap();
            rows
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!racing.is_finished(), "update must wait for the row lock");

        holder.commit().await.unwrap();
        assert_eq!(racing.await.unwrap(), 0);
        assert_eq!(store.seats()[0].owner, Some(UserId::new(1)));
    }

    #[tokio::test]
    async fn dropping_session_mid_transaction_rolls_back() {
        let store = InMemorySeatStore::with_free_seats(1);
        {
            let mut session = store.acquire().await.unwrap();
            session.begin().await.unwrap();
            session.find_one_free_and_lock(true).await.unwrap();
            session
                .bind_unconditionally(SeatId::new(1), UserId::new(1))
                .await
                .unwrap();
        }

        assert_eq!(store.open_transactions(), 0);
        assert!(store.seats()[0].is_free());

        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();
        assert!(session.find_one_free_and_lock(true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transaction_control_is_checked() {
        let store = InMemorySeatStore::with_free_seats(1);
        let mut session = store.acquire().await.unwrap();

        assert!(matches!(
            session.commit().await,
            Err(StoreError::TransactionError(_))
        ));
        assert!(matches!(
            session.find_one_free_and_lock(true).await,
            Err(StoreError::TransactionError(_))
        ));

        session.begin().await.unwrap();
        assert!(matches!(
            session.begin().await,
            Err(StoreError::TransactionError(_))
        ));
    }

    #[tokio::test]
    async fn pool_limit_bounds_live_sessions() {
        let store = InMemorySeatStore::with_free_seats(1).with_max_connections(1);
        let first = store.acquire().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), store.acquire()).await;
        assert!(blocked.is_err(), "second acquire should wait for a free connection");

        drop(first);
        let _second = store.acquire().await.unwrap();
        assert_eq!(store.peak_sessions(), 1);
    }

    #[tokio::test]
    async fn injected_acquire_failures_are_counted_down() {
        let store = InMemorySeatStore::with_free_seats(1);
        store.fail_next_acquires(1);

        assert!(matches!(store.acquire().await, Err(StoreError::Unavailable(_))));
        assert!(store.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_version_cannot_be_bound() {
        let exhausted = Seat {
            id: SeatId::new(1),
            owner: None,
            version: SeatVersion::new(i32::MAX),
        };
        let store = InMemorySeatStore::with_seats([exhausted.clone()]);
        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();

        let rows = session
            .bind_if_version_matches(exhausted.id, UserId::new(1), exhausted.version)
            .await
            .unwrap();
        assert_eq!(rows, 0);

        let forced = session.bind_unconditionally(exhausted.id, UserId::new(1)).await;
        assert!(matches!(forced, Err(StoreError::DatabaseError(_))));

        session.rollback().await.unwrap();
        assert_eq!(store.seats(), vec![exhausted]);
    }
}
