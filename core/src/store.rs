//! Seat store contract used by the claim strategies.
//!
//! The store is split in two traits:
//!
//! - [`SeatStore`]: the shared handle (owns the connection pool). Hands out
//!   sessions and answers whole-table questions.
//! - [`ClaimSession`]: one pooled connection, owned by exactly one claim
//!   attempt. All per-claim reads and writes, and transaction control, go
//!   through it.
//!
//! # Transactions
//!
//! A session starts outside of a transaction. [`ClaimSession::begin`] opens one,
//! and [`ClaimSession::commit`] / [`ClaimSession::rollback`] close it. Every
//! attempt must leave the session in a terminal state before dropping it.
//! Implementations make sure a session dropped mid-transaction cannot leak the
//! open transaction (and its row locks) to another attempt.
//!
//! # Implementations
//!
//! - `PostgresSeatStore` (in `seatclaim-postgres`): production implementation
//! - `InMemorySeatStore` (in `seatclaim-testing`): deterministic tests without Docker
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] instead of using `async fn` so that strategies
//! can be stored as trait objects and moved into spawned tasks.

use crate::types::{Seat, SeatId, SeatVersion, UserId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed, sendable future returned by store operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised by the seat store itself.
///
/// These are infrastructure faults. Expected claim failures (no free seat,
/// lost version race) are not store errors; see [`crate::ClaimError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not connect to the database or draw a pooled connection.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Transaction control used out of order (e.g. commit without begin).
    #[error("Transaction error: {0}")]
    TransactionError(String),
}

/// Shared handle to the seat table.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one handle is created at process
/// start and shared (behind `Arc`) by every claim task.
pub trait SeatStore: Send + Sync + 'static {
    /// Session type handed out by [`SeatStore::acquire`].
    type Session: ClaimSession;

    /// Draw one connection from the pool.
    ///
    /// Suspends while the pool is exhausted. Waiting here is backpressure,
    /// not a failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be obtained.
    fn acquire(&self) -> BoxFuture<'_, Result<Self::Session, StoreError>>;

    /// Count seats that currently have an owner.
    ///
    /// Read-only aggregate over the whole table, used for post-run
    /// verification and never inside a claim transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn count_bound(&self) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// Snapshot every seat, ordered by id.
    ///
    /// Used to check the final owner assignment after a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn list_seats(&self) -> BoxFuture<'_, Result<Vec<Seat>, StoreError>>;
}

/// One pooled connection owned by a single claim attempt.
pub trait ClaimSession: Send {
    /// Return any free seat without taking a lock.
    ///
    /// No ordering is guaranteed. May run inside or outside a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails.
    fn find_one_free(&mut self) -> BoxFuture<'_, Result<Option<Seat>, StoreError>>;

    /// Open a transaction on this session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionError`] if a transaction is already open.
    fn begin(&mut self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Return a free seat and hold its row lock until the transaction ends.
    ///
    /// With `skip_locked`, rows locked by other in-flight transactions are
    /// invisible to this call, so it never waits on them; it may report
    /// `None` while free seats are merely locked by someone else. Without it,
    /// the call waits for the lock holder and re-checks the row afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionError`] outside a transaction, or
    /// [`StoreError::DatabaseError`] if the query fails.
    fn find_one_free_and_lock(
        &mut self,
        skip_locked: bool,
    ) -> BoxFuture<'_, Result<Option<Seat>, StoreError>>;

    /// Bind `seat` to `user` only if its version still equals `expected`.
    ///
    /// On success the version becomes `expected.next()`. Returns the number
    /// of rows affected: `1` on success, `0` if a concurrent writer got there
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionError`] outside a transaction, or
    /// [`StoreError::DatabaseError`] if the update fails.
    fn bind_if_version_matches(
        &mut self,
        seat: SeatId,
        user: UserId,
        expected: SeatVersion,
    ) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// Bind `seat` to `user` with no version check.
    ///
    /// Only safe while this session's transaction holds the row lock, i.e.
    /// after [`ClaimSession::find_one_free_and_lock`] returned this seat.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionError`] outside a transaction, or
    /// [`StoreError::DatabaseError`] if the update fails.
    fn bind_unconditionally(
        &mut self,
        seat: SeatId,
        user: UserId,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Commit the open transaction, releasing its row locks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionError`] if no transaction is open, or
    /// [`StoreError::DatabaseError`] if the commit fails.
    fn commit(&mut self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Roll back the open transaction, discarding its writes and locks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionError`] if no transaction is open, or
    /// [`StoreError::DatabaseError`] if the rollback fails.
    fn rollback(&mut self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Whether a transaction is currently open on this session.
    fn in_transaction(&self) -> bool;
}
