//! Claim strategies.
//!
//! A strategy binds exactly one free seat to a user under one concurrency
//! discipline:
//!
//! - [`OptimisticStrategy`]: unlocked read, then a version-checked update.
//!   No lock is held while deciding; a lost race ends in `VersionConflict`.
//! - [`PessimisticStrategy`]: `SELECT ... FOR UPDATE SKIP LOCKED` inside the
//!   transaction, then an unconditional update of the locked row.
//!
//! The strategy is chosen once, when the orchestrator is built, via
//! [`build_strategy`].

use seatclaim_core::{
    BoxFuture, ClaimError, ClaimSession, SeatId, SeatStore, StrategyKind, UserId,
};
use std::sync::Arc;

mod optimistic;
mod pessimistic;

pub use optimistic::OptimisticStrategy;
pub use pessimistic::PessimisticStrategy;

/// A discipline for binding one free seat to one user.
///
/// `claim` either returns the bound seat or a [`ClaimError`]. Whatever the
/// result, any transaction the attempt opened has been committed or rolled
/// back and its connection released before the future completes.
pub trait ClaimStrategy: Send + Sync {
    /// Which discipline this is.
    fn kind(&self) -> StrategyKind;

    /// Try to bind one free seat to `user`. Exactly one attempt.
    fn claim(&self, user: UserId) -> BoxFuture<'_, Result<SeatId, ClaimError>>;
}

/// Build the strategy for `kind` over `store`.
#[must_use]
pub fn build_strategy<S: SeatStore>(kind: StrategyKind, store: Arc<S>) -> Arc<dyn ClaimStrategy> {
    match kind {
        StrategyKind::Optimistic => Arc::new(OptimisticStrategy::new(store)),
        StrategyKind::Pessimistic => Arc::new(PessimisticStrategy::new(store)),
    }
}

/// Close the attempt's transaction according to `result`.
///
/// Success commits; any error rolls back and is returned unchanged. A commit
/// failure is returned as a store error after a best-effort rollback.
async fn settle<C: ClaimSession>(
    session: &mut C,
    result: Result<SeatId, ClaimError>,
) -> Result<SeatId, ClaimError> {
    match result {
        Ok(seat) => match session.commit().await {
            Ok(()) => Ok(seat),
            Err(e) => {
                rollback_quietly(session).await;
                Err(e.into())
            }
        },
        Err(e) => {
            if e.is_expected() {
                tracing::debug!(error = %e, "Claim rejected; rolling back");
            } else {
                tracing::warn!(error = %e, "Claim failed; rolling back");
            }
            rollback_quietly(session).await;
            Err(e)
        }
    }
}

async fn rollback_quietly<C: ClaimSession>(session: &mut C) {
    if !session.in_transaction() {
        return;
    }
    if let Err(e) = session.rollback().await {
        tracing::warn!(error = %e, "Rollback failed; connection will be discarded");
    }
}
