//! # Seatclaim Testing
//!
//! Test doubles for the seat claim workspace.
//!
//! This crate provides:
//! - [`InMemorySeatStore`]: a seat store with row locks, `SKIP LOCKED`,
//!   read-committed visibility, a bounded pool and fault injection
//! - [`RecordingReporter`]: captures outcomes and summaries for assertions
//! - [`assert_exclusive_owners`] and [`assert_bindings_match`]: mutual-exclusion
//!   checks against the final table
//!
//! ## Example
//!
//! ```ignore
//! use seatclaim_testing::{InMemorySeatStore, RecordingReporter};
//! use seatclaim_runtime::{ClaimOrchestrator, claimants};
//! use seatclaim_core::StrategyKind;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn saturates_the_pool() {
//!     let store = Arc::new(InMemorySeatStore::with_free_seats(10));
//!     let report = ClaimOrchestrator::for_kind(store, StrategyKind::Pessimistic)
//!         .run(claimants(12))
//!         .await
//!         .unwrap();
//!     assert_eq!(report.summary.bound_count, 10);
//! }
//! ```

pub mod in_memory;
pub mod recording;

pub use in_memory::{DEFAULT_MAX_CONNECTIONS, InMemorySeatSession, InMemorySeatStore};
pub use recording::RecordingReporter;

use seatclaim_core::{Seat, SeatId, UserId};
use std::collections::HashMap;

/// Check that no user owns more than one seat and return the bound count.
///
/// Seat ids are unique keys, so a seat can never have two owners in the final
/// table; a double booking shows up as one user holding two seats when each
/// user made a single successful attempt.
///
/// # Panics
///
/// Panics naming the user if some user owns two or more seats.
#[allow(clippy::panic)] // Assertion helper
pub fn assert_exclusive_owners(seats: &[Seat]) -> usize {
    let mut owned: HashMap<UserId, usize> = HashMap::new();
    for owner in seats.iter().filter_map(|s| s.owner) {
        *owned.entry(owner).or_default() += 1;
    }
    if let Some((user, count)) = owned.iter().find(|(_, count)| **count > 1) {
        panic!("user {user} owns {count} seats");
    }
    owned.len()
}

/// Check that every reported `(user, seat)` binding is what the table holds.
///
/// Together with unique seat ids this proves no two attempts both believe
/// they own the same seat.
///
/// # Panics
///
/// Panics if a reported seat is missing, free, or owned by someone else.
#[allow(clippy::panic)] // Assertion helper
pub fn assert_bindings_match(bindings: &[(UserId, SeatId)], seats: &[Seat]) {
    let owners: HashMap<SeatId, Option<UserId>> = seats.iter().map(|s| (s.id, s.owner)).collect();
    for (user, seat) in bindings {
        match owners.get(seat) {
            Some(Some(owner)) if owner == user => {}
            Some(Some(owner)) => panic!("seat {seat} reported for user {user} but owned by {owner}"),
            Some(None) => panic!("seat {seat} reported for user {user} but is free"),
            None => panic!("seat {seat} reported for user {user} does not exist"),
        }
    }
}
