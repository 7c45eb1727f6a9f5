//! # Seatclaim Core
//!
//! Core types and contracts for allocating a finite pool of seats among many
//! concurrent users.
//!
//! This crate holds everything the allocation strategies and the orchestrator
//! agree on, and nothing that performs I/O itself:
//!
//! - **Types**: [`UserId`], [`SeatId`], [`SeatVersion`], [`Seat`]
//! - **Store contract**: [`SeatStore`] and [`ClaimSession`], implemented by
//!   `seatclaim-postgres` (production) and `seatclaim-testing` (in-memory)
//! - **Outcomes**: [`ClaimError`], [`RejectReason`], [`ClaimOutcome`],
//!   [`AggregateResult`], [`StrategyKind`]
//! - **Reporting**: the [`OutcomeReporter`] sink
//!
//! ## Example
//!
//! ```ignore
//! use seatclaim_core::{SeatStore, ClaimSession};
//!
//! async fn peek<S: SeatStore>(store: &S) -> Result<(), seatclaim_core::StoreError> {
//!     let mut session = store.acquire().await?;
//!     if let Some(seat) = session.find_one_free().await? {
//!         println!("seat {} is free at version {}", seat.id, seat.version);
//!     }
//!     Ok(())
//! }
//! ```

pub mod outcome;
pub mod report;
pub mod store;
pub mod types;

pub use outcome::{
    AggregateResult, ClaimError, ClaimOutcome, ParseStrategyKindError, RejectReason,
    RejectionBreakdown, StrategyKind, TraceLine,
};
pub use report::{NoopReporter, OutcomeReporter};
pub use store::{BoxFuture, ClaimSession, SeatStore, StoreError};
pub use types::{Seat, SeatId, SeatVersion, UserId};
