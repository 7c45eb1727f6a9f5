//! `PostgreSQL` seat store for seat claims.
//!
//! This crate implements the `SeatStore` contract from `seatclaim-core` on a
//! bounded sqlx connection pool:
//!
//! - Unlocked free-seat reads for optimistic claims
//! - `SELECT ... FOR UPDATE [SKIP LOCKED]` for pessimistic claims
//! - Version-checked `UPDATE` (compare-and-swap on the `version` column)
//! - Explicit `BEGIN` / `COMMIT` / `ROLLBACK` on the claim's own connection
//!
//! # Example
//!
//! ```no_run
//! use seatclaim_postgres::{PoolConfig, PostgresSeatStore};
//! use seatclaim_core::SeatStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresSeatStore::connect("postgres://localhost/seats", &PoolConfig::default()).await?;
//! println!("{} seats bound", store.count_bound().await?);
//! store.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod fixtures;
mod store;

pub use config::PoolConfig;
pub use store::{PgClaimSession, PostgresSeatStore};
