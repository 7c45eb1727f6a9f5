//! # Seatclaim Runtime
//!
//! Claim strategies and the orchestrator that drives them.
//!
//! ## Core Components
//!
//! - **Strategies**: [`OptimisticStrategy`] and [`PessimisticStrategy`], both
//!   behind the [`ClaimStrategy`] trait
//! - **Orchestrator**: [`ClaimOrchestrator`] fans out one attempt per user
//!   and aggregates the outcomes
//! - **Retry**: optional backoff for attempts that lose an optimistic race
//! - **Metrics**: counters and histograms for every attempt
//!
//! ## Example
//!
//! ```ignore
//! use seatclaim_runtime::{ClaimOrchestrator, TracingReporter, claimants};
//! use seatclaim_core::StrategyKind;
//! use std::sync::Arc;
//!
//! let orchestrator = ClaimOrchestrator::for_kind(store, StrategyKind::Optimistic)
//!     .with_reporter(Arc::new(TracingReporter));
//!
//! let report = orchestrator.run(claimants(1200)).await?;
//! println!("{} bound, {} rejected", report.summary.bound_count, report.summary.rejected_count);
//! ```

/// Fan-out and aggregation of claim attempts
pub mod orchestrator;

/// Retry policy with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Optimistic and pessimistic claim strategies
pub mod strategy;

/// Outcome reporter backed by `tracing`
pub mod reporter;

pub use orchestrator::{ClaimOrchestrator, RunReport, claimants};
pub use reporter::TracingReporter;
pub use retry::RetryPolicy;
pub use strategy::{ClaimStrategy, OptimisticStrategy, PessimisticStrategy, build_strategy};
