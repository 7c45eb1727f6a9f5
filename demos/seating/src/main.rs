//! Seating demo: many users race for a limited number of seats.
//!
//! Resets and seeds the seat tables, claims one seat per user with the chosen
//! strategy, and prints one JSON line per attempt followed by the summary.
//!
//! # Running
//!
//! ```bash
//! docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=postgres postgres:16
//! cargo run -p seating-demo -- pessimistic
//! cargo run -p seating-demo -- optimistic
//! ```
//!
//! Settings are read from the environment (or a `.env` file); see
//! `.env.example`.

mod config;
mod reporter;

use config::Config;
use reporter::JsonConsoleReporter;
use seatclaim_core::{AggregateResult, StrategyKind};
use seatclaim_postgres::{PostgresSeatStore, fixtures};
use seatclaim_runtime::metrics::MetricsServer;
use seatclaim_runtime::{ClaimOrchestrator, RetryPolicy, claimants};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seating=debug,seatclaim=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let strategy: StrategyKind = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => StrategyKind::Pessimistic,
    };

    let config = Config::from_env();
    let settings = serde_json::to_string(&config)?;
    tracing::info!(
        database = %config.redacted_url(),
        strategy = %strategy,
        config = %settings,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new();
    if config.run.metrics {
        metrics.start()?;
    }

    let store = PostgresSeatStore::connect(&config.database.url, &config.pool())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Cannot reach the database"))?;
    let store = Arc::new(store);

    if config.run.reset {
        fixtures::reset_and_seed(store.pool(), config.run.users, config.run.seats).await?;
    }

    let retry = RetryPolicy::builder()
        .max_retries(config.run.max_retries)
        .build();

    let report = ClaimOrchestrator::for_kind(Arc::clone(&store), strategy)
        .with_reporter(Arc::new(JsonConsoleReporter::new(config.run.trace)))
        .with_retry(retry)
        .run(claimants(config.run.users))
        .await?;

    println!("{}", serde_json::to_string_pretty(&report.summary)?);

    if strategy == StrategyKind::Pessimistic && config.run.reset {
        let expected = expected_pessimistic(&config, &report.summary);
        println!("Expected:");
        println!("{}", serde_json::to_string_pretty(&expected)?);
    }

    if let Some(text) = metrics.render() {
        println!("{text}");
    }

    store.close().await;
    Ok(())
}

/// What a pessimistic run over a freshly seeded table must produce.
fn expected_pessimistic(config: &Config, actual: &AggregateResult) -> AggregateResult {
    let users = u64::try_from(config.run.users.max(0)).unwrap_or_default();
    let seats = u64::try_from(config.run.seats.max(0)).unwrap_or_default();
    let bound = users.min(seats);

    AggregateResult {
        total_claimants: users,
        bound_count: bound,
        rejected_count: users - bound,
        observed_busy_resources: bound,
        rejections: seatclaim_core::RejectionBreakdown {
            no_seat_available: users - bound,
            ..Default::default()
        },
        ..actual.clone()
    }
}
