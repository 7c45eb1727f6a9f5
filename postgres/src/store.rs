//! `PostgresSeatStore` and its per-claim session.

use crate::config::PoolConfig;
use seatclaim_core::{
    BoxFuture, ClaimSession, Seat, SeatId, SeatStore, SeatVersion, StoreError, UserId,
};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};

const FIND_ONE_FREE: &str = r#"
    SELECT id, "userId", version
    FROM "Seat"
    WHERE "userId" IS NULL
    LIMIT 1
"#;

const FIND_ONE_FREE_FOR_UPDATE: &str = r#"
    SELECT id, "userId", version
    FROM "Seat"
    WHERE "userId" IS NULL
    LIMIT 1
    FOR UPDATE
"#;

const FIND_ONE_FREE_FOR_UPDATE_SKIP_LOCKED: &str = r#"
    SELECT id, "userId", version
    FROM "Seat"
    WHERE "userId" IS NULL
    LIMIT 1
    FOR UPDATE SKIP LOCKED
"#;

type SeatRow = (i32, Option<i32>, i32);

fn to_seat((id, owner, version): SeatRow) -> Seat {
    Seat {
        id: SeatId::new(id),
        owner: owner.map(UserId::new),
        version: SeatVersion::new(version),
    }
}

/// Classify a sqlx error as unavailability or a query failure.
fn store_error(context: &str, e: &sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{context}: {e}"))
        }
        _ => StoreError::DatabaseError(format!("{context}: {e}")),
    }
}

/// PostgreSQL-backed seat store.
///
/// Owns the connection pool. Create it once at startup, share it behind an
/// `Arc`, and [`close`](Self::close) it at shutdown.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE "Seat" (
///     "id" SERIAL PRIMARY KEY,
///     "userId" INTEGER NULL REFERENCES "User"("id") ON DELETE SET NULL ON UPDATE CASCADE,
///     "version" INTEGER NOT NULL DEFAULT 1
/// );
/// ```
#[derive(Clone)]
pub struct PostgresSeatStore {
    pool: PgPool,
}

impl PostgresSeatStore {
    /// Connect a bounded pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = config.max_connections,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Seat store connected"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Seat store pool closed");
    }
}

impl SeatStore for PostgresSeatStore {
    type Session = PgClaimSession;

    fn acquire(&self) -> BoxFuture<'_, Result<Self::Session, StoreError>> {
        Box::pin(async move {
            let conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| StoreError::Unavailable(format!("Failed to acquire connection: {e}")))?;

            Ok(PgClaimSession {
                conn,
                in_transaction: false,
            })
        })
    }

    fn count_bound(&self) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let (count,): (i64,) =
                sqlx::query_as(r#"SELECT COUNT(*) FROM "Seat" WHERE "userId" IS NOT NULL"#)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| store_error("Failed to count bound seats", &e))?;

            u64::try_from(count)
                .map_err(|_| StoreError::DatabaseError(format!("Negative seat count: {count}")))
        })
    }

    fn list_seats(&self) -> BoxFuture<'_, Result<Vec<Seat>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<SeatRow> =
                sqlx::query_as(r#"SELECT id, "userId", version FROM "Seat" ORDER BY id"#)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| store_error("Failed to list seats", &e))?;

            Ok(rows.into_iter().map(to_seat).collect())
        })
    }
}

/// One pooled connection, used by a single claim attempt.
///
/// Transaction control is issued as plain `BEGIN` / `COMMIT` / `ROLLBACK`
/// statements on this connection. If the session is dropped while a
/// transaction is still open (or after a failed commit/rollback), the
/// connection is closed instead of going back to the pool, which makes the
/// server abort the transaction and release its row locks.
pub struct PgClaimSession {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

impl PgClaimSession {
    fn require_transaction(&self, op: &str) -> Result<(), StoreError> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(StoreError::TransactionError(format!(
                "{op} requires an open transaction"
            )))
        }
    }

    async fn end_transaction(&mut self, statement: &'static str) -> Result<(), StoreError> {
        self.require_transaction(statement)?;

        let result = (&mut *self.conn).execute(statement).await;
        self.in_transaction = false;

        if let Err(e) = result {
            self.conn.close_on_drop();
            return Err(store_error(&format!("{statement} failed"), &e));
        }
        Ok(())
    }
}

impl ClaimSession for PgClaimSession {
    fn find_one_free(&mut self) -> BoxFuture<'_, Result<Option<Seat>, StoreError>> {
        Box::pin(async move {
            let row: Option<SeatRow> = sqlx::query_as(FIND_ONE_FREE)
                .fetch_optional(&mut *self.conn)
                .await
                .map_err(|e| store_error("Failed to find a free seat", &e))?;

            Ok(row.map(to_seat))
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if self.in_transaction {
                return Err(StoreError::TransactionError(
                    "transaction already open".to_string(),
                ));
            }

            (&mut *self.conn)
                .execute("BEGIN")
                .await
                .map_err(|e| store_error("BEGIN failed", &e))?;
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

            let sql = if skip_locked {
                FIND_ONE_FREE_FOR_UPDATE_SKIP_LOCKED
            } else {
                FIND_ONE_FREE_FOR_UPDATE
            };

            let row: Option<SeatRow> = sqlx::query_as(sql)
                .fetch_optional(&mut *self.conn)
                .await
                .map_err(|e| store_error("Failed to lock a free seat", &e))?;

            Ok(row.map(to_seat))
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
            if expected.next().is_none() {
                return Ok(0);
            }

            let result = sqlx::query(
                r#"
                UPDATE "Seat"
                SET "userId" = $1, version = version + 1
                WHERE id = $2 AND version = $3
                "#,
            )
            .bind(user.get())
            .bind(seat.get())
            .bind(expected.get())
            .execute(&mut *self.conn)
            .await
            .map_err(|e| store_error("Failed to bind seat", &e))?;

            Ok(result.rows_affected())
        })
    }

    fn bind_unconditionally(
        &mut self,
        seat: SeatId,
        user: UserId,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.require_transaction("bind_unconditionally")?;

            sqlx::query(
                r#"
                UPDATE "Seat"
                SET "userId" = $1, version = version + 1
                WHERE id = $2
                "#,
            )
            .bind(user.get())
            .bind(seat.get())
            .execute(&mut *self.conn)
            .await
            .map_err(|e| store_error("Failed to bind locked seat", &e))?;

            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.end_transaction("COMMIT"))
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.end_transaction("ROLLBACK"))
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Drop for PgClaimSession {
    fn drop(&mut self) {
        if self.in_transaction {
            tracing::warn!("Claim session dropped inside a transaction; closing connection");
            self.conn.close_on_drop();
        }
    }
}
