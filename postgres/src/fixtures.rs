//! Schema reset and seed data for seat-claim runs.
//!
//! [`reset_schema`] drops and recreates the `"Seat"` and `"User"` tables;
//! [`seed`] fills them inside one transaction. Both are destructive and
//! meant for demos and tests, never for a database holding real bookings.

use seatclaim_core::StoreError;
use sqlx::PgPool;

/// Users in the standard scenario.
pub const DEFAULT_USERS: i32 = 1200;

/// Seats in the standard scenario.
pub const DEFAULT_SEATS: i32 = 1000;

const SCHEMA: &[&str] = &[
    r#"DROP TABLE IF EXISTS "Seat" CASCADE"#,
    r#"DROP TABLE IF EXISTS "User" CASCADE"#,
    r#"
    CREATE TABLE "Seat" (
        "id" SERIAL NOT NULL,
        "userId" INTEGER NULL,
        "version" INTEGER NOT NULL DEFAULT 1,
        CONSTRAINT "PK_Seat" PRIMARY KEY ("id")
    )
    "#,
    r#"
    CREATE TABLE "User" (
        "id" SERIAL NOT NULL,
        "name" TEXT,
        CONSTRAINT "PK_User" PRIMARY KEY ("id")
    )
    "#,
    r#"
    ALTER TABLE "Seat"
        ADD CONSTRAINT "FK_User_on_a_Seat" FOREIGN KEY ("userId")
        REFERENCES "User"("id") ON DELETE SET NULL ON UPDATE CASCADE
    "#,
];

fn database_error(context: &str, e: &sqlx::Error) -> StoreError {
    StoreError::DatabaseError(format!("{context}: {e}"))
}

/// Drop and recreate the seat and user tables.
///
/// # Errors
///
/// Returns [`StoreError::DatabaseError`] if any DDL statement fails.
pub async fn reset_schema(pool: &PgPool) -> Result<(), StoreError> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to acquire connection: {e}")))?;

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| database_error("Failed to reset schema", &e))?;
    }

    tracing::info!("Seat schema reset");
    Ok(())
}

/// Insert `users` users named `User 1..=users` and `seats` free seats at
/// version 1, atomically.
///
/// Ids start at 1 on a freshly reset schema, so user ids line up with
/// `seatclaim_runtime::claimants`.
///
/// # Errors
///
/// Returns [`StoreError`] if the transaction cannot be opened or an insert
/// fails; nothing is inserted in that case.
pub async fn seed(pool: &PgPool, users: i32, seats: i32) -> Result<(), StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StoreError::TransactionError(format!("Failed to begin seed: {e}")))?;

    sqlx::query(
        r#"INSERT INTO "User" ("name") SELECT 'User ' || i FROM generate_series(1, $1) AS i"#,
    )
    .bind(users)
    .execute(&mut *tx)
    .await
    .map_err(|e| database_error("Failed to insert users", &e))?;

    sqlx::query(r#"INSERT INTO "Seat" ("version") SELECT 1 FROM generate_series(1, $1)"#)
        .bind(seats)
        .execute(&mut *tx)
        .await
        .map_err(|e| database_error("Failed to insert seats", &e))?;

    tx.commit()
        .await
        .map_err(|e| StoreError::TransactionError(format!("Failed to commit seed: {e}")))?;

    tracing::info!(users, seats, "Seat data seeded");
    Ok(())
}

/// [`reset_schema`] followed by [`seed`].
///
/// # Errors
///
/// Propagates the first failure of either step.
pub async fn reset_and_seed(pool: &PgPool, users: i32, seats: i32) -> Result<(), StoreError> {
    reset_schema(pool).await?;
    seed(pool, users, seats).await
}
