//! Tables and view the ingester writes to, created on startup.
use sqlx::PgPool;
use tracing::info;

use crate::error::StoreError;

// Key for pg_advisory_xact_lock, held while the DDL runs
const SCHEMA_LOCK_KEY: i64 = 0x6874_7470_6d6f_6e;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS url (
        id INT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
        url TEXT NOT NULL
    )
    "#,
    // A btree entry holds at most ~8 KB, so long values are indexed by digest
    "CREATE UNIQUE INDEX IF NOT EXISTS url_url_md5_key ON url (md5(url))",
    r#"
    CREATE TABLE IF NOT EXISTS pattern (
        id INT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
        pattern TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS pattern_pattern_md5_key ON pattern (md5(pattern))",
    r#"
    CREATE TABLE IF NOT EXISTS result (
        id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        url_id INT NOT NULL REFERENCES url (id),
        response_time_ms INTEGER NOT NULL,
        -- NULL when the request did not complete
        status_code INTEGER NULL,
        -- NULL when no pattern was configured, matched is NULL exactly then
        pattern_id INT NULL REFERENCES pattern (id),
        matched BOOLEAN NULL,
        CHECK ((pattern_id IS NULL) = (matched IS NULL))
    )
    "#,
    r#"
    CREATE OR REPLACE VIEW result_view AS
    SELECT
        result.id,
        result.created_at,
        url.url,
        result.response_time_ms,
        result.status_code,
        pattern.pattern,
        result.matched
    FROM result
    JOIN url ON url.id = result.url_id
    LEFT JOIN pattern ON pattern.id = result.pattern_id
    "#,
];

/// Apply the schema. Every statement is idempotent, and the whole thing runs
/// in one transaction under an advisory lock so consumers starting at the
/// same time don't trip over each other's `CREATE`s.
pub async fn bootstrap(pool: &PgPool) -> Result<(), StoreError> {
    let mut tx = pool.begin().await.map_err(StoreError::Bootstrap)?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Bootstrap)?;

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Bootstrap)?;
    }

    tx.commit().await.map_err(StoreError::Bootstrap)?;
    info!("schema applied");

    Ok(())
}
