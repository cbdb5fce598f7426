//! Turn recurring URLs and patterns into the ids of their registry rows.
use std::collections::HashMap;
use std::time::Duration;

use sqlx::PgPool;
use tracing::debug;

use crate::error::ResolveError;

pub const RESOLVER_CACHE: &str = "ingest_resolver_cache";
pub const RESOLVER_RETRIES: &str = "ingest_resolver_retries_total";

const MAX_RESOLVE_ATTEMPTS: u64 = 5;
const RESOLVE_RETRY_DELAY_MS: u64 = 20;

const URL_INSERT_OR_SELECT: &str = r#"
    WITH inserted AS (
        INSERT INTO url (url) VALUES ($1)
        ON CONFLICT ((md5(url))) DO NOTHING
        RETURNING id
    )
    SELECT id FROM inserted
    UNION ALL
    SELECT id FROM url WHERE md5(url) = md5($1) AND url = $1
    LIMIT 1
"#;

const PATTERN_INSERT_OR_SELECT: &str = r#"
    WITH inserted AS (
        INSERT INTO pattern (pattern) VALUES ($1)
        ON CONFLICT ((md5(pattern))) DO NOTHING
        RETURNING id
    )
    SELECT id FROM inserted
    UNION ALL
    SELECT id FROM pattern WHERE md5(pattern) = md5($1) AND pattern = $1
    LIMIT 1
"#;

/// Caches text -> id for the `url` and `pattern` registries.
///
/// Entries are never evicted, so memory grows with the number of distinct
/// URLs and patterns seen by this process. Misses go through a single
/// insert-or-select statement on the pool, outside of any result
/// transaction, which means a cached id always belongs to a committed row.
pub struct DedupResolver {
    pool: PgPool,
    urls: HashMap<String, i32>,
    patterns: HashMap<String, i32>,
    lookups: u64,
}

impl DedupResolver {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            urls: HashMap::new(),
            patterns: HashMap::new(),
            lookups: 0,
        }
    }

    pub async fn resolve_url(&mut self, url: &str) -> Result<i32, ResolveError> {
        if let Some(id) = self.urls.get(url) {
            metrics::counter!(RESOLVER_CACHE, &[("table", "url"), ("action", "hit")]).increment(1);
            return Ok(*id);
        }

        metrics::counter!(RESOLVER_CACHE, &[("table", "url"), ("action", "miss")]).increment(1);
        let id = self.insert_or_select("url", URL_INSERT_OR_SELECT, url).await?;
        self.urls.insert(url.to_owned(), id);

        Ok(id)
    }

    /// No pattern resolves to no id, without touching the database.
    pub async fn resolve_pattern(
        &mut self,
        pattern: Option<&str>,
    ) -> Result<Option<i32>, ResolveError> {
        let Some(pattern) = pattern else {
            return Ok(None);
        };

        if let Some(id) = self.patterns.get(pattern) {
            metrics::counter!(RESOLVER_CACHE, &[("table", "pattern"), ("action", "hit")])
                .increment(1);
            return Ok(Some(*id));
        }

        metrics::counter!(RESOLVER_CACHE, &[("table", "pattern"), ("action", "miss")])
            .increment(1);
        let id = self
            .insert_or_select("pattern", PATTERN_INSERT_OR_SELECT, pattern)
            .await?;
        self.patterns.insert(pattern.to_owned(), id);

        Ok(Some(id))
    }

    /// Number of insert-or-select statements issued so far.
    pub fn lookups(&self) -> u64 {
        self.lookups
    }

    // A writer that commits the same value after our snapshot was taken makes
    // the INSERT a no-op and stays invisible to the SELECT, so no row comes
    // back. The next attempt gets a fresh snapshot that sees it.
    async fn insert_or_select(
        &mut self,
        table: &'static str,
        query: &'static str,
        value: &str,
    ) -> Result<i32, ResolveError> {
        let mut tries: u64 = 1;

        loop {
            self.lookups += 1;
            let row: Option<(i32,)> = sqlx::query_as(query)
                .bind(value)
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| ResolveError::Query { table, error })?;

            if let Some((id,)) = row {
                debug!("resolved {} {:?} to {}", table, value, id);
                return Ok(id);
            }

            if tries == MAX_RESOLVE_ATTEMPTS {
                return Err(ResolveError::NotVisible {
                    table,
                    value: value.to_owned(),
                    attempts: tries,
                });
            }

            metrics::counter!(RESOLVER_RETRIES, &[("table", table)]).increment(1);
            let jitter = rand::random::<u64>() % 10;
            let delay: u64 = tries * RESOLVE_RETRY_DELAY_MS + jitter;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            tries += 1;
        }
    }
}
