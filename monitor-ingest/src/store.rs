use monitor_common::probe_result::ProbeResult;
use sqlx::{Postgres, Transaction};

use crate::error::StoreError;

/// A probe result with its URL and pattern replaced by registry ids, ready
/// to be appended to `result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub url_id: i32,
    pub response_time_ms: i32,
    pub status_code: Option<i32>,
    pub pattern_id: Option<i32>,
    pub matched: Option<bool>,
}

impl ResultRecord {
    /// `matched` is only kept when the result carried a pattern.
    pub fn new(result: &ProbeResult, url_id: i32, pattern_id: Option<i32>) -> Self {
        Self {
            url_id,
            response_time_ms: i32::try_from(result.response_time_ms).unwrap_or(i32::MAX),
            status_code: result.status_code.map(i32::from),
            pattern_id,
            matched: pattern_id.map(|_| result.matched),
        }
    }

    pub async fn append(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO result (url_id, response_time_ms, status_code, pattern_id, matched)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(self.url_id)
        .bind(self.response_time_ms)
        .bind(self.status_code)
        .bind(self.pattern_id)
        .bind(self.matched)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::Append)?;

        Ok(())
    }
}
