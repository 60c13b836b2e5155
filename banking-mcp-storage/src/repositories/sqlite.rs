//! SQLite-backed record store

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use super::{Record, Store};
use crate::Result;

/// Stores records of one kind as JSON bodies in `T::TABLE`
pub struct SqliteStore<T> {
    pool: Pool<Sqlite>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for SqliteStore<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> SqliteStore<T> {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl<T: Record> Store<T> for SqliteStore<T> {
    async fn save(&self, record: &T) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let revision = i64::try_from(record.revision()).unwrap_or(i64::MAX);

        let sql = format!(
            r#"
            INSERT INTO {table} (id, body, revision, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                revision = excluded.revision,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            WHERE excluded.revision >= {table}.revision
            "#,
            table = T::TABLE
        );

        let result = sqlx::query(&sql)
            .bind(record.record_id())
            .bind(body)
            .bind(revision)
            .bind(timestamp(record.updated_at()))
            .bind(record.expires_at().map(timestamp))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            debug!(
                table = T::TABLE,
                id = record.record_id(),
                revision,
                "Skipped stale write"
            );
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<T>> {
        let row = sqlx::query(&format!("SELECT body FROM {} WHERE id = ?1", T::TABLE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let body: String = row.try_get("body")?;
        let record: T = serde_json::from_str(&body)?;
        if record.expires_at().is_some_and(|at| Utc::now() >= at) {
            debug!(table = T::TABLE, id, "Stored record has expired");
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("SELECT id FROM {} ORDER BY updated_at", T::TABLE))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    include!("sqlite_tests.rs");
}
