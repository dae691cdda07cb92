//! Postgres-backed aggregate store
//!
//! One row per identifier, history kept as a JSONB array. Both writes are
//! single statements whose conflict handling makes them conditional:
//!
//! - insert: `ON CONFLICT DO NOTHING`, zero rows affected means another
//!   writer got there first
//! - append: upsert whose `DO UPDATE` only fires when the history does not
//!   already contain an entry with the same `(timestamp, kind, content)`

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument};
use voicelog_common::types::{HistoryEntry, StoredAggregate};

use super::{AggregateStore, AppendOutcome, PutOutcome, RetryPolicy};
use crate::config::StoreConfig;
use crate::error::StoreError;

/// SQLSTATEs worth another attempt: serialization failure, deadlock, too
/// many connections, admin shutdown, lock not available
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "53300", "57P01", "55P03"];

const SELECT_AGGREGATE: &str = r#"
    SELECT identifier, entries
    FROM conversation_aggregates
    WHERE identifier = $1
"#;

const INSERT_IF_ABSENT: &str = r#"
    INSERT INTO conversation_aggregates (identifier, entries)
    VALUES ($1, $2)
    ON CONFLICT (identifier) DO NOTHING
"#;

const APPEND_IF_ABSENT: &str = r#"
    INSERT INTO conversation_aggregates (identifier, entries)
    VALUES ($1, jsonb_build_array($2::jsonb))
    ON CONFLICT (identifier) DO UPDATE
    SET entries = conversation_aggregates.entries || jsonb_build_array($2::jsonb),
        updated_at = NOW()
    WHERE NOT conversation_aggregates.entries @> jsonb_build_array($3::jsonb)
"#;

pub struct PgAggregateStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Open a pool from configuration
    pub async fn connect(config: &StoreConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.database_url)
            .await?;

        info!("Database connection pool established");

        Ok(Self::new(pool, config.retry.clone()))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    #[instrument(level = "debug", skip(self))]
    async fn get_item(&self, identifier: &str) -> Result<Option<StoredAggregate>, StoreError> {
        let row = self
            .retry
            .run("get_item", || async {
                sqlx::query(SELECT_AGGREGATE)
                    .bind(identifier)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let identifier: String = row.try_get("identifier").map_err(classify)?;
        let Json(entries): Json<Vec<HistoryEntry>> = row.try_get("entries").map_err(classify)?;

        Ok(Some(StoredAggregate { identifier, entries }))
    }

    #[instrument(level = "debug", skip(self, aggregate), fields(identifier = %aggregate.identifier))]
    async fn put_if_absent(&self, aggregate: &StoredAggregate) -> Result<PutOutcome, StoreError> {
        let result = self
            .retry
            .run("put_if_absent", || async {
                sqlx::query(INSERT_IF_ABSENT)
                    .bind(&aggregate.identifier)
                    .bind(Json(&aggregate.entries))
                    .execute(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;

        let outcome = if result.rows_affected() == 1 {
            PutOutcome::Inserted
        } else {
            PutOutcome::AlreadyExists
        };
        debug!(?outcome, "Conditional insert finished");

        Ok(outcome)
    }

    #[instrument(level = "debug", skip(self, entry), fields(timestamp = %entry.timestamp))]
    async fn append_entry(
        &self,
        identifier: &str,
        entry: &HistoryEntry,
    ) -> Result<AppendOutcome, StoreError> {
        let identity = entry.identity();

        let result = self
            .retry
            .run("append_entry", || async {
                sqlx::query(APPEND_IF_ABSENT)
                    .bind(identifier)
                    .bind(Json(entry))
                    .bind(&identity)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;

        let outcome = if result.rows_affected() == 1 {
            AppendOutcome::Appended
        } else {
            AppendOutcome::Duplicate
        };
        debug!(?outcome, "Conditional append finished");

        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Split sqlx failures into retryable and permanent
pub fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
            StoreError::Transient(err.to_string())
        }
        sqlx::Error::Database(db) => {
            let transient = db
                .code()
                .map(|code| TRANSIENT_SQLSTATES.contains(&&*code))
                .unwrap_or(false);
            if transient {
                StoreError::Transient(err.to_string())
            } else {
                StoreError::Request(err.to_string())
            }
        }
        _ => StoreError::Request(err.to_string()),
    }
}
