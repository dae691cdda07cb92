//! Aggregate stores
//!
//! Every write is conditional. `put_if_absent` never overwrites and
//! `append_entry` never adds an event that is already present, so two
//! workers racing on one identifier cannot lose each other's records even
//! without the driver's identifier locks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use voicelog_common::types::{HistoryEntry, StoredAggregate};

use crate::error::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAggregateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    Inserted,
    /// Someone else created the aggregate first; nothing was written
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    Appended,
    /// The event was already in the history; nothing was written
    Duplicate,
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn get_item(&self, identifier: &str) -> Result<Option<StoredAggregate>, StoreError>;

    /// Create the aggregate unless one already exists for its identifier
    async fn put_if_absent(&self, aggregate: &StoredAggregate) -> Result<PutOutcome, StoreError>;

    /// Atomically add `entry` to the identifier's history, creating the
    /// aggregate if it does not exist yet
    async fn append_entry(
        &self,
        identifier: &str,
        entry: &HistoryEntry,
    ) -> Result<AppendOutcome, StoreError>;

    fn name(&self) -> &'static str;
}

/// Default attempts for one store call, including the first
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default upper bound on a single retry delay
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Exponential backoff for transient store errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts.max(1) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
