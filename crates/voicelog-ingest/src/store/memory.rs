use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use voicelog_common::types::{HistoryEntry, StoredAggregate};

use super::{AggregateStore, AppendOutcome, PutOutcome};
use crate::error::StoreError;

/// Process-local store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, StoredAggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Copy of every aggregate, sorted by identifier
    pub async fn snapshot(&self) -> Vec<StoredAggregate> {
        let mut all: Vec<_> = self.items.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        all
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn get_item(&self, identifier: &str) -> Result<Option<StoredAggregate>, StoreError> {
        Ok(self.items.read().await.get(identifier).cloned())
    }

    async fn put_if_absent(&self, aggregate: &StoredAggregate) -> Result<PutOutcome, StoreError> {
        let mut items = self.items.write().await;
        if items.contains_key(&aggregate.identifier) {
            return Ok(PutOutcome::AlreadyExists);
        }
        items.insert(aggregate.identifier.clone(), aggregate.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn append_entry(
        &self,
        identifier: &str,
        entry: &HistoryEntry,
    ) -> Result<AppendOutcome, StoreError> {
        let mut items = self.items.write().await;
        let aggregate = items
            .entry(identifier.to_string())
            .or_insert_with(|| StoredAggregate::new(identifier));

        if aggregate.push_unique(entry.clone()) {
            Ok(AppendOutcome::Appended)
        } else {
            Ok(AppendOutcome::Duplicate)
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
