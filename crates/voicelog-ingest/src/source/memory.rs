use async_trait::async_trait;
use std::collections::BTreeMap;
use voicelog_common::types::RawObjectRef;

use super::ObjectSource;
use crate::error::FetchError;

/// Fixed set of documents held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    objects: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.insert(key, body);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.objects.insert(key.into(), body.into());
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn list(&self, prefix: &str) -> Result<Vec<RawObjectRef>, FetchError> {
        Ok(self
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(RawObjectRef::new)
            .collect())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.to_string()))
    }

    fn describe(&self) -> String {
        format!("memory ({} objects)", self.objects.len())
    }
}
