//! In-memory `Datastore`: ordered map, used for tests and ephemeral runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::store::traits::{Datastore, Query};

/// In-memory datastore. Listing is always in key order; `order_by` is ignored.
#[derive(Default)]
pub struct MemoryDatastore {
    records: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), DatabaseError> {
        self.records
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn has(&self, key: &str) -> Result<bool, DatabaseError> {
        Ok(self.records.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<serde_json::Value>, DatabaseError> {
        let records = self.records.read().await;
        let matching = records
            .range(query.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&query.prefix))
            .skip(query.offset)
            .map(|(_, v)| v.clone());

        Ok(if query.limit == 0 {
            matching.collect()
        } else {
            matching.take(query.limit).collect()
        })
    }
}
