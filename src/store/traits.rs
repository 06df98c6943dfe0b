//! `Datastore` trait: the key/value contract every persistence backend meets.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// A prefix/paged listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Only keys starting with this prefix are returned.
    pub prefix: String,
    /// Advisory ordering hint (`created`, `-created`, `updated`, `-updated`).
    /// Backends without native ordering ignore it.
    pub order_by: String,
    /// Maximum number of records, `0` for no limit.
    pub limit: usize,
    pub offset: usize,
}

impl Query {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

/// Backend-agnostic key/value store holding JSON records.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Write `value` under `key`, replacing any existing record.
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), DatabaseError>;

    /// Read the record under `key`.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError>;

    /// Check whether a record exists under `key`.
    async fn has(&self, key: &str) -> Result<bool, DatabaseError>;

    /// Remove the record under `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), DatabaseError>;

    /// List records by key prefix, one page at a time.
    async fn query(&self, query: &Query) -> Result<Vec<serde_json::Value>, DatabaseError>;
}
