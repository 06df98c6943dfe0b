//! libSQL backend: async `Datastore` implementation.
//!
//! Records live in a single `datastore` table keyed by their full key
//! (`Task:<id>`). The JSON `created`/`updated` fields are copied into
//! columns so listings can be ordered without parsing every row.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Datastore, Query};

/// libSQL datastore.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlDatastore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlDatastore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(v) => libsql::Value::Text(v.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map an advisory `order_by` hint onto an ORDER BY clause.
///
/// Only whitelisted columns are accepted; anything else falls back to key order.
fn order_clause(order_by: &str) -> &'static str {
    match order_by.trim() {
        "" | "-created" => "ORDER BY created DESC, key ASC",
        "created" => "ORDER BY created ASC, key ASC",
        "updated" => "ORDER BY updated ASC, key ASC",
        "-updated" => "ORDER BY updated DESC, key ASC",
        _ => "ORDER BY key ASC",
    }
}

fn parse_value(key: &str, raw: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("record {key}: {e}")))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Datastore for LibSqlDatastore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| DatabaseError::Serialization(format!("record {key}: {e}")))?;
        let created = value.get("created").and_then(|v| v.as_str());
        let updated = value.get("updated").and_then(|v| v.as_str());

        self.conn()
            .execute(
                "INSERT INTO datastore (key, value, created, updated) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    created = excluded.created,
                    updated = excluded.updated",
                params![key, raw, opt_text(created), opt_text(updated)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put {key}: {e}")))?;

        debug!(key = %key, "Record written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM datastore WHERE key = ?1", params![key])
            .await
            .map_err(|e| DatabaseError::Query(format!("get {key}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get {key} row parse: {e}")))?;
                parse_value(key, &raw).map(Some)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get {key}: {e}"))),
        }
    }

    async fn has(&self, key: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT EXISTS(SELECT 1 FROM datastore WHERE key = ?1)",
                params![key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has {key}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let exists: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("has {key} row parse: {e}")))?;
                Ok(exists != 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("has {key}: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM datastore WHERE key = ?1", params![key])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete {key}: {e}")))?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<serde_json::Value>, DatabaseError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit: i64 = if query.limit == 0 {
            -1
        } else {
            query.limit as i64
        };
        let sql = format!(
            "SELECT key, value FROM datastore
             WHERE substr(key, 1, length(?1)) = ?1
             {}
             LIMIT ?2 OFFSET ?3",
            order_clause(&query.order_by)
        );

        let mut rows = self
            .conn()
            .query(
                &sql,
                params![query.prefix.as_str(), limit, query.offset as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("query {}: {e}", query.prefix)))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let key: String = row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("query row parse: {e}")))?;
                    let raw: String = row
                        .get(1)
                        .map_err(|e| DatabaseError::Query(format!("query row parse: {e}")))?;
                    records.push(parse_value(&key, &raw)?);
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("query {}: {e}", query.prefix))),
            }
        }
        Ok(records)
    }
}
