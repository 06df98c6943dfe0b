//! Schema for the libSQL datastore.
//!
//! The `datastore` table holds one JSON record per key. `created` and
//! `updated` are copied out of the record on write so listings can be
//! ordered in SQL. Applied steps are recorded in `_migrations`; each step
//! runs in its own transaction together with its version row.

use libsql::Connection;
use tracing::info;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS datastore (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created TEXT,
                updated TEXT
            );
        "#,
    },
    Migration {
        version: 2,
        name: "ordering_indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_datastore_created ON datastore(created);
            CREATE INDEX IF NOT EXISTS idx_datastore_updated ON datastore(updated);
        "#,
    },
];

/// Latest schema version this build knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Bring the schema up to date. Returns how many steps were applied.
pub async fn run_migrations(conn: &Connection) -> Result<usize, DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let from = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > from).collect();

    for migration in &pending {
        apply(conn, migration).await?;
    }

    if !pending.is_empty() {
        info!(from, to = latest_version(), applied = pending.len(), "Datastore schema migrated");
    }
    Ok(pending.len())
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: libsql::Error| {
        DatabaseError::Migration(format!("V{} ({}): {e}", migration.version, migration.name))
    };

    let tx = conn.transaction().await.map_err(failed)?;
    tx.execute_batch(migration.sql).await.map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![migration.version, migration.name],
    )
    .await
    .map_err(failed)?;
    tx.commit().await.map_err(failed)
}

/// Highest applied version, 0 for a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read schema version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get(0)
            .map_err(|e| DatabaseError::Migration(format!("read schema version: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!("read schema version: {e}"))),
    }
}
