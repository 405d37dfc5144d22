//! Persisted incident store
//!
//! Partitioned key-value layout on SQLite: every row is addressed by
//! `(partition_key, row_key)`. Incidents live in one fixed partition keyed
//! by incident id; the snapshot fingerprint is a singleton row in a
//! separate metadata partition.

use otw_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub mod events;
pub mod meta;

pub use events::{ReconcileReport, ReconcilingStore, UpsertOutcome};

/// Partition holding incident rows
pub const EVENTS_PARTITION: &str = "OttawaTraffic";

/// Partition holding the fingerprint row
pub const META_PARTITION: &str = "TrafficHash";

/// Row key of the fingerprint row
pub const FINGERPRINT_ROW: &str = "LastHash";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS traffic_events (
    partition_key TEXT NOT NULL,
    row_key TEXT NOT NULL,
    event_type TEXT NOT NULL,
    location TEXT NOT NULL,
    start_time TEXT,
    end_time TEXT,
    priority TEXT NOT NULL,
    reported_status TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'INACTIVE')),
    longitude REAL,
    latitude REAL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (partition_key, row_key)
);

CREATE INDEX IF NOT EXISTS idx_traffic_events_status
    ON traffic_events (partition_key, status);

CREATE TABLE IF NOT EXISTS snapshot_meta (
    partition_key TEXT NOT NULL,
    row_key TEXT NOT NULL,
    hash TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (partition_key, row_key)
);
"#;

/// Open (creating if needed) the database file and ensure the schema exists
pub async fn connect(db_path: &Path, acquire_timeout: Duration) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
        .map_err(|e| Error::Config(format!("Invalid database path {}: {}", db_path.display(), e)))?
        .create_if_missing(true)
        .busy_timeout(acquire_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(acquire_timeout)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    info!("Database ready at {}", db_path.display());
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied
///
/// The connection is never recycled, so the database lives as long as the pool.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables if they do not exist
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["snapshot_meta", "traffic_events"]);
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("otw.db");

        let pool = connect(&path, Duration::from_secs(1)).await.unwrap();
        pool.close().await;

        assert!(path.exists());
    }
}
