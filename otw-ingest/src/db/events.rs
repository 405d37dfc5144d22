//! Reconciling store for incident rows
//!
//! State machine per row: created ACTIVE on first upsert, ACTIVE -> INACTIVE
//! when absent from a reconciled snapshot, INACTIVE -> ACTIVE when it
//! reappears. Rows are never deleted.

use super::EVENTS_PARTITION;
use otw_common::time::{from_storage, to_storage};
use otw_common::{
    CanonicalEvent, EventStatus, GeoPoint, Result, StoredEventRecord, StoredStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What an upsert did to the row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// First observation of this incident
    Inserted,
    /// Row was already ACTIVE; fields and lastSeen refreshed
    Updated,
    /// Row was INACTIVE and has been flipped back to ACTIVE
    Reactivated,
}

/// Result of one absence reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids flipped from ACTIVE to INACTIVE
    pub deactivated: Vec<String>,
    /// Absent rows whose update failed and are still ACTIVE
    pub failures: usize,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

/// Owner of all incident rows
#[derive(Clone)]
pub struct ReconcilingStore {
    pool: SqlitePool,
}

impl ReconcilingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite one incident, marking it ACTIVE and seen now
    ///
    /// Safe to repeat with the same input: the row count never changes after
    /// the first call.
    pub async fn upsert(&self, event: &CanonicalEvent) -> Result<UpsertOutcome> {
        self.upsert_at(event, Utc::now()).await
    }

    pub(crate) async fn upsert_at(
        &self,
        event: &CanonicalEvent,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let previous: Option<String> = sqlx::query_scalar(
            "SELECT status FROM traffic_events WHERE partition_key = ? AND row_key = ?",
        )
        .bind(EVENTS_PARTITION)
        .bind(&event.id)
        .fetch_optional(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO traffic_events (
                partition_key, row_key, event_type, location, start_time, end_time,
                priority, reported_status, status, longitude, latitude, last_seen
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'ACTIVE', ?, ?, ?)
            ON CONFLICT(partition_key, row_key) DO UPDATE SET
                event_type = excluded.event_type,
                location = excluded.location,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                priority = excluded.priority,
                reported_status = excluded.reported_status,
                status = 'ACTIVE',
                longitude = excluded.longitude,
                latitude = excluded.latitude,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(EVENTS_PARTITION)
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(&event.location)
        .bind(event.start_time.as_ref().map(to_storage))
        .bind(event.end_time.as_ref().map(to_storage))
        .bind(&event.priority)
        .bind(event.status.as_str())
        .bind(event.geo_coordinates.map(|p| p.longitude))
        .bind(event.geo_coordinates.map(|p| p.latitude))
        .bind(to_storage(&now))
        .execute(&self.pool)
        .await?;

        let outcome = match previous.as_deref() {
            None => UpsertOutcome::Inserted,
            Some("INACTIVE") => UpsertOutcome::Reactivated,
            Some(_) => UpsertOutcome::Updated,
        };
        debug!(id = %event.id, ?outcome, "Upserted incident");
        Ok(outcome)
    }

    /// Mark every ACTIVE row whose id is not in `present_ids` as INACTIVE
    ///
    /// A failure on one row is counted in the report and the remaining rows
    /// are still processed.
    pub async fn reconcile_absences(&self, present_ids: &HashSet<String>) -> Result<ReconcileReport> {
        self.reconcile_absences_at(present_ids, Utc::now()).await
    }

    pub(crate) async fn reconcile_absences_at(
        &self,
        present_ids: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let active: Vec<String> = sqlx::query_scalar(
            "SELECT row_key FROM traffic_events WHERE partition_key = ? AND status = 'ACTIVE'",
        )
        .bind(EVENTS_PARTITION)
        .fetch_all(&self.pool)
        .await?;

        let last_seen = to_storage(&now);
        let mut report = ReconcileReport::default();

        for row_key in active.into_iter().filter(|k| !present_ids.contains(k)) {
            let result = sqlx::query(
                r#"
                UPDATE traffic_events
                SET status = 'INACTIVE', last_seen = ?
                WHERE partition_key = ? AND row_key = ? AND status = 'ACTIVE'
                "#,
            )
            .bind(&last_seen)
            .bind(EVENTS_PARTITION)
            .bind(&row_key)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    info!(id = %row_key, "Marked incident INACTIVE");
                    report.deactivated.push(row_key);
                }
                Err(e) => {
                    warn!(id = %row_key, error = %e, "Failed to mark incident INACTIVE");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Fetch one stored incident
    pub async fn get(&self, id: &str) -> Result<Option<StoredEventRecord>> {
        let row = sqlx::query(
            r#"
            SELECT row_key, event_type, location, start_time, end_time, priority,
                   reported_status, status, longitude, latitude, last_seen
            FROM traffic_events
            WHERE partition_key = ? AND row_key = ?
            "#,
        )
        .bind(EVENTS_PARTITION)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// List stored incidents, optionally restricted to one status
    pub async fn list(&self, status: Option<StoredStatus>) -> Result<Vec<StoredEventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT row_key, event_type, location, start_time, end_time, priority,
                   reported_status, status, longitude, latitude, last_seen
            FROM traffic_events
            WHERE partition_key = ? AND (? IS NULL OR status = ?)
            ORDER BY row_key
            "#,
        )
        .bind(EVENTS_PARTITION)
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Number of stored incident rows
    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM traffic_events WHERE partition_key = ?")
            .bind(EVENTS_PARTITION)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<StoredEventRecord> {
    let parse_optional = |value: Option<String>| -> Result<Option<DateTime<Utc>>> {
        value.as_deref().map(from_storage).transpose()
    };

    let status: String = row.try_get("status")?;
    let reported_status: String = row.try_get("reported_status")?;
    let longitude: Option<f64> = row.try_get("longitude")?;
    let latitude: Option<f64> = row.try_get("latitude")?;
    let last_seen: String = row.try_get("last_seen")?;

    Ok(StoredEventRecord {
        id: row.try_get("row_key")?,
        event_type: row.try_get("event_type")?,
        location: row.try_get("location")?,
        start_time: parse_optional(row.try_get("start_time")?)?,
        end_time: parse_optional(row.try_get("end_time")?)?,
        priority: row.try_get("priority")?,
        reported_status: EventStatus::from_upstream(&reported_status),
        status: status.parse()?,
        geo_coordinates: longitude
            .zip(latitude)
            .map(|(longitude, latitude)| GeoPoint { longitude, latitude }),
        last_seen: from_storage(&last_seen)?,
    })
}
