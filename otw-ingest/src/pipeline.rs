//! Ingestion cycle
//!
//! fetch -> canonicalize -> area filter -> change detection, then on a
//! changed snapshot: upserts, absence reconciliation, fingerprint commit and
//! notification. An unchanged snapshot stops after change detection.

use crate::canonicalize::canonicalize_batch;
use crate::db::{ReconcilingStore, UpsertOutcome};
use crate::fetcher::{FetchError, IncidentFetcher};
use crate::filter::AreaFilter;
use crate::fingerprint::{ChangeDecision, ChangeDetector};
use crate::notifier::{publish_all, Notifier};
use crate::retry::RetryError;
use otw_common::ChangeNotification;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("An ingestion cycle is already running")]
    Busy,

    #[error("Upstream fetch failed: {0}")]
    Fetch(#[from] RetryError<FetchError>),

    #[error(transparent)]
    Common(#[from] otw_common::Error),
}

/// Summary of one cycle, returned to HTTP triggers and logged by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub changed: bool,
    pub fingerprint: String,
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub filtered_out: usize,
    pub inserted: usize,
    pub updated: usize,
    pub reactivated: usize,
    pub upsert_failures: usize,
    pub deactivated: usize,
    pub deactivation_failures: usize,
    pub fingerprint_committed: bool,
    pub notified: usize,
}

pub struct Pipeline {
    fetcher: IncidentFetcher,
    store: ReconcilingStore,
    detector: ChangeDetector,
    filter: AreaFilter,
    notifiers: Vec<Arc<dyn Notifier>>,
    cycle_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        fetcher: IncidentFetcher,
        pool: SqlitePool,
        filter: AreaFilter,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            fetcher,
            store: ReconcilingStore::new(pool.clone()),
            detector: ChangeDetector::new(pool),
            filter,
            notifiers,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ReconcilingStore {
        &self.store
    }

    /// True while a cycle holds the lock
    pub fn is_busy(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    /// Fetch the upstream snapshot and process it
    ///
    /// Fails with [`CycleError::Busy`] instead of waiting when another cycle
    /// is running. Fetch exhaustion ends the cycle before any store write.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let _guard = self.cycle_lock.try_lock().map_err(|_| CycleError::Busy)?;

        info!(url = %self.fetcher.url(), "Starting ingestion cycle");
        let records = self.fetcher.fetch().await.map_err(|e| {
            error!(attempts = e.attempts(), error = %e, "Cycle aborted, upstream unavailable");
            CycleError::Fetch(e)
        })?;

        self.process(records).await
    }

    /// Process a snapshot pushed by a caller instead of fetched upstream
    pub async fn ingest_snapshot(&self, records: Vec<Value>) -> Result<CycleReport, CycleError> {
        let _guard = self.cycle_lock.try_lock().map_err(|_| CycleError::Busy)?;
        info!(records = records.len(), "Starting ingestion cycle from pushed snapshot");
        self.process(records).await
    }

    async fn process(&self, records: Vec<Value>) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport {
            received: records.len(),
            ..CycleReport::default()
        };

        let batch = canonicalize_batch(&records);
        report.rejected = batch.rejected.len();
        let rejected_ids = batch.rejected_ids();

        let canonical = batch.events.len();
        let events = self.filter.apply(batch.events);
        report.filtered_out = canonical - events.len();
        report.accepted = events.len();

        // Only events that passed the area filter keep their rows ACTIVE. A
        // rejected record cannot be judged against the area, so its id counts
        // as present only when no filter is configured.
        let mut present_ids: HashSet<String> = events.iter().map(|e| e.id.clone()).collect();
        if !self.filter.is_enabled() {
            present_ids.extend(rejected_ids);
        }

        let decision = self.detector.detect(&events).await?;
        report.fingerprint = decision.fingerprint().to_string();

        let fingerprint = match decision {
            ChangeDecision::Unchanged(_) => {
                info!(
                    fingerprint = %report.fingerprint,
                    events = report.accepted,
                    "Snapshot unchanged, skipping reconciliation and notification"
                );
                return Ok(report);
            }
            ChangeDecision::Changed { current, previous } => {
                info!(
                    current = %current,
                    previous = previous.as_ref().map(|p| p.as_str()).unwrap_or("<none>"),
                    events = report.accepted,
                    "Snapshot changed"
                );
                current
            }
        };
        report.changed = true;

        for event in &events {
            match self.store.upsert(event).await {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::Reactivated) => report.reactivated += 1,
                Err(e) => {
                    warn!(id = %event.id, error = %e, "Failed to upsert incident");
                    report.upsert_failures += 1;
                }
            }
        }

        let reconciled = match self.store.reconcile_absences(&present_ids).await {
            Ok(absences) => {
                report.deactivated = absences.deactivated.len();
                report.deactivation_failures = absences.failures;
                absences.is_complete()
            }
            Err(e) => {
                warn!(error = %e, "Absence reconciliation failed");
                false
            }
        };

        // A partially applied snapshot must not be suppressed next time
        if report.upsert_failures == 0 && reconciled {
            match self.detector.commit(&fingerprint).await {
                Ok(()) => report.fingerprint_committed = true,
                Err(e) => warn!(error = %e, "Failed to persist snapshot fingerprint"),
            }
        } else {
            warn!(
                upsert_failures = report.upsert_failures,
                deactivation_failures = report.deactivation_failures,
                "Snapshot only partly applied, fingerprint not stored"
            );
        }

        let notification = Arc::new(ChangeNotification::new(events));
        report.notified = publish_all(&self.notifiers, notification).await;

        info!(
            inserted = report.inserted,
            updated = report.updated,
            reactivated = report.reactivated,
            deactivated = report.deactivated,
            upsert_failures = report.upsert_failures,
            deactivation_failures = report.deactivation_failures,
            rejected = report.rejected,
            notified = report.notified,
            "Ingestion cycle complete"
        );
        Ok(report)
    }
}
