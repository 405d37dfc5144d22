//! Periodic cycle trigger

use crate::pipeline::{CycleError, CycleReport, Pipeline};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Something the scheduler can run on every tick
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    /// Run one cycle, or fail with [`CycleError::Busy`] if one is in flight
    async fn run_cycle(&self) -> Result<CycleReport, CycleError>;
}

#[async_trait]
impl CycleRunner for Pipeline {
    async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        Pipeline::run_cycle(self).await
    }
}

/// Run the ingestion cycle every `period`
///
/// A zero period disables the timer and returns `None`. Ticks that land
/// while a cycle is still running (scheduled or HTTP-triggered) are skipped.
pub fn spawn_scheduler<R: CycleRunner>(runner: Arc<R>, period: Duration) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        info!("Scheduled ingestion disabled (interval 0)");
        return None;
    }

    info!(interval_secs = period.as_secs(), "Starting ingestion scheduler");

    Some(tokio::spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;

            match runner.run_cycle().await {
                Ok(report) => debug!(
                    changed = report.changed,
                    events = report.accepted,
                    "Scheduled cycle finished"
                ),
                Err(CycleError::Busy) => {
                    info!("Previous cycle still running, skipping tick");
                }
                Err(e) => error!(error = %e, "Scheduled cycle failed"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::fetcher::IncidentFetcher;
    use crate::filter::AreaFilter;
    use crate::retry::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Runner guarded by a lock the test can hold, like the pipeline's
    #[derive(Default)]
    struct LockedRunner {
        cycle_lock: Mutex<()>,
        runs: AtomicUsize,
        busy: AtomicUsize,
    }

    #[async_trait]
    impl CycleRunner for LockedRunner {
        async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
            let _guard = self.cycle_lock.try_lock().map_err(|_| {
                self.busy.fetch_add(1, Ordering::SeqCst);
                CycleError::Busy
            })?;
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(CycleReport::default())
        }
    }

    #[tokio::test]
    async fn test_zero_interval_disables_scheduler() {
        let fetcher = IncidentFetcher::new(
            "http://127.0.0.1:9/unused",
            Duration::from_secs(1),
            RetryPolicy::default(),
        )
        .unwrap();
        let pipeline = Arc::new(Pipeline::new(
            fetcher,
            connect_in_memory().await.unwrap(),
            AreaFilter::default(),
            Vec::new(),
        ));

        assert!(spawn_scheduler(pipeline, Duration::ZERO).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_tick_is_skipped_and_next_tick_runs() {
        let runner = Arc::new(LockedRunner::default());
        let held = runner.cycle_lock.lock().await;

        let handle = spawn_scheduler(Arc::clone(&runner), Duration::from_secs(30)).unwrap();

        // First tick fires immediately while the lock is held
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.busy.load(Ordering::SeqCst), 1);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

        drop(held);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.busy.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);

        handle.abort();
    }
}
