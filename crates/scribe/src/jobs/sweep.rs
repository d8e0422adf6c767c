//! Periodic reconciliation of jobs stuck in `Processing`.
//!
//! A job can be left processing when the store fails during a run or the
//! process dies mid-attempt. The sweep fails such jobs with a retryable
//! timeout so the subject can be retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::error::StoreError;
use super::mapper::{ErrorCategory, JobFailure};
use super::store::JobStore;
use crate::config::ProcessingConfig;

const STALE_MESSAGE: &str = "Processing did not finish in time.";

pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

pub struct StaleJobSweeper {
    store: JobStore,
    stale_after: Duration,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StaleJobSweeper {
    /// An `interval` below [`MIN_SWEEP_INTERVAL`] is raised to it.
    pub fn new(store: JobStore, stale_after: Duration, interval: Duration) -> Self {
        Self {
            store,
            stale_after,
            interval: interval.max(MIN_SWEEP_INTERVAL),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn from_config(store: JobStore, config: &ProcessingConfig) -> Self {
        Self::new(store, config.stale_after(), config.sweep_interval())
    }

    /// Fails every job that has been processing since before
    /// `now - stale_after`. Returns how many jobs were failed.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(stale_after).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut failed = 0;
        for job in self.store.processing_since_before(cutoff)? {
            let failure = JobFailure::from_category(ErrorCategory::UpstreamTimeout)
                .with_message(STALE_MESSAGE);
            let detail = format!(
                "no progress since {}; failed by stale-job sweep",
                job.updated_at.to_rfc3339()
            );
            match self.store.fail_observed(&job, failure, Some(&detail)) {
                Ok(_) => {
                    log::warn!(
                        "Failed stale job {} for subject '{}' (processing since {})",
                        job.id,
                        job.subject_id,
                        job.updated_at
                    );
                    failed += 1;
                }
                // Finished or swept concurrently.
                Err(StoreError::StaleState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    /// A handle sharing this sweeper's store and shutdown signal.
    fn detached(&self) -> Self {
        Self {
            store: self.store.clone(),
            stale_after: self.stale_after,
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Runs the sweep every `interval` on the current tokio runtime until
    /// [`stop`](Self::stop) is called.
    pub fn start(&self) -> JoinHandle<()> {
        let sweeper = self.detached();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(sweeper.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                if sweeper.shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = timer.tick() => {},
                    _ = sweeper.wake.notified() => {},
                }

                if sweeper.shutdown.load(Ordering::Acquire) {
                    break;
                }

                let pass = sweeper.detached();
                match tokio::task::spawn_blocking(move || pass.sweep_once(Utc::now())).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(n)) => log::info!("Stale-job sweep failed {} job(s)", n),
                    Ok(Err(e)) => log::error!("Stale-job sweep failed: {}", e),
                    Err(e) => log::error!("Stale-job sweep task failed: {}", e),
                }
            }

            log::info!("Stale-job sweeper stopped");
        })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
