//! Client-side status synchronization.
//!
//! A [`StatusPoller`] fetches a job's status on a fixed interval and hands
//! every observed view to a callback until it sees a terminal status. Each
//! tick awaits its fetch before the next tick is scheduled, so there is at
//! most one request in flight per poller. Stopping a poller only ends
//! observation; the job itself keeps running.

mod http;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::jobs::{JobId, JobStatusView};

pub use http::HttpStatusSource;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Shortest interval a poller will run at. Shorter requests are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network trouble or a server-side error. The poller keeps going.
    #[error("Status fetch failed: {0}")]
    Transient(String),

    /// The job does not exist. Polling cannot converge.
    #[error("Job {0} not found")]
    NotFound(JobId),
}

/// Where a poller reads job status from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusView, FetchError>;
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The last view delivered to the callback.
    Terminal(JobStatusView),
    Stopped,
    /// The source reported the job as unknown.
    Lost,
}

pub struct StatusPoller {
    job_id: JobId,
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<PollOutcome>,
}

impl StatusPoller {
    /// Starts polling on the current tokio runtime. The first fetch happens
    /// immediately. An `interval` below [`MIN_POLL_INTERVAL`] is raised to it.
    pub fn start<F>(
        source: Arc<dyn StatusSource>,
        job_id: JobId,
        on_update: F,
        interval: Duration,
    ) -> Self
    where
        F: FnMut(&JobStatusView) + Send + 'static,
    {
        if interval < MIN_POLL_INTERVAL {
            log::warn!(
                "Poll interval {:?} for job {} is too short, using {:?}",
                interval,
                job_id,
                MIN_POLL_INTERVAL
            );
        }
        let interval = interval.max(MIN_POLL_INTERVAL);
        let stopped = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());

        let handle = tokio::spawn(poll_loop(
            source,
            job_id.clone(),
            on_update,
            interval,
            Arc::clone(&stopped),
            Arc::clone(&wake),
        ));

        Self {
            job_id,
            stopped,
            wake,
            handle,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Cancels the loop. A fetch already in flight completes but its result
    /// is discarded. Calling this more than once, or after the loop ended
    /// on its own, has no effect.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            log::debug!("Stopping status poller for job {}", self.job_id);
        }
        self.wake.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the loop to end.
    pub async fn join(self) -> PollOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => PollOutcome::Stopped,
        }
    }
}

async fn poll_loop<F>(
    source: Arc<dyn StatusSource>,
    job_id: JobId,
    mut on_update: F,
    interval: Duration,
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
) -> PollOutcome
where
    F: FnMut(&JobStatusView) + Send + 'static,
{
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = wake.notified() => {},
            _ = timer.tick() => {},
        }

        if stopped.load(Ordering::Acquire) {
            return PollOutcome::Stopped;
        }

        let result = source.fetch(&job_id).await;

        if stopped.load(Ordering::Acquire) {
            return PollOutcome::Stopped;
        }

        match result {
            Ok(view) => {
                let terminal = view.status.is_terminal();
                on_update(&view);
                if terminal {
                    log::debug!("Job {} reached {}", job_id, view.status);
                    return PollOutcome::Terminal(view);
                }
            }
            Err(FetchError::Transient(reason)) => {
                log::warn!("Status fetch for job {} failed, will retry: {}", job_id, reason);
            }
            Err(FetchError::NotFound(_)) => {
                log::warn!("Job {} not found, giving up", job_id);
                return PollOutcome::Lost;
            }
        }
    }
}
