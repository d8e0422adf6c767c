//! Fake collaborators for driving the job core.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use scribe::jobs::{JobId, JobStatus, JobStatusView, ResultRef, SubjectId};
use scribe::poller::{FetchError, StatusSource};
use scribe::processor::{ProcessFailure, Processor};

type Outcome = Box<dyn Fn(&SubjectId) -> Result<ResultRef, ProcessFailure> + Send + Sync>;

/// Processor whose result is computed from the subject. Counts calls.
pub struct FnProcessor {
    pub calls: AtomicUsize,
    outcome: Outcome,
}

impl FnProcessor {
    pub fn new<F>(outcome: F) -> Arc<Self>
    where
        F: Fn(&SubjectId) -> Result<ResultRef, ProcessFailure> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Box::new(outcome),
        })
    }

    /// Always succeeds with `fixed`.
    pub fn ok(fixed: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(ResultRef::new(fixed)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for FnProcessor {
    async fn process(&self, subject_id: &SubjectId) -> Result<ResultRef, ProcessFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        (self.outcome)(subject_id)
    }
}

/// Processor that blocks until released, keeping its job `Processing`.
pub struct GatedProcessor {
    pub entered: Notify,
    release: Notify,
    pub calls: AtomicUsize,
}

impl GatedProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Processor for GatedProcessor {
    async fn process(&self, subject_id: &SubjectId) -> Result<ResultRef, ProcessFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ResultRef::new(format!("out/{}", subject_id)))
    }
}

/// Status source whose job advances with (tokio) time: pending until
/// `processing_at`, processing until `terminal_at`, then `terminal`.
pub struct TimedSource {
    start: Instant,
    processing_at: Duration,
    terminal_at: Duration,
    terminal: JobStatus,
    pub fetches: Mutex<Vec<Duration>>,
}

impl TimedSource {
    pub fn new(processing_at: Duration, terminal_at: Duration, terminal: JobStatus) -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            processing_at,
            terminal_at,
            terminal,
            fetches: Mutex::new(Vec::new()),
        })
    }

    pub fn fetch_times(&self) -> Vec<Duration> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSource for TimedSource {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusView, FetchError> {
        let elapsed = self.start.elapsed();
        self.fetches.lock().unwrap().push(elapsed);

        let status = if elapsed >= self.terminal_at {
            self.terminal
        } else if elapsed >= self.processing_at {
            JobStatus::Processing
        } else {
            JobStatus::Pending
        };
        Ok(view(job_id, status))
    }
}

/// Status source that replays a script of responses, then repeats the last.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<JobStatus, FetchError>>>,
    last: Mutex<Option<Result<JobStatus, FetchError>>>,
    /// Simulated request latency.
    latency: Duration,
    pub fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<JobStatus, FetchError>>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            latency,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusView, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Err(FetchError::Transient("empty script".into()))),
            }
        };
        next.map(|status| view(job_id, status))
    }
}

pub fn view(job_id: &JobId, status: JobStatus) -> JobStatusView {
    JobStatusView {
        job_id: job_id.clone(),
        subject_id: SubjectId::from("PT_Jane/raw_files/session.mp3"),
        status,
        attempt_count: 1,
        result_ref: (status == JobStatus::Completed).then(|| ResultRef::new("out-1")),
        error_category: None,
        error_message: None,
        error_suggestion: None,
        retryable: None,
        updated_at: chrono::Utc::now(),
    }
}
