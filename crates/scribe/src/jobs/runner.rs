//! Drives a single job through its state machine.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};

use super::error::StoreError;
use super::mapper::{render_chain, ErrorCategory, ErrorMapper};
use super::model::{JobId, ResultRef};
use super::store::JobStore;
use crate::error::ProcessError;
use crate::processor::{ProcessFailure, Processor};

/// Default bound on a single processing attempt.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(300);

/// What a call to [`JobProcessor::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(ResultRef),
    Failed(ErrorCategory),
    /// Another caller already owned the job, or won the terminal write.
    Skipped,
    /// The store failed mid-run. The job is left for the stale-job sweep.
    Abandoned,
}

pub struct JobProcessor {
    store: JobStore,
    processor: Arc<dyn Processor>,
    mapper: ErrorMapper,
    timeout: Duration,
}

impl JobProcessor {
    pub fn new(store: JobStore, processor: Arc<dyn Processor>) -> Self {
        Self {
            store,
            processor,
            mapper: ErrorMapper::new(),
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Claims the job, invokes the processor once with a bounded timeout,
    /// and records the terminal state. Safe to call redundantly: only the
    /// caller that wins the claim does any work.
    pub async fn run(&self, job_id: &JobId) -> RunOutcome {
        let span = info_span!("job.run", job_id = %job_id);
        self.run_inner(job_id).instrument(span).await
    }

    async fn run_inner(&self, job_id: &JobId) -> RunOutcome {
        let job = match self.store.claim_async(job_id).await {
            Ok(job) => job,
            Err(StoreError::StaleState { .. }) => {
                debug!("Job already claimed elsewhere, skipping");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                error!("Failed to claim job: {}", e);
                return RunOutcome::Abandoned;
            }
        };

        info!(
            subject_id = %job.subject_id,
            attempt = job.attempt_count,
            "Processing job"
        );

        let result = match tokio::time::timeout(
            self.timeout,
            self.processor.process(&job.subject_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProcessFailure::from(ProcessError::Timeout(self.timeout))),
        };

        match result {
            Ok(result_ref) => match self.store.complete_async(job_id, result_ref.clone()).await {
                Ok(_) => {
                    info!(result_ref = %result_ref, "Job completed");
                    RunOutcome::Completed(result_ref)
                }
                Err(e) => self.terminal_write_failed(e),
            },
            Err(cause) => {
                let failure = self.mapper.map(&*cause);
                let detail = render_chain(&*cause);
                warn!(
                    category = %failure.category,
                    retryable = failure.retryable,
                    "Job failed: {}",
                    detail
                );
                let category = failure.category;
                match self.store.fail_async(job_id, failure, Some(detail)).await {
                    Ok(_) => RunOutcome::Failed(category),
                    Err(e) => self.terminal_write_failed(e),
                }
            }
        }
    }

    fn terminal_write_failed(&self, e: StoreError) -> RunOutcome {
        match e {
            StoreError::StaleState { .. } => {
                debug!("Terminal state already recorded elsewhere");
                RunOutcome::Skipped
            }
            other => {
                error!("Failed to record terminal state, leaving job processing: {}", other);
                RunOutcome::Abandoned
            }
        }
    }
}
