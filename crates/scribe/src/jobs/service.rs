//! The boundary callers use: submit, status, retry, history and export.
//!
//! Submission returns as soon as the job row exists. Processing runs on a
//! spawned task bounded by a semaphore, and its outcome is only visible
//! through status fetches.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::error::{ServiceError, StoreError};
use super::model::{JobId, JobStatus, JobStatusView, SubjectId, SubmitReceipt};
use super::runner::{JobProcessor, RunOutcome};
use super::store::JobStore;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ConfigError, ExportError};
use crate::export::{ExportFailure, ExportReport, ExportRequest, Exporter, HttpExporter};
use crate::poller::{FetchError, StatusSource};
use crate::processor::ArtifactProcessor;

#[derive(Clone)]
pub struct JobService {
    store: JobStore,
    runner: Arc<JobProcessor>,
    exporter: Option<Arc<dyn Exporter>>,
    permits: Arc<Semaphore>,
}

impl JobService {
    pub fn new(runner: JobProcessor, max_concurrent_jobs: usize) -> Self {
        Self {
            store: runner.store().clone(),
            runner: Arc::new(runner),
            exporter: None,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Wires the artifact processor, runner and optional exporter from
    /// configuration.
    pub fn from_config(config: &Config, db: Database) -> Result<Self, ConfigError> {
        let processor = ArtifactProcessor::from_config(config)?;
        let runner = JobProcessor::new(JobStore::new(db), Arc::new(processor))
            .with_timeout(config.processing.timeout());
        let mut service = Self::new(runner, config.processing.max_concurrent_jobs);

        if let Some(export) = &config.export {
            service = service.with_exporter(Arc::new(HttpExporter::from_config(export)?));
        }
        Ok(service)
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Creates a pending job and schedules it. Fails with a conflict if
    /// the subject already has an active job.
    pub async fn submit(&self, subject_id: &SubjectId) -> Result<SubmitReceipt, ServiceError> {
        let job = self.store.create_async(subject_id).await?;
        self.dispatch(job.id.clone());
        Ok(SubmitReceipt { job_id: job.id })
    }

    /// Schedules a run of `job_id` on the current runtime. Redundant
    /// dispatches of the same job are harmless.
    pub fn dispatch(&self, job_id: JobId) -> JoinHandle<RunOutcome> {
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return RunOutcome::Abandoned,
            };
            runner.run(&job_id).await
        })
    }

    /// Latest known state of a job. Never waits for a transition.
    pub fn status(&self, job_id: &JobId) -> Result<JobStatusView, ServiceError> {
        Ok(self.store.get(job_id)?.view())
    }

    /// Starts a new job for a subject whose newest job failed. The failed
    /// job is kept as history.
    ///
    /// The decision is made against the newest row at insert time: if a
    /// concurrent retry lands first, the subject is re-read and judged
    /// again.
    pub async fn retry(&self, subject_id: &SubjectId) -> Result<SubmitReceipt, ServiceError> {
        loop {
            let latest = self
                .store
                .latest_by_subject_async(subject_id)
                .await?
                .ok_or_else(|| ServiceError::UnknownSubject(subject_id.clone()))?;

            match latest.status() {
                JobStatus::Failed => {}
                JobStatus::Pending | JobStatus::Processing => {
                    return Err(StoreError::Conflict {
                        subject_id: subject_id.clone(),
                    }
                    .into());
                }
                status @ JobStatus::Completed => {
                    return Err(ServiceError::NotRetryable {
                        subject_id: subject_id.clone(),
                        job_id: latest.id,
                        status,
                    });
                }
            }

            let job = match self.store.create_retry_async(&latest).await {
                Ok(job) => job,
                Err(StoreError::StaleState { .. }) => {
                    log::debug!("Subject '{}' changed during retry, re-reading", subject_id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            log::info!(
                "Retrying subject '{}' as job {} (previous {})",
                subject_id,
                job.id,
                latest.id
            );
            self.dispatch(job.id.clone());
            return Ok(SubmitReceipt { job_id: job.id });
        }
    }

    /// The in-flight job for a subject, if any.
    pub fn active(&self, subject_id: &SubjectId) -> Result<Option<JobStatusView>, ServiceError> {
        Ok(self
            .store
            .get_active_by_subject(subject_id)?
            .map(|job| job.view()))
    }

    /// Every job recorded for a subject, newest first.
    pub fn history(&self, subject_id: &SubjectId) -> Result<Vec<JobStatusView>, ServiceError> {
        Ok(self
            .store
            .history(subject_id)?
            .iter()
            .map(|job| job.view())
            .collect())
    }

    /// Dispatches jobs left pending by a previous process.
    pub fn resume_pending(&self) -> Result<Vec<JoinHandle<RunOutcome>>, ServiceError> {
        let pending = self.store.pending()?;
        if !pending.is_empty() {
            log::info!("Resuming {} pending job(s)", pending.len());
        }
        Ok(pending
            .into_iter()
            .map(|job| self.dispatch(job.id))
            .collect())
    }

    /// Publishes a completed job's result. Failures are returned to the
    /// caller and leave the job untouched.
    pub async fn export(&self, job_id: &JobId) -> Result<(), ServiceError> {
        let exporter = self.exporter.as_ref().ok_or(ExportError::NotConfigured)?;
        let job = self.store.get_async(job_id).await?;
        let result_ref = job
            .result_ref()
            .cloned()
            .ok_or_else(|| ServiceError::NotCompleted {
                job_id: job.id.clone(),
                status: job.status(),
            })?;

        let request = ExportRequest {
            job_id: job.id,
            subject_id: job.subject_id,
            result_ref,
        };
        exporter.publish(&request).await?;
        log::info!("Exported job {}", request.job_id);
        Ok(())
    }

    /// Publishes the newest completed job of every subject in a group.
    ///
    /// Subjects whose newest job is not completed are skipped. A failed
    /// publish is recorded in the report and the remaining subjects are
    /// still exported. Fails only if nothing in the group can be exported.
    pub async fn export_all(&self, subjects: &[SubjectId]) -> Result<ExportReport, ServiceError> {
        let exporter = self.exporter.as_ref().ok_or(ExportError::NotConfigured)?;

        let mut requests = Vec::new();
        let mut skipped = Vec::new();
        for subject_id in subjects {
            match self.store.latest_by_subject_async(subject_id).await? {
                Some(job) => match job.result_ref().cloned() {
                    Some(result_ref) => requests.push(ExportRequest {
                        job_id: job.id,
                        subject_id: job.subject_id,
                        result_ref,
                    }),
                    None => skipped.push(subject_id.clone()),
                },
                None => skipped.push(subject_id.clone()),
            }
        }

        if requests.is_empty() {
            return Err(ServiceError::NothingToExport(subjects.len()));
        }

        log::info!("Exporting {} completed job(s)", requests.len());

        let mut exported = Vec::new();
        let mut failed = Vec::new();
        for request in requests {
            match exporter.publish(&request).await {
                Ok(()) => exported.push(request.job_id),
                Err(e) => {
                    log::error!("Failed to export job {}: {}", request.job_id, e);
                    failed.push(ExportFailure {
                        job_id: request.job_id,
                        subject_id: request.subject_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(ExportReport::new(exported, failed, skipped))
    }
}

#[async_trait]
impl StatusSource for JobService {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusView, FetchError> {
        match self.store.get_async(job_id).await {
            Ok(job) => Ok(job.view()),
            Err(StoreError::NotFound(id)) => Err(FetchError::NotFound(id)),
            Err(e) => Err(FetchError::Transient(e.to_string())),
        }
    }
}
