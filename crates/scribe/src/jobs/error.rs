//! Request-level errors of the job store and job service.
//!
//! Job-processing failures are not errors at this level: they are recorded
//! on the job itself and discovered by polling.

use thiserror::Error;

use super::model::{JobId, JobStatus, SubjectId};
use crate::db::DatabaseError;
use crate::error::ExportError;

#[derive(Error, Debug)]
pub enum StoreError {
    /// An active job already exists for the subject.
    #[error("Subject '{subject_id}' already has an active job")]
    Conflict { subject_id: SubjectId },

    /// A compare-and-swap transition lost the race or the job was not in
    /// the required state.
    #[error("Job {job_id} is no longer {expected}")]
    StaleState { job_id: JobId, expected: JobStatus },

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No jobs recorded for subject '{0}'")]
    UnknownSubject(SubjectId),

    /// Only a failed job can be retried.
    #[error("Latest job {job_id} for subject '{subject_id}' is {status} and cannot be retried")]
    NotRetryable {
        subject_id: SubjectId,
        job_id: JobId,
        status: JobStatus,
    },

    #[error("Job {job_id} is {status}; only completed jobs can be exported")]
    NotCompleted { job_id: JobId, status: JobStatus },

    #[error("None of the {0} subject(s) has a completed job to export")]
    NothingToExport(usize),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}
