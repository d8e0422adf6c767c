//! Durable, concurrency-safe home for job records.
//!
//! Every mutation is a compare-and-swap on `(status, version)`: the store
//! reads the row, then issues a conditional update that only commits if
//! nobody else has moved the row in between. The single-active-job rule
//! is checked on insert and backed by a partial unique index.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};

use super::error::StoreError;
use super::mapper::{ErrorCategory, JobFailure};
use super::model::{Job, JobId, JobState, JobStatus, ResultRef, SubjectId};
use crate::db::job_repo::{self, JobRow, JobTransition};
use crate::db::{Database, DatabaseError};

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, id: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidRow {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn invalid(id: &str, reason: impl Into<String>) -> DatabaseError {
    DatabaseError::InvalidRow {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn decode(row: JobRow) -> Result<Job, DatabaseError> {
    let status = JobStatus::parse(&row.status)
        .ok_or_else(|| invalid(&row.id, format!("unknown status '{}'", row.status)))?;

    let state = match status {
        JobStatus::Pending => JobState::Pending,
        JobStatus::Processing => JobState::Processing,
        JobStatus::Completed => {
            let result_ref = row
                .result_ref
                .clone()
                .ok_or_else(|| invalid(&row.id, "completed job without result_ref"))?;
            JobState::Completed {
                result_ref: ResultRef::new(result_ref),
            }
        }
        JobStatus::Failed => {
            let category = row
                .error_category
                .as_deref()
                .and_then(ErrorCategory::parse)
                .ok_or_else(|| invalid(&row.id, "failed job without a known error_category"))?;
            let defaults = JobFailure::from_category(category);
            JobState::Failed {
                failure: JobFailure {
                    category,
                    message: row.error_message.clone().unwrap_or(defaults.message),
                    suggestion: row.error_suggestion.clone().unwrap_or(defaults.suggestion),
                    retryable: row.retryable.unwrap_or(defaults.retryable),
                },
            }
        }
    };

    Ok(Job {
        created_at: parse_timestamp(&row.created_at, &row.id)?,
        updated_at: parse_timestamp(&row.updated_at, &row.id)?,
        id: JobId::from(row.id),
        subject_id: SubjectId::new(row.subject_id),
        state,
        attempt_count: row.attempt_count,
        retry_of: row.retry_of.map(JobId::from),
        error_detail: row.error_detail,
        version: row.version,
    })
}

fn decode_all(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter()
        .map(|row| decode(row).map_err(StoreError::from))
        .collect()
}

/// Job store backed by the `jobs` table.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new pending job that starts a lineage (`attempt_count = 1`).
    ///
    /// Fails with [`StoreError::Conflict`] if the subject already has a
    /// pending or processing job.
    pub fn create(&self, subject_id: &SubjectId) -> Result<Job, StoreError> {
        self.insert_pending(subject_id, 1, None)
    }

    /// Inserts the next job in `previous`'s lineage. `previous` must be
    /// failed and still the newest job of its subject; it is left untouched.
    ///
    /// Fails with [`StoreError::StaleState`] if another job was recorded for
    /// the subject after `previous` was read.
    pub fn create_retry(&self, previous: &Job) -> Result<Job, StoreError> {
        if previous.status() != JobStatus::Failed {
            return Err(StoreError::StaleState {
                job_id: previous.id.clone(),
                expected: JobStatus::Failed,
            });
        }
        self.insert_pending(
            &previous.subject_id,
            previous.attempt_count + 1,
            Some(&previous.id),
        )
    }

    fn insert_pending(
        &self,
        subject_id: &SubjectId,
        attempt_count: u32,
        retry_of: Option<&JobId>,
    ) -> Result<Job, StoreError> {
        if job_repo::find_active_by_subject(&self.db, subject_id.as_str())?.is_some() {
            return Err(StoreError::Conflict {
                subject_id: subject_id.clone(),
            });
        }

        let now = format_timestamp(Utc::now());
        let row = JobRow {
            id: JobId::generate().to_string(),
            subject_id: subject_id.to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            attempt_count,
            retry_of: retry_of.map(|id| id.to_string()),
            result_ref: None,
            error_category: None,
            error_message: None,
            error_suggestion: None,
            retryable: None,
            error_detail: None,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        let inserted = match retry_of {
            Some(previous) => job_repo::insert_after_failed(&self.db, &row, previous.as_str()),
            None => job_repo::insert(&self.db, &row).map(|()| true),
        };

        match inserted {
            Ok(true) => {}
            // Only the conditional retry insert can refuse.
            Ok(false) => {
                let previous = retry_of.cloned().unwrap_or_else(|| JobId::from(row.id.clone()));
                debug!(
                    "Retry of job {} for subject '{}' lost to a newer job",
                    previous, subject_id
                );
                return Err(StoreError::StaleState {
                    job_id: previous,
                    expected: JobStatus::Failed,
                });
            }
            // Lost a race with a concurrent create for the same subject.
            Err(e) if e.is_constraint_violation() => {
                return Err(StoreError::Conflict {
                    subject_id: subject_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Created job {} for subject '{}' (attempt {})",
            row.id, row.subject_id, row.attempt_count
        );
        Ok(decode(row)?)
    }

    /// `Pending → Processing`. Fails with [`StoreError::StaleState`] if the
    /// job is not pending or another claimer won the swap.
    pub fn claim(&self, job_id: &JobId) -> Result<Job, StoreError> {
        let current = self.get(job_id)?;
        self.swap(&current, JobStatus::Pending, JobState::Processing, None)
    }

    /// `Processing → Completed`.
    pub fn complete(&self, job_id: &JobId, result_ref: ResultRef) -> Result<Job, StoreError> {
        let current = self.get(job_id)?;
        self.swap(
            &current,
            JobStatus::Processing,
            JobState::Completed { result_ref },
            None,
        )
    }

    /// `Processing → Failed`.
    pub fn fail(
        &self,
        job_id: &JobId,
        failure: JobFailure,
        detail: Option<&str>,
    ) -> Result<Job, StoreError> {
        let current = self.get(job_id)?;
        self.fail_observed(&current, failure, detail)
    }

    /// `Processing → Failed`, conditioned on the exact snapshot the caller
    /// observed. Used by sweeps that decide from a listing.
    pub fn fail_observed(
        &self,
        observed: &Job,
        failure: JobFailure,
        detail: Option<&str>,
    ) -> Result<Job, StoreError> {
        self.swap(
            observed,
            JobStatus::Processing,
            JobState::Failed { failure },
            detail,
        )
    }

    fn swap(
        &self,
        current: &Job,
        from: JobStatus,
        next: JobState,
        detail: Option<&str>,
    ) -> Result<Job, StoreError> {
        let to = next.status();
        debug_assert!(from.can_transition_to(to));

        let stale = || StoreError::StaleState {
            job_id: current.id.clone(),
            expected: from,
        };

        if current.status() != from {
            return Err(stale());
        }

        let now = Utc::now();
        let mut t = JobTransition {
            id: current.id.to_string(),
            from_status: from.as_str().to_string(),
            expected_version: current.version,
            to_status: to.as_str().to_string(),
            updated_at: format_timestamp(now),
            error_detail: detail.map(str::to_string),
            ..Default::default()
        };
        match &next {
            JobState::Completed { result_ref } => {
                t.result_ref = Some(result_ref.to_string());
            }
            JobState::Failed { failure } => {
                t.error_category = Some(failure.category.as_str().to_string());
                t.error_message = Some(failure.message.clone());
                t.error_suggestion = Some(failure.suggestion.clone());
                t.retryable = Some(failure.retryable);
            }
            JobState::Pending | JobState::Processing => {}
        }

        if !job_repo::compare_and_set(&self.db, &t)? {
            debug!(
                "Job {} transition {} -> {} lost compare-and-swap at version {}",
                current.id, from, to, current.version
            );
            return Err(stale());
        }

        debug!("Job {} {} -> {}", current.id, from, to);

        let mut updated = current.clone();
        updated.state = next;
        updated.version = current.version + 1;
        // Round-trip through the stored precision so the returned job
        // matches what a subsequent `get` reads.
        updated.updated_at = parse_timestamp(&t.updated_at, &t.id)?;
        updated.error_detail = t.error_detail;
        Ok(updated)
    }

    /// Read-only fetch.
    pub fn get(&self, job_id: &JobId) -> Result<Job, StoreError> {
        let row = job_repo::find_by_id(&self.db, job_id.as_str())?
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        Ok(decode(row)?)
    }

    /// The pending or processing job for a subject, if any.
    pub fn get_active_by_subject(&self, subject_id: &SubjectId) -> Result<Option<Job>, StoreError> {
        job_repo::find_active_by_subject(&self.db, subject_id.as_str())?
            .map(|row| decode(row).map_err(StoreError::from))
            .transpose()
    }

    /// The most recent job for a subject, whatever its status.
    pub fn latest_by_subject(&self, subject_id: &SubjectId) -> Result<Option<Job>, StoreError> {
        job_repo::find_latest_by_subject(&self.db, subject_id.as_str())?
            .map(|row| decode(row).map_err(StoreError::from))
            .transpose()
    }

    /// Every job recorded for a subject, newest first.
    pub fn history(&self, subject_id: &SubjectId) -> Result<Vec<Job>, StoreError> {
        decode_all(job_repo::list_by_subject(&self.db, subject_id.as_str())?)
    }

    /// Jobs that were created but never claimed, oldest first.
    pub fn pending(&self) -> Result<Vec<Job>, StoreError> {
        decode_all(job_repo::list_by_status(
            &self.db,
            JobStatus::Pending.as_str(),
        )?)
    }

    /// Processing jobs that have not transitioned since before `cutoff`.
    pub fn processing_since_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        decode_all(job_repo::list_by_status_updated_before(
            &self.db,
            JobStatus::Processing.as_str(),
            &format_timestamp(cutoff),
        )?)
    }

    /// Runs `f` against this store on tokio's blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&JobStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Database(DatabaseError::Task(e.to_string())))?
    }

    /// Async version of [`create`](Self::create).
    pub async fn create_async(&self, subject_id: &SubjectId) -> Result<Job, StoreError> {
        let subject_id = subject_id.clone();
        self.blocking(move |store| store.create(&subject_id)).await
    }

    /// Async version of [`create_retry`](Self::create_retry).
    pub async fn create_retry_async(&self, previous: &Job) -> Result<Job, StoreError> {
        let previous = previous.clone();
        self.blocking(move |store| store.create_retry(&previous)).await
    }

    /// Async version of [`claim`](Self::claim).
    pub async fn claim_async(&self, job_id: &JobId) -> Result<Job, StoreError> {
        let job_id = job_id.clone();
        self.blocking(move |store| store.claim(&job_id)).await
    }

    /// Async version of [`complete`](Self::complete).
    pub async fn complete_async(
        &self,
        job_id: &JobId,
        result_ref: ResultRef,
    ) -> Result<Job, StoreError> {
        let job_id = job_id.clone();
        self.blocking(move |store| store.complete(&job_id, result_ref))
            .await
    }

    /// Async version of [`fail`](Self::fail).
    pub async fn fail_async(
        &self,
        job_id: &JobId,
        failure: JobFailure,
        detail: Option<String>,
    ) -> Result<Job, StoreError> {
        let job_id = job_id.clone();
        self.blocking(move |store| store.fail(&job_id, failure, detail.as_deref()))
            .await
    }

    /// Async version of [`get`](Self::get).
    pub async fn get_async(&self, job_id: &JobId) -> Result<Job, StoreError> {
        let job_id = job_id.clone();
        self.blocking(move |store| store.get(&job_id)).await
    }

    /// Async version of [`latest_by_subject`](Self::latest_by_subject).
    pub async fn latest_by_subject_async(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<Job>, StoreError> {
        let subject_id = subject_id.clone();
        self.blocking(move |store| store.latest_by_subject(&subject_id))
            .await
    }
}
