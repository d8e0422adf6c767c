//! Job repository: row-level access to the `jobs` table.
//!
//! Status transitions go through [`compare_and_set`], which only writes
//! when both the stored status and version still match what the caller
//! read. Everything above this module works with decoded `Job` values.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

const COLUMNS: &str = "id, subject_id, status, attempt_count, retry_of, result_ref,
     error_category, error_message, error_suggestion, retryable, error_detail,
     version, created_at, updated_at";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub subject_id: String,
    pub status: String,
    pub attempt_count: u32,
    pub retry_of: Option<String>,
    pub result_ref: Option<String>,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    pub error_suggestion: Option<String>,
    pub retryable: Option<bool>,
    pub error_detail: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            subject_id: row.get("subject_id")?,
            status: row.get("status")?,
            attempt_count: row.get("attempt_count")?,
            retry_of: row.get("retry_of")?,
            result_ref: row.get("result_ref")?,
            error_category: row.get("error_category")?,
            error_message: row.get("error_message")?,
            error_suggestion: row.get("error_suggestion")?,
            retryable: row.get("retryable")?,
            error_detail: row.get("error_detail")?,
            version: row.get("version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A guarded status change. Applied only if the row is still in
/// `from_status` at `expected_version`.
#[derive(Debug, Clone, Default)]
pub struct JobTransition {
    pub id: String,
    pub from_status: String,
    pub expected_version: i64,
    pub to_status: String,
    pub updated_at: String,
    pub result_ref: Option<String>,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    pub error_suggestion: Option<String>,
    pub retryable: Option<bool>,
    pub error_detail: Option<String>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_write(|tx| {
        tx.execute(
            "INSERT INTO jobs (id, subject_id, status, attempt_count, retry_of, result_ref,
             error_category, error_message, error_suggestion, retryable, error_detail,
             version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.id,
                job.subject_id,
                job.status,
                job.attempt_count,
                job.retry_of,
                job.result_ref,
                job.error_category,
                job.error_message,
                job.error_suggestion,
                job.retryable,
                job.error_detail,
                job.version,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Inserts `job` only if `previous_id` is still the subject's newest row and
/// is still failed.
///
/// Returns `false` when nothing was written because another row was
/// inserted for the subject after `previous_id`.
pub fn insert_after_failed(
    db: &Database,
    job: &JobRow,
    previous_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_write(|tx| {
        let inserted = tx.execute(
            "INSERT INTO jobs (id, subject_id, status, attempt_count, retry_of, result_ref,
             error_category, error_message, error_suggestion, retryable, error_detail,
             version, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14
             WHERE (SELECT id FROM jobs WHERE subject_id = ?2 ORDER BY rowid DESC LIMIT 1) = ?15
               AND EXISTS (SELECT 1 FROM jobs WHERE id = ?15 AND status = 'failed')",
            params![
                job.id,
                job.subject_id,
                job.status,
                job.attempt_count,
                job.retry_of,
                job.result_ref,
                job.error_category,
                job.error_message,
                job.error_suggestion,
                job.retryable,
                job.error_detail,
                job.version,
                job.created_at,
                job.updated_at,
                previous_id,
            ],
        )?;
        Ok(inserted == 1)
    })
}

/// Applies a transition if the stored `(status, version)` still matches.
///
/// Returns `false` when nothing was written: either the row is gone or
/// another writer got there first.
pub fn compare_and_set(db: &Database, t: &JobTransition) -> Result<bool, DatabaseError> {
    db.with_write(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET status = ?4, version = version + 1, updated_at = ?5,
             result_ref = ?6, error_category = ?7, error_message = ?8,
             error_suggestion = ?9, retryable = ?10, error_detail = ?11
             WHERE id = ?1 AND status = ?2 AND version = ?3",
            params![
                t.id,
                t.from_status,
                t.expected_version,
                t.to_status,
                t.updated_at,
                t.result_ref,
                t.error_category,
                t.error_message,
                t.error_suggestion,
                t.retryable,
                t.error_detail,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS),
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds the pending or processing job for a subject, if any.
pub fn find_active_by_subject(
    db: &Database,
    subject_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs
                     WHERE subject_id = ?1 AND status IN ('pending', 'processing')
                     LIMIT 1",
                    COLUMNS
                ),
                params![subject_id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds the most recently inserted job for a subject.
pub fn find_latest_by_subject(
    db: &Database,
    subject_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs WHERE subject_id = ?1 ORDER BY rowid DESC LIMIT 1",
                    COLUMNS
                ),
                params![subject_id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists every job for a subject, newest first.
pub fn list_by_subject(db: &Database, subject_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE subject_id = ?1 ORDER BY rowid DESC",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![subject_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists jobs in `status`, oldest first.
pub fn list_by_status(db: &Database, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY rowid ASC",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists jobs in `status` whose last update is strictly before `cutoff`.
///
/// Timestamps are stored as fixed-width RFC 3339 UTC strings, so string
/// comparison matches chronological order.
pub fn list_by_status_updated_before(
    db: &Database,
    status: &str,
    cutoff: &str,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = ?1 AND updated_at < ?2 ORDER BY updated_at ASC",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status, cutoff], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
