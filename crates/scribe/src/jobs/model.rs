//! Job records and their client-facing status view.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mapper::{ErrorCategory, JobFailure};

/// Opaque job identifier, assigned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the artifact a job operates on (an uploaded file path
/// relative to the artifacts directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a produced output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Pending or processing.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The only edges of the state machine. Terminal states have none;
    /// a retry is a new job, not an edge out of `Failed`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status together with the data that only exists in that status.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Processing,
    Completed { result_ref: ResultRef },
    Failed { failure: JobFailure },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Processing => JobStatus::Processing,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// One attempt to transform a subject artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub subject_id: SubjectId,
    pub state: JobState,
    /// Position in the retry lineage, starting at 1.
    pub attempt_count: u32,
    /// The failed job this one retries, if any.
    pub retry_of: Option<JobId>,
    /// Raw failure cause for operators. Never part of the status view.
    pub error_detail: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn result_ref(&self) -> Option<&ResultRef> {
        match &self.state {
            JobState::Completed { result_ref } => Some(result_ref),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.state {
            JobState::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn view(&self) -> JobStatusView {
        JobStatusView::from(self)
    }
}

/// What a status fetch returns to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub subject_id: SubjectId,
    pub status: JobStatus,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ResultRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        let failure = job.failure();
        Self {
            job_id: job.id.clone(),
            subject_id: job.subject_id.clone(),
            status: job.status(),
            attempt_count: job.attempt_count,
            result_ref: job.result_ref().cloned(),
            error_category: failure.map(|f| f.category),
            error_message: failure.map(|f| f.message.clone()),
            error_suggestion: failure.map(|f| f.suggestion.clone()),
            retryable: failure.map(|f| f.retryable),
            updated_at: job.updated_at,
        }
    }
}

/// Returned by submit and retry; processing continues in the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: JobId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_in(state: JobState) -> Job {
        Job {
            id: JobId::from("j1"),
            subject_id: SubjectId::from("a.mp3"),
            state,
            attempt_count: 1,
            retry_of: None,
            error_detail: Some("connection reset by peer".to_string()),
            version: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_machine_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("superseded"), None);
    }

    #[test]
    fn test_completed_view_has_no_error_fields() {
        let job = job_in(JobState::Completed {
            result_ref: ResultRef::new("out-1"),
        });
        let json = serde_json::to_value(job.view()).unwrap();

        assert_eq!(json["status"], "completed");
        assert_eq!(json["resultRef"], "out-1");
        assert!(json.get("errorCategory").is_none());
        assert!(json.get("retryable").is_none());
    }

    #[test]
    fn test_failed_view_hides_raw_detail() {
        let job = job_in(JobState::Failed {
            failure: JobFailure::from_category(ErrorCategory::UpstreamUnavailable),
        });
        let json = serde_json::to_string(&job.view()).unwrap();

        assert!(json.contains("\"errorCategory\":\"upstream_unavailable\""));
        assert!(json.contains("\"retryable\":true"));
        assert!(!json.contains("connection reset"));
        assert!(!json.contains("resultRef"));
    }
}
