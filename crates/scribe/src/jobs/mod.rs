//! Asynchronous job processing: records, state transitions, failure
//! mapping, execution, and reconciliation.

pub mod error;
pub mod mapper;
pub mod model;
pub mod runner;
pub mod service;
pub mod store;
pub mod sweep;

pub use error::{ServiceError, StoreError};
pub use mapper::{ErrorCategory, ErrorMapper, JobFailure};
pub use model::{Job, JobId, JobState, JobStatus, JobStatusView, ResultRef, SubjectId, SubmitReceipt};
pub use runner::{JobProcessor, RunOutcome};
pub use service::JobService;
pub use store::JobStore;
pub use sweep::StaleJobSweeper;
