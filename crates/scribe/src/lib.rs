pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod jobs;
pub mod poller;
pub mod processor;
pub mod telemetry;

pub use config::{load_config, Config};
pub use db::Database;
pub use error::{ConfigError, ExportError, ProcessError, Result, ScribeError};
pub use export::{ExportReport, ExportRequest, ExportStatus, Exporter, HttpExporter};
pub use jobs::{
    ErrorCategory, ErrorMapper, JobFailure, JobId, JobProcessor, JobService, JobStatus,
    JobStatusView, JobStore, ResultRef, RunOutcome, ServiceError, StaleJobSweeper, StoreError,
    SubjectId, SubmitReceipt,
};
pub use poller::{FetchError, HttpStatusSource, PollOutcome, StatusPoller, StatusSource};
pub use processor::{ArtifactKind, ArtifactProcessor, Processor};
