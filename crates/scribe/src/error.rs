use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job store error: {0}")]
    Store(#[from] crate::jobs::StoreError),

    #[error("Job service error: {0}")]
    Service(#[from] crate::jobs::ServiceError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Secret not found: environment variable '{0}' is not set")]
    MissingSecret(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Raw failure causes raised by this crate's own processors.
///
/// These are never shown to end users; the job error mapper turns them
/// into a category with a user-facing message.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid subject reference '{0}'")]
    InvalidSubject(String),

    #[error("Unsupported artifact format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read artifact '{path}': {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact '{0}' is not valid UTF-8 text")]
    InvalidEncoding(PathBuf),

    #[error("Artifact '{0}' produced no text")]
    EmptyOutput(PathBuf),

    #[error("Failed to write result '{path}': {source}")]
    WriteResult {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned HTTP {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("No transcription provider configured for {0} artifacts")]
    ProviderNotConfigured(String),
}

impl ProcessError {
    /// Whether a fresh network-level attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessError::Timeout(_) => true,
            ProcessError::UpstreamStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ProcessError::Request(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No export destination configured")]
    NotConfigured,

    #[error("Publishing service rejected the export with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Publishing request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ScribeError>;
