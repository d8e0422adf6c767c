//! Maps arbitrary failure causes onto a closed set of user-facing
//! categories.
//!
//! The mapper is total: it walks the `source()` chain of whatever error it
//! is given, classifies the first link it recognises, and falls back to
//! [`ErrorCategory::Unknown`]. It has no side effects.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

/// Closed set of job failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InputUnreadable,
    UnsupportedFormat,
    UpstreamTimeout,
    UpstreamUnavailable,
    ResourceMissing,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 6] = [
        ErrorCategory::InputUnreadable,
        ErrorCategory::UnsupportedFormat,
        ErrorCategory::UpstreamTimeout,
        ErrorCategory::UpstreamUnavailable,
        ErrorCategory::ResourceMissing,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InputUnreadable => "input_unreadable",
            ErrorCategory::UnsupportedFormat => "unsupported_format",
            ErrorCategory::UpstreamTimeout => "upstream_timeout",
            ErrorCategory::UpstreamUnavailable => "upstream_unavailable",
            ErrorCategory::ResourceMissing => "resource_missing",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Whether retrying can help when nothing more is known.
    pub fn default_retryable(&self) -> bool {
        match self {
            ErrorCategory::InputUnreadable
            | ErrorCategory::UnsupportedFormat
            | ErrorCategory::ResourceMissing => false,
            ErrorCategory::UpstreamTimeout
            | ErrorCategory::UpstreamUnavailable
            | ErrorCategory::Unknown => true,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCategory::InputUnreadable => "The uploaded file could not be read.",
            ErrorCategory::UnsupportedFormat => "This file type cannot be processed.",
            ErrorCategory::UpstreamTimeout => "The processing service took too long to respond.",
            ErrorCategory::UpstreamUnavailable => {
                "The processing service is currently unavailable."
            }
            ErrorCategory::ResourceMissing => "The uploaded file could not be found.",
            ErrorCategory::Unknown => "Processing failed unexpectedly.",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorCategory::InputUnreadable => {
                "Check that the file is not corrupted or empty, then upload it again."
            }
            ErrorCategory::UnsupportedFormat => {
                "Upload an audio recording, an image or PDF, or a plain-text note."
            }
            ErrorCategory::UpstreamTimeout => "Try again in a few minutes.",
            ErrorCategory::UpstreamUnavailable => {
                "Try again later; contact support if this persists."
            }
            ErrorCategory::ResourceMissing => "Upload the file again before retrying.",
            ErrorCategory::Unknown => "Try again; contact support if this persists.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure shape recorded on a job and shown to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub category: ErrorCategory,
    pub message: String,
    pub suggestion: String,
    pub retryable: bool,
}

impl JobFailure {
    /// Failure with the category's default message, suggestion and
    /// retryability.
    pub fn from_category(category: ErrorCategory) -> Self {
        Self {
            category,
            message: category.message().to_string(),
            suggestion: category.suggestion().to_string(),
            retryable: category.default_retryable(),
        }
    }

    /// Overrides the category default when the call site knows better.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorMapper;

impl ErrorMapper {
    pub fn new() -> Self {
        Self
    }

    /// Classifies `cause`. Never fails.
    pub fn map(&self, cause: &(dyn StdError + 'static)) -> JobFailure {
        let mut current: Option<&(dyn StdError + 'static)> = Some(cause);
        while let Some(err) = current {
            if let Some(failure) = classify(err) {
                return failure;
            }
            current = err.source();
        }
        JobFailure::from_category(ErrorCategory::Unknown)
    }
}

/// Renders an error and its sources as `outer: inner: root`.
pub fn render_chain(cause: &(dyn StdError + 'static)) -> String {
    let mut out = cause.to_string();
    let mut current = cause.source();
    while let Some(err) = current {
        let text = err.to_string();
        // thiserror messages often already embed their source.
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        current = err.source();
    }
    out
}

fn classify(err: &(dyn StdError + 'static)) -> Option<JobFailure> {
    if let Some(e) = err.downcast_ref::<ProcessError>() {
        return Some(classify_process(e));
    }
    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        return classify_io(e).map(JobFailure::from_category);
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return classify_reqwest(e).map(JobFailure::from_category);
    }
    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(JobFailure::from_category(ErrorCategory::UpstreamTimeout));
    }
    if err.downcast_ref::<std::string::FromUtf8Error>().is_some()
        || err.downcast_ref::<std::str::Utf8Error>().is_some()
    {
        return Some(JobFailure::from_category(ErrorCategory::InputUnreadable));
    }
    None
}

fn classify_process(e: &ProcessError) -> JobFailure {
    let category = match e {
        ProcessError::NotFound(_) | ProcessError::InvalidSubject(_) => {
            ErrorCategory::ResourceMissing
        }
        ProcessError::UnsupportedFormat(_) => ErrorCategory::UnsupportedFormat,
        ProcessError::ReadArtifact { source, .. } => match source.kind() {
            std::io::ErrorKind::NotFound => ErrorCategory::ResourceMissing,
            _ => ErrorCategory::InputUnreadable,
        },
        ProcessError::InvalidEncoding(_) | ProcessError::EmptyOutput(_) => {
            ErrorCategory::InputUnreadable
        }
        ProcessError::WriteResult { .. } => ErrorCategory::Unknown,
        ProcessError::Timeout(_) => ErrorCategory::UpstreamTimeout,
        ProcessError::UpstreamStatus { status, .. } => category_for_status(*status),
        ProcessError::Request(inner) => {
            classify_reqwest(inner).unwrap_or(ErrorCategory::UpstreamUnavailable)
        }
        ProcessError::ProviderNotConfigured(_) => {
            // Retrying cannot help until an operator configures a provider.
            return JobFailure::from_category(ErrorCategory::UpstreamUnavailable)
                .with_retryable(false);
        }
    };
    JobFailure::from_category(category)
}

fn classify_io(e: &std::io::Error) -> Option<ErrorCategory> {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::NotFound => Some(ErrorCategory::ResourceMissing),
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof | ErrorKind::PermissionDenied => {
            Some(ErrorCategory::InputUnreadable)
        }
        ErrorKind::TimedOut => Some(ErrorCategory::UpstreamTimeout),
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => Some(ErrorCategory::UpstreamUnavailable),
        _ => None,
    }
}

fn classify_reqwest(e: &reqwest::Error) -> Option<ErrorCategory> {
    if e.is_timeout() {
        return Some(ErrorCategory::UpstreamTimeout);
    }
    if e.is_connect() {
        return Some(ErrorCategory::UpstreamUnavailable);
    }
    e.status().map(|s| category_for_status(s.as_u16()))
}

/// Classifies an HTTP status returned by a provider.
pub fn category_for_status(status: u16) -> ErrorCategory {
    match status {
        408 | 504 => ErrorCategory::UpstreamTimeout,
        415 => ErrorCategory::UnsupportedFormat,
        400 | 422 => ErrorCategory::InputUnreadable,
        404 | 410 => ErrorCategory::ResourceMissing,
        429 | 500..=599 => ErrorCategory::UpstreamUnavailable,
        _ => ErrorCategory::Unknown,
    }
}
