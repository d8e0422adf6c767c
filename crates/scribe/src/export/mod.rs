//! Publishing completed results to an external service.
//!
//! Export is layered on top of a completed job. A failed export is
//! reported to its caller and never changes the job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{resolve_secret, ExportConfig};
use crate::error::{ConfigError, ExportError};
use crate::jobs::{JobId, ResultRef, SubjectId};
use crate::processor::remote::{parse_endpoint, truncate_body};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub job_id: JobId,
    pub subject_id: SubjectId,
    pub result_ref: ResultRef,
}

/// Overall result of a batch export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Success,
    /// At least one item failed. The rest were still attempted.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFailure {
    pub job_id: JobId,
    pub subject_id: SubjectId,
    pub error: String,
}

/// Per-item outcome of exporting a group of subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub exported_count: usize,
    pub exported: Vec<JobId>,
    pub failed_count: usize,
    pub failed: Vec<ExportFailure>,
    /// Subjects whose newest job is not completed.
    pub skipped: Vec<SubjectId>,
    pub status: ExportStatus,
}

impl ExportReport {
    pub fn new(exported: Vec<JobId>, failed: Vec<ExportFailure>, skipped: Vec<SubjectId>) -> Self {
        let status = if failed.is_empty() {
            ExportStatus::Success
        } else {
            ExportStatus::Partial
        };
        Self {
            exported_count: exported.len(),
            exported,
            failed_count: failed.len(),
            failed,
            skipped,
            status,
        }
    }
}

#[async_trait]
pub trait Exporter: Send + Sync {
    async fn publish(&self, request: &ExportRequest) -> Result<(), ExportError>;
}

/// Posts export requests as JSON with a bearer token.
pub struct HttpExporter {
    client: Client,
    endpoint: Url,
    token: SecretString,
}

impl HttpExporter {
    pub fn new(endpoint: &str, token: SecretString, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    pub fn from_config(config: &ExportConfig) -> Result<Self, ConfigError> {
        let token = resolve_secret(&config.token_env)?;
        Self::new(&config.endpoint, token, config.timeout())
    }
}

#[async_trait]
impl Exporter for HttpExporter {
    async fn publish(&self, request: &ExportRequest) -> Result<(), ExportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.token.expose_secret())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            log::warn!("Export of job {} rejected with HTTP {}", request.job_id, status);
            return Err(ExportError::Rejected {
                status,
                message: truncate_body(&body),
            });
        }

        log::debug!("Published {} for job {}", request.result_ref, request.job_id);
        Ok(())
    }
}
