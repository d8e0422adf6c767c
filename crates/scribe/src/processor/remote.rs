//! Remote transcription and OCR over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{resolve_secret, ProviderConfig};
use crate::error::{ConfigError, ProcessError};
use crate::jobs::ResultRef;
use crate::processor::{Artifact, ArtifactKind, Transcriber};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length for provider error bodies kept in failure details.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

/// Parses and checks an http(s) endpoint.
pub(crate) fn parse_endpoint(url: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidEndpoint {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ConfigError::InvalidEndpoint {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeResponse {
    result_ref: String,
}

/// Uploads audio and image artifacts to a transcription service.
///
/// The artifact bytes are posted as the request body with a guessed
/// content type; the service answers with `{"resultRef": "..."}`.
pub struct HttpTranscriber {
    client: Client,
    endpoint: Url,
    api_key: SecretString,
}

impl HttpTranscriber {
    pub fn new(endpoint: &str, api_key: SecretString, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let api_key = resolve_secret(&config.api_key_env)?;
        Self::new(&config.endpoint, api_key, timeout)
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, artifact: &Artifact) -> Result<ResultRef, ProcessError> {
        let body = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| ProcessError::ReadArtifact {
                path: artifact.path.clone(),
                source: e,
            })?;
        let content_type = mime_guess::from_path(&artifact.path).first_or_octet_stream();

        log::debug!(
            "Uploading {} artifact '{}' ({} bytes, {})",
            artifact.kind,
            artifact.subject_id,
            body.len(),
            content_type
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, content_type.as_ref())
            .header("X-Artifact-Kind", artifact.kind.as_str())
            .header("X-Subject-Id", artifact.subject_id.as_str())
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessError::UpstreamStatus {
                status,
                message: truncate_body(&body),
            });
        }

        let parsed: TranscribeResponse = response.json().await?;
        if parsed.result_ref.trim().is_empty() {
            return Err(ProcessError::EmptyOutput(artifact.path.clone()));
        }

        Ok(ResultRef::new(parsed.result_ref))
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        matches!(kind, ArtifactKind::Audio | ArtifactKind::Image)
    }
}
