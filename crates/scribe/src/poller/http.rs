use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{FetchError, StatusSource};
use crate::error::ConfigError;
use crate::jobs::{JobId, JobStatusView};
use crate::processor::remote::parse_endpoint;

/// Reads job status from `GET {base}/jobs/{id}`.
pub struct HttpStatusSource {
    client: Client,
    base: String,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        parse_endpoint(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, job_id: &JobId) -> String {
        format!("{}/jobs/{}", self.base, job_id)
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusView, FetchError> {
        let response = self
            .client
            .get(self.url_for(job_id))
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(job_id.clone())),
            s if s.is_success() => response
                .json::<JobStatusView>()
                .await
                .map_err(|e| FetchError::Transient(format!("invalid status body: {}", e))),
            s => Err(FetchError::Transient(format!("HTTP {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_trims_trailing_slash() {
        let source =
            HttpStatusSource::new("http://localhost:8000/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.url_for(&JobId::from("abc")),
            "http://localhost:8000/api/jobs/abc"
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        // Port 9 (discard) is not expected to accept HTTP connections.
        let source = HttpStatusSource::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = source.fetch(&JobId::from("abc")).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }
}
