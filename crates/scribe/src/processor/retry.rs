//! Network-level retry with exponential backoff.
//!
//! This wraps a single processing attempt. Retrying a whole job is a user
//! action that creates a new job.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::RetryConfig;
use crate::error::ProcessError;
use crate::jobs::ResultRef;
use crate::processor::{Artifact, ArtifactKind, Transcriber};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries including the first one.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_backoff: Duration::from_millis(config.min_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.min_backoff_ms)),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay before the try following failed try number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.min_backoff.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Retries transient failures of the wrapped transcriber.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: Transcriber> Transcriber for Retrying<T> {
    async fn transcribe(&self, artifact: &Artifact) -> Result<ResultRef, ProcessError> {
        let mut attempt = 1;
        loop {
            match self.inner.transcribe(artifact).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    log::warn!(
                        "Attempt {}/{} for '{}' failed: {}. Retrying in {:?}",
                        attempt,
                        self.policy.max_attempts,
                        artifact.subject_id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        self.inner.supports(kind)
    }
}
