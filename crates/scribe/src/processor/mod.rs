//! Processing capabilities invoked by the job processor.
//!
//! [`Processor`] is the seam the job core depends on. The bundled
//! [`ArtifactProcessor`] resolves a subject to a file under the artifacts
//! directory, works out what kind of artifact it is, and hands it to the
//! first [`Transcriber`] that supports that kind.

pub mod remote;
pub mod retry;
pub mod text;

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{ConfigError, ProcessError};
use crate::jobs::{ResultRef, SubjectId};

pub use remote::HttpTranscriber;
pub use retry::{RetryPolicy, Retrying};
pub use text::TextCleaner;

/// Any failure cause a processor may raise.
pub type ProcessFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Transforms a subject artifact into a produced result.
///
/// One call is one logical attempt. Implementations may retry internally
/// at the network layer but must not leave state behind that would break
/// a later fresh attempt.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, subject_id: &SubjectId) -> Result<ResultRef, ProcessFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Session recordings, transcribed to text.
    Audio,
    /// Scanned forms and PDFs, run through OCR.
    Image,
    /// Typed notes, cleaned up.
    Text,
}

impl ArtifactKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" | "wav" | "ogg" | "webm" | "aac" | "flac" | "m4a" => Some(ArtifactKind::Audio),
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "pdf" => Some(ArtifactKind::Image),
            "txt" | "md" => Some(ArtifactKind::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Image => "image",
            ArtifactKind::Text => "text",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subject resolved to a readable file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub subject_id: SubjectId,
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, artifact: &Artifact) -> Result<ResultRef, ProcessError>;
    fn supports(&self, kind: ArtifactKind) -> bool;
}

pub struct ArtifactProcessor {
    artifacts_dir: PathBuf,
    transcribers: Vec<Arc<dyn Transcriber>>,
}

impl ArtifactProcessor {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            transcribers: Vec::new(),
        }
    }

    /// Registers a backend. Earlier registrations win for a shared kind.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcribers.push(transcriber);
        self
    }

    /// Local text cleaning plus, when configured, the remote provider for
    /// audio and images wrapped in the network retry policy.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut processor = Self::new(&config.artifacts_directory).with_transcriber(Arc::new(
            TextCleaner::new(&config.output_directory),
        ));

        if let Some(provider) = &config.transcription {
            let remote = HttpTranscriber::from_config(provider, config.processing.timeout())?;
            let policy = RetryPolicy::from(&config.retry);
            processor = processor.with_transcriber(Arc::new(Retrying::new(remote, policy)));
        } else {
            log::warn!("No transcription provider configured; audio and image jobs will fail");
        }

        Ok(processor)
    }

    /// Maps a subject onto a file inside the artifacts directory.
    pub async fn resolve(&self, subject_id: &SubjectId) -> Result<Artifact, ProcessError> {
        let relative = Path::new(subject_id.as_str());
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if subject_id.as_str().is_empty() || escapes {
            return Err(ProcessError::InvalidSubject(subject_id.to_string()));
        }

        let path = self.artifacts_dir.join(relative);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(ProcessError::NotFound(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcessError::NotFound(path));
            }
            Err(e) => return Err(ProcessError::ReadArtifact { path, source: e }),
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let kind = ArtifactKind::from_extension(&extension)
            .ok_or(ProcessError::UnsupportedFormat(extension))?;

        Ok(Artifact {
            subject_id: subject_id.clone(),
            path,
            kind,
        })
    }
}

#[async_trait]
impl Processor for ArtifactProcessor {
    async fn process(&self, subject_id: &SubjectId) -> Result<ResultRef, ProcessFailure> {
        let artifact = self.resolve(subject_id).await?;

        let transcriber = self
            .transcribers
            .iter()
            .find(|t| t.supports(artifact.kind))
            .ok_or_else(|| ProcessError::ProviderNotConfigured(artifact.kind.to_string()))?;

        log::debug!(
            "Processing {} artifact '{}'",
            artifact.kind,
            artifact.subject_id
        );
        Ok(transcriber.transcribe(&artifact).await?)
    }
}
