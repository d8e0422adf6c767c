use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::jobs::{ResultRef, SubjectId};
use crate::processor::{Artifact, ArtifactKind, Transcriber};

/// Cleans typed notes locally and writes the result to the output
/// directory. The output path is the job's result reference.
pub struct TextCleaner {
    output_dir: PathBuf,
}

impl TextCleaner {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn output_path(&self, subject_id: &SubjectId) -> PathBuf {
        let stem = Path::new(subject_id.as_str())
            .with_extension("")
            .to_string_lossy()
            .replace(['/', '\\'], "__");
        self.output_dir.join(format!("{}.txt", stem))
    }
}

#[async_trait]
impl Transcriber for TextCleaner {
    async fn transcribe(&self, artifact: &Artifact) -> Result<ResultRef, ProcessError> {
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| ProcessError::ReadArtifact {
                path: artifact.path.clone(),
                source: e,
            })?;

        let text = String::from_utf8(bytes)
            .map_err(|_| ProcessError::InvalidEncoding(artifact.path.clone()))?;

        let cleaned = clean_text(&text);
        if cleaned.is_empty() {
            return Err(ProcessError::EmptyOutput(artifact.path.clone()));
        }

        let out = self.output_path(&artifact.subject_id);
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ProcessError::WriteResult {
                path: self.output_dir.clone(),
                source: e,
            })?;
        tokio::fs::write(&out, cleaned.as_bytes())
            .await
            .map_err(|e| ProcessError::WriteResult {
                path: out.clone(),
                source: e,
            })?;

        log::info!(
            "Cleaned text for '{}': {} characters",
            artifact.subject_id,
            cleaned.len()
        );
        Ok(ResultRef::new(out.to_string_lossy().into_owned()))
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        matches!(kind, ArtifactKind::Text)
    }
}

/// Normalizes line endings, strips trailing whitespace, and collapses runs
/// of blank lines. Returns an empty string for whitespace-only input.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = false;

    for line in text.lines().map(str::trim_end) {
        if line.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if blank_run {
            out.push('\n');
            blank_run = false;
        }
        out.push_str(line);
        out.push('\n');
    }

    out
}
