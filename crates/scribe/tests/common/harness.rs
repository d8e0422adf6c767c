//! Test harness for isolated test execution.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use scribe::db::Database;
use scribe::jobs::{JobId, JobProcessor, JobService, JobStatusView, JobStore};
use scribe::processor::Processor;

/// Isolated environment with artifacts, output and database paths.
pub struct TestHarness {
    temp_dir: TempDir,
    pub artifacts_dir: PathBuf,
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
    pub db: Database,
    pub store: JobStore,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let artifacts_dir = temp_dir.path().join("artifacts");
        let output_dir = temp_dir.path().join("output");
        let db_path = temp_dir.path().join("data").join("scribe.db");

        std::fs::create_dir_all(&artifacts_dir).expect("Failed to create artifacts dir");

        let db = Database::open(&db_path).expect("Failed to open database");
        let store = JobStore::new(db.clone());

        Self {
            temp_dir,
            artifacts_dir,
            output_dir,
            db_path,
            db,
            store,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes an artifact relative to the artifacts directory.
    pub fn write_artifact(&self, subject: &str, content: &[u8]) -> PathBuf {
        let path = self.artifacts_dir.join(subject);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create artifact dir");
        }
        std::fs::write(&path, content).expect("Failed to write artifact");
        path
    }

    /// A service over this harness's store with an injected processor.
    pub fn service(&self, processor: Arc<dyn Processor>) -> JobService {
        let runner = JobProcessor::new(self.store.clone(), processor)
            .with_timeout(Duration::from_secs(5));
        JobService::new(runner, 4)
    }

    /// Minimal valid configuration pointing at this harness.
    pub fn config_json(&self, extra: &str) -> String {
        let mut json = format!(
            r#"{{
                "version": "1.0",
                "artifacts_directory": {:?},
                "output_directory": {:?},
                "database_path": {:?}"#,
            self.artifacts_dir.to_string_lossy(),
            self.output_dir.to_string_lossy(),
            self.db_path.to_string_lossy(),
        );
        if !extra.is_empty() {
            json.push_str(",\n");
            json.push_str(extra);
        }
        json.push_str("\n}");
        json
    }
}

/// Polls the service directly until the job is terminal.
pub async fn wait_terminal(service: &JobService, job_id: &JobId) -> JobStatusView {
    for _ in 0..500 {
        let view = service.status(job_id).expect("status");
        if view.status.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Job {} did not reach a terminal state", job_id);
}
