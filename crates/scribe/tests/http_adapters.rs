//! HTTP adapters against a loopback server with canned responses.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{view, StubServer, TestHarness};
use scribe::error::{ExportError, ProcessError};
use scribe::export::{ExportRequest, Exporter, HttpExporter};
use scribe::jobs::{JobId, JobStatus, ResultRef, SubjectId};
use scribe::poller::{FetchError, HttpStatusSource, PollOutcome, StatusPoller, StatusSource};
use scribe::processor::remote::HttpTranscriber;
use scribe::processor::{Artifact, ArtifactKind, Transcriber};
use secrecy::SecretString;

const TIMEOUT: Duration = Duration::from_secs(5);

struct StatusCase {
    name: &'static str,
    status: u16,
    body: String,
    expect_not_found: bool,
}

#[tokio::test]
async fn test_status_source_error_mapping() {
    let cases = vec![
        StatusCase {
            name: "unknown job",
            status: 404,
            body: r#"{"detail":"not found"}"#.to_string(),
            expect_not_found: true,
        },
        StatusCase {
            name: "server error",
            status: 503,
            body: "{}".to_string(),
            expect_not_found: false,
        },
        StatusCase {
            name: "bad gateway",
            status: 502,
            body: "upstream down".to_string(),
            expect_not_found: false,
        },
        StatusCase {
            name: "unauthorized",
            status: 401,
            body: "{}".to_string(),
            expect_not_found: false,
        },
        StatusCase {
            name: "undecodable body",
            status: 200,
            body: r#"{"status":"weird"}"#.to_string(),
            expect_not_found: false,
        },
    ];

    for case in cases {
        let server = StubServer::start(case.status, case.body).await;
        let source = HttpStatusSource::new(&server.url, TIMEOUT).unwrap();

        let err = source.fetch(&JobId::from("j1")).await.unwrap_err();
        if case.expect_not_found {
            assert_eq!(err, FetchError::NotFound(JobId::from("j1")), "case: {}", case.name);
        } else {
            assert!(matches!(err, FetchError::Transient(_)), "case: {}: {:?}", case.name, err);
        }
    }
}

#[tokio::test]
async fn test_status_source_reads_view() {
    let job_id = JobId::from("j2");
    let body = serde_json::to_string(&view(&job_id, JobStatus::Completed)).unwrap();
    let server = StubServer::start(200, body).await;
    let source = HttpStatusSource::new(&format!("{}/api/", server.url), TIMEOUT).unwrap();

    let fetched = source.fetch(&job_id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Completed);
    assert_eq!(fetched.result_ref, Some(ResultRef::new("out-1")));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].head.starts_with("get /api/jobs/j2 "));
}

#[tokio::test]
async fn test_poller_keeps_going_through_server_errors() {
    let server = StubServer::start(500, "{}").await;
    let source = Arc::new(HttpStatusSource::new(&server.url, TIMEOUT).unwrap());

    let poller = StatusPoller::start(
        source,
        JobId::from("j3"),
        |view| panic!("no view expected, got {:?}", view.status),
        Duration::from_millis(10),
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.requests().len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!poller.is_finished());

    poller.stop();
    assert_eq!(poller.join().await, PollOutcome::Stopped);
    assert!(server.requests().len() >= 3);
}

#[tokio::test]
async fn test_transcriber_upload_and_response() {
    let harness = TestHarness::new();
    let path = harness.write_artifact("PT_Jane/raw_files/session.mp3", b"ID3audio");
    let server = StubServer::start(200, r#"{"resultRef":"transcripts/session.txt"}"#).await;
    let transcriber =
        HttpTranscriber::new(&server.url, SecretString::from("provider-key"), TIMEOUT).unwrap();

    let artifact = Artifact {
        subject_id: SubjectId::from("PT_Jane/raw_files/session.mp3"),
        path,
        kind: ArtifactKind::Audio,
    };
    let result = transcriber.transcribe(&artifact).await.unwrap();
    assert_eq!(result.as_str(), "transcripts/session.txt");

    let request = &server.requests()[0];
    assert_eq!(request.header("authorization").as_deref(), Some("bearer provider-key"));
    assert_eq!(request.header("content-type").as_deref(), Some("audio/mpeg"));
    assert_eq!(request.header("x-artifact-kind").as_deref(), Some("audio"));
    assert_eq!(request.body, b"ID3audio");
}

#[tokio::test]
async fn test_transcriber_non_success_is_upstream_status() {
    let harness = TestHarness::new();
    let path = harness.write_artifact("scan.png", b"\x89PNG");
    let long_error = "x".repeat(500);
    let server = StubServer::start(502, long_error).await;
    let transcriber =
        HttpTranscriber::new(&server.url, SecretString::from("k"), TIMEOUT).unwrap();

    let artifact = Artifact {
        subject_id: SubjectId::from("scan.png"),
        path,
        kind: ArtifactKind::Image,
    };
    let err = transcriber.transcribe(&artifact).await.unwrap_err();
    match &err {
        ProcessError::UpstreamStatus { status, message } => {
            assert_eq!(*status, 502);
            assert!(message.ends_with("(truncated)"));
        }
        other => panic!("expected UpstreamStatus, got {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_exporter_rejection_and_payload() {
    let server = StubServer::start(422, r#"{"error":"bad page"}"#).await;
    let exporter =
        HttpExporter::new(&server.url, SecretString::from("export-token"), TIMEOUT).unwrap();
    let request = ExportRequest {
        job_id: JobId::from("j4"),
        subject_id: SubjectId::from("a.txt"),
        result_ref: ResultRef::new("out/a.txt"),
    };

    let err = exporter.publish(&request).await.unwrap_err();
    match err {
        ExportError::Rejected { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, r#"{"error":"bad page"}"#);
        }
        other => panic!("expected Rejected, got {:?}", other),
    }

    let recorded = &server.requests()[0];
    assert_eq!(recorded.header("authorization").as_deref(), Some("bearer export-token"));
    let sent: ExportRequest = serde_json::from_slice(&recorded.body).unwrap();
    assert_eq!(sent, request);
}

#[tokio::test]
async fn test_exporter_accepts_success() {
    let server = StubServer::start(201, "{}").await;
    let exporter = HttpExporter::new(&server.url, SecretString::from("t"), TIMEOUT).unwrap();
    let request = ExportRequest {
        job_id: JobId::from("j5"),
        subject_id: SubjectId::from("b.txt"),
        result_ref: ResultRef::new("out/b.txt"),
    };

    exporter.publish(&request).await.unwrap();
    assert_eq!(server.requests().len(), 1);
}
