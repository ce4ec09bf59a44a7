use super::test_helpers::*;
use super::*;
use crate::error::{DownloadError, PollError, SubmissionError};
use crate::types::{Event, JobId, JobStatus};
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod orchestrate;

/// Everything buffered on `rx` so far
fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn new_rejects_invalid_base_url() {
    let config = fast_config("not a url");
    let result = Exporter::new(config, ClientCredentials::new("id", "secret"));
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn endpoints_are_joined_onto_base_url() {
    let exporter = exporter_with(fast_config("https://api.example.test"));
    assert_eq!(
        exporter.endpoints.exports.as_str(),
        "https://api.example.test/container-security/entities/exports/v1"
    );
    assert_eq!(
        exporter.endpoints.files.as_str(),
        "https://api.example.test/container-security/entities/exports/files/v1"
    );
}

#[tokio::test]
async fn requests_carry_bearer_token() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(EXPORTS_PATH))
        .and(header("authorization", "Bearer tok-1"))
        .and(header("accept", "application/json"))
        .respond_with(job_status("DONE"))
        .expect(1)
        .mount(&server)
        .await;

    let exporter = test_exporter(&server);
    assert_eq!(
        exporter.job_status(&JobId::new("J1")).await.unwrap(),
        JobStatus::Done
    );
}
