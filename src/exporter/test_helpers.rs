//! Shared test helpers for driving an Exporter against a wiremock server.

use crate::config::{ClientCredentials, Config};
use crate::exporter::Exporter;
use crate::types::PartitionKey;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) use super::EXPORT_FILES_PATH as FILES_PATH;
pub(crate) use super::{EXPORTS_PATH, TOKEN_PATH};

/// Default config pointed at `base_url` with every wait shrunk to a millisecond
pub(crate) fn fast_config(base_url: &str) -> Config {
    let tick = Duration::from_millis(1);
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.request_timeout = Duration::from_secs(5);
    config.polling.poll_interval = tick;
    config.polling.retry_interval = tick;
    config.retry.settle_delay = tick;
    config.retry.retry_delay = tick;
    config.retry.quota_backoff = tick;
    config.retry.partition_pause = tick;
    config
}

/// Exporter for `server` using [`fast_config`]
pub(crate) fn test_exporter(server: &MockServer) -> Exporter {
    exporter_with(fast_config(&server.uri()))
}

pub(crate) fn exporter_with(config: Config) -> Exporter {
    Exporter::new(config, ClientCredentials::new("client", "secret")).unwrap()
}

pub(crate) fn partitions(keys: &[&str]) -> Vec<PartitionKey> {
    keys.iter().map(|k| PartitionKey::new(*k).unwrap()).collect()
}

/// Token endpoint granting `token` for half an hour
pub(crate) async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response(token))
        .mount(server)
        .await;
}

pub(crate) fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 1799
    }))
}

/// Job creation answer carrying `job_id`
pub(crate) fn job_created(job_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "meta": {},
        "resources": [job_id],
        "errors": []
    }))
}

/// Job creation answer reporting the in-progress quota
pub(crate) fn quota_reached() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "meta": {},
        "resources": null,
        "errors": [{"code": 429, "message": "Quota of 1 job(s) in-progress reached"}]
    }))
}

pub(crate) fn job_status(status: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "resources": [{"id": "job", "status": status}]
    }))
}

/// Every status lookup for `job_id` reports `status`
pub(crate) async fn mount_status(server: &MockServer, job_id: &str, status: &str) {
    Mock::given(method("GET"))
        .and(path(EXPORTS_PATH))
        .and(query_param("ids", job_id))
        .respond_with(job_status(status))
        .mount(server)
        .await;
}

/// Every download of `job_id` returns `payload`
pub(crate) async fn mount_download(server: &MockServer, job_id: &str, payload: Value) {
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .and(query_param("id", job_id))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload))
        .mount(server)
        .await;
}

/// Number of received requests with `http_method` on `request_path`
pub(crate) async fn count_requests(server: &MockServer, http_method: &str, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
        .count()
}
