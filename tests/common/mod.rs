//! Common test utilities for falcon-image-export integration tests

#![allow(dead_code)]

use falcon_image_export::{ClientCredentials, Config, Exporter, PartitionKey};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/oauth2/token";
pub const EXPORTS_PATH: &str = "/container-security/entities/exports/v1";
pub const FILES_PATH: &str = "/container-security/entities/exports/files/v1";

/// Mocked export platform: token endpoint plus per-partition jobs
pub struct MockPlatform {
    pub server: MockServer,
}

impl MockPlatform {
    /// Platform that grants a token to any client
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "access_token": "integration-token",
                "token_type": "bearer",
                "expires_in": 1799
            })))
            .mount(&server)
            .await;
        Self { server }
    }

    /// Platform whose token endpoint rejects every client
    pub async fn rejecting() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "errors": [{"code": 401, "message": "access denied, invalid client"}]
            })))
            .mount(&server)
            .await;
        Self { server }
    }

    /// Partition `key` creates `job_id`, which is done and returns `payload`
    pub async fn job(&self, key: &str, job_id: &str, payload: Value) {
        self.submissions(key)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [job_id],
                "errors": []
            })))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(EXPORTS_PATH))
            .and(query_param("ids", job_id))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{"id": job_id, "status": "DONE"}]
            })))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(FILES_PATH))
            .and(query_param("id", job_id))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload))
            .mount(&self.server)
            .await;
    }

    /// The next `times` submissions for `key` hit the in-progress quota
    ///
    /// Must be called before [`job`](Self::job) for the same key.
    pub async fn quota(&self, key: &str, times: u64) {
        self.submissions(key)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": null,
                "errors": [{"code": 429, "message": "Quota of 1 job(s) in-progress reached"}]
            })))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// The next `times` status checks for `job_id` report PENDING
    ///
    /// Must be called before [`job`](Self::job) for the same job.
    pub async fn pending(&self, job_id: &str, times: u64) {
        Mock::given(method("GET"))
            .and(path(EXPORTS_PATH))
            .and(query_param("ids", job_id))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{"id": job_id, "status": "PENDING"}]
            })))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// The next download of `job_id` is answered 401
    ///
    /// Must be called before [`job`](Self::job) for the same job.
    pub async fn unauthorized_once(&self, job_id: &str) {
        Mock::given(method("GET"))
            .and(path(FILES_PATH))
            .and(query_param("id", job_id))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Requests received with `http_method` on `request_path`
    pub async fn request_count(&self, http_method: &str, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
            .count()
    }

    /// Every submission for `key` is rejected outright
    pub async fn reject(&self, key: &str, status: u16) {
        self.submissions(key)
            .respond_with(ResponseTemplate::new(status).set_body_string("rejected"))
            .mount(&self.server)
            .await;
    }

    /// Exporter with every wait shrunk to a millisecond
    pub fn exporter(&self) -> Exporter {
        Exporter::new(
            fast_config(&self.server.uri()),
            ClientCredentials::new("client", "secret"),
        )
        .unwrap()
    }

    /// Submissions received for `key`
    pub async fn submission_count(&self, key: &str) -> usize {
        let needle = digest_filter(key);
        self.server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| {
                r.method.as_str() == "POST"
                    && r.url.path() == EXPORTS_PATH
                    && String::from_utf8_lossy(&r.body).contains(&needle)
            })
            .count()
    }

    fn submissions(&self, key: &str) -> wiremock::MockBuilder {
        Mock::given(method("POST"))
            .and(path(EXPORTS_PATH))
            .and(body_string_contains(digest_filter(key)))
    }
}

fn digest_filter(key: &str) -> String {
    format!("image_digest:*'{key}*'")
}

pub fn fast_config(base_url: &str) -> Config {
    let tick = Duration::from_millis(1);
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.polling.poll_interval = tick;
    config.polling.retry_interval = tick;
    config.retry.settle_delay = tick;
    config.retry.retry_delay = tick;
    config.retry.quota_backoff = tick;
    config.retry.partition_pause = tick;
    config
}

pub fn keys(keys: &[&str]) -> Vec<PartitionKey> {
    keys.iter().map(|k| PartitionKey::new(*k).unwrap()).collect()
}

/// Live API credentials from the environment or a .env file
pub fn live_credentials() -> Option<(ClientCredentials, Option<String>)> {
    dotenvy::dotenv().ok();

    let client_id = std::env::var("FALCON_CLIENT_ID").ok()?;
    let client_secret = std::env::var("FALCON_CLIENT_SECRET").ok()?;
    let base_url = std::env::var("FALCON_BASE_URL").ok();
    Some((ClientCredentials::new(client_id, client_secret), base_url))
}
