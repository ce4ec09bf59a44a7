//! Export-job orchestration split into focused submodules.
//!
//! The `Exporter` struct and its methods are organized by stage:
//! - [`submit`] - Export job creation and response classification
//! - [`poll`] - Job status lookups
//! - [`fetch`] - Bounded poll/download loop
//! - [`orchestrate`] - Partition loop, retry policy and result merging

mod fetch;
mod orchestrate;
mod poll;
mod submit;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::auth::CredentialManager;
use crate::config::{ClientCredentials, Config};
use crate::error::{AuthError, Error, Result};
use crate::types::Event;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub(crate) const TOKEN_PATH: &str = "/oauth2/token";
pub(crate) const EXPORTS_PATH: &str = "/container-security/entities/exports/v1";
pub(crate) const EXPORT_FILES_PATH: &str = "/container-security/entities/exports/files/v1";

/// Resolved endpoint URLs
#[derive(Clone, Debug)]
pub(crate) struct Endpoints {
    /// Job creation (POST) and status (GET)
    pub(crate) exports: Url,
    /// Result download (GET)
    pub(crate) files: Url,
}

/// Export client (cloneable - all shared state is Arc-wrapped)
///
/// Processes partitions one at a time: the platform allows a single in-flight
/// export job per account, so nothing here runs jobs concurrently.
#[derive(Clone)]
pub struct Exporter {
    /// Configuration (wrapped in Arc for sharing)
    pub(crate) config: Arc<Config>,
    /// HTTP client shared by every request, including token requests
    pub(crate) http: reqwest::Client,
    /// Endpoint URLs derived from the configured base URL
    pub(crate) endpoints: Endpoints,
    /// Bearer credential owner, consulted before every request
    pub(crate) credentials: Arc<CredentialManager>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl Exporter {
    /// Create a new Exporter
    ///
    /// Validates the configuration and builds the HTTP client. No request is
    /// made until [`run`](Self::run) (or one of the stage methods) is called.
    pub fn new(config: Config, credentials: ClientCredentials) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url()?;
        let join = |path: &str| {
            base_url.join(path).map_err(|e| Error::Config {
                message: format!("cannot build endpoint '{}': {}", path, e),
                key: Some("api.base_url".to_string()),
            })
        };
        let token_url = join(TOKEN_PATH)?;
        let endpoints = Endpoints {
            exports: join(EXPORTS_PATH)?,
            files: join(EXPORT_FILES_PATH)?,
        };

        let http = reqwest::Client::builder()
            .timeout(config.api.request_timeout)
            .user_agent(config.api.user_agent.clone())
            .build()?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let credentials = Arc::new(CredentialManager::new(
            http.clone(),
            token_url,
            credentials,
            config.auth.clone(),
            event_tx.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            http,
            endpoints,
            credentials,
            event_tx,
        })
    }

    /// Subscribe to run events
    ///
    /// Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Credential manager used for every request
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is not an error
        self.event_tx.send(event).ok();
    }

    /// Attach a freshly validated bearer credential to `request`
    pub(crate) async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::RequestBuilder, AuthError> {
        let credential = self.credentials.ensure_valid().await?;
        Ok(request
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .header(reqwest::header::ACCEPT, "application/json"))
    }
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
