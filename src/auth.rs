//! Bearer credential management
//!
//! The [`CredentialManager`] owns the only copy of the current token. Request
//! builders never keep a token across a wait: they ask the manager for a valid
//! credential right before sending, which renews it when the margin-adjusted
//! expiry has passed. A 401 from the platform triggers [`CredentialManager::force_refresh`].

use crate::config::{AuthConfig, ClientCredentials};
use crate::error::AuthError;
use crate::types::{Event, RefreshReason};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use url::Url;

/// A bearer token and the instant after which it must not be sent
///
/// Replaced wholesale on refresh, never mutated.
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: Instant,
}

impl Credential {
    /// Create a credential expiring at `expires_at`
    pub fn new(token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Bearer token text
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Instant after which the token is considered expired
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the token may still be sent at `now` (expiry strictly in the future)
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Whether the token may still be sent right now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Owns the client credentials and the current bearer token
pub struct CredentialManager {
    http: reqwest::Client,
    token_url: Url,
    credentials: ClientCredentials,
    config: AuthConfig,
    current: Mutex<Option<Credential>>,
    event_tx: broadcast::Sender<Event>,
}

impl CredentialManager {
    /// Create a manager that requests tokens from `token_url`
    ///
    /// No request is made until [`authenticate`](Self::authenticate) or
    /// [`ensure_valid`](Self::ensure_valid) is called.
    pub fn new(
        http: reqwest::Client,
        token_url: Url,
        credentials: ClientCredentials,
        config: AuthConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            http,
            token_url,
            credentials,
            config,
            current: Mutex::new(None),
            event_tx,
        }
    }

    /// Request a new token and make it the current credential
    pub async fn authenticate(&self) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        let credential = self.request_token().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Return the current credential, renewing it first if it has expired
    pub async fn ensure_valid(&self) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref().filter(|c| c.is_valid()) {
            return Ok(credential.clone());
        }

        if current.is_some() {
            debug!("bearer token expired, renewing");
            self.event_tx
                .send(Event::TokenRefreshing {
                    reason: RefreshReason::Expired,
                })
                .ok();
        }

        let credential = self.request_token().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Replace the current credential after the platform rejected it
    pub async fn force_refresh(&self) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        warn!("bearer token rejected, renewing");
        self.event_tx
            .send(Event::TokenRefreshing {
                reason: RefreshReason::Rejected,
            })
            .ok();

        // Drop the rejected token even if renewal fails
        *current = None;
        let credential = self.request_token().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Current credential without renewal, if one is held
    pub async fn current(&self) -> Option<Credential> {
        self.current.lock().await.clone()
    }

    async fn request_token(&self) -> Result<Credential, AuthError> {
        self.event_tx.send(Event::Authenticating).ok();

        let result = self.exchange().await;
        match &result {
            Ok(credential) => {
                let valid_for = credential
                    .expires_at()
                    .saturating_duration_since(Instant::now());
                info!(
                    valid_for_secs = valid_for.as_secs(),
                    "authentication successful"
                );
                self.event_tx
                    .send(Event::Authenticated {
                        valid_for_secs: valid_for.as_secs(),
                    })
                    .ok();
            }
            Err(e) => {
                warn!(error = %e, "authentication failed");
                self.event_tx
                    .send(Event::AuthFailed {
                        error: e.to_string(),
                    })
                    .ok();
            }
        }
        result
    }

    async fn exchange(&self) -> Result<Credential, AuthError> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "token endpoint rejected request");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let granted_at = Instant::now();
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_lifetime);
        let usable = lifetime.saturating_sub(self.config.safety_margin);

        let expires_at = granted_at.checked_add(usable).ok_or_else(|| {
            AuthError::InvalidResponse(format!("expires_in out of range: {}", lifetime.as_secs()))
        })?;

        Ok(Credential::new(token.access_token, expires_at))
    }
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("token_url", &self.token_url.as_str())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
