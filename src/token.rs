//! Access token resolution
//!
//! A run authenticates with the live session's provider token when the caller
//! has one. Otherwise the persisted token record is used, refreshed through the
//! OAuth token endpoint when it is about to expire.
//!
//! A failed refresh is not fatal: the stale token is returned and any
//! resulting auth failure surfaces from the provider call that uses it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, SyncError};
use crate::state::Store;

/// Short-lived credential for provider calls
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessCredential {
    /// A bare session token with no refresh material.
    pub fn session(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// True when the token expires within `window` of `now`. Tokens without an
    /// expiry never need refreshing.
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now <= window,
            None => false,
        }
    }
}

/// `now` plus a lifetime in seconds, or `None` when the sum leaves chrono's range.
pub fn expiry_after(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|lifetime| now.checked_add_signed(lifetime))
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Successful refresh-token exchange
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RefreshedToken {
    pub access_token: String,

    /// Absent when the provider keeps the previous refresh token valid.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Lifetime of the new access token in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// OAuth refresh-token exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ProviderError>;
}

/// Error body GitHub returns (with a 200 status) for a rejected exchange.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Success(RefreshedToken),
    Error(TokenErrorResponse),
}

/// GitHub's `login/oauth/access_token` endpoint
pub struct GitHubTokenEndpoint {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GitHubTokenEndpoint {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenEndpoint for GitHubTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ProviderError> {
        let body = serde_json::json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });

        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Malformed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        match response.json::<TokenResponse>().await? {
            TokenResponse::Success(token) => Ok(token),
            TokenResponse::Error(err) => Err(ProviderError::Malformed(format!(
                "{}: {}",
                err.error,
                err.error_description.unwrap_or_default()
            ))),
        }
    }
}

/// Stand-in when no OAuth client is configured; every refresh fails, so
/// expiring tokens are used as they are.
pub struct DisabledTokenEndpoint;

#[async_trait]
impl TokenEndpoint for DisabledTokenEndpoint {
    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, ProviderError> {
        Err(ProviderError::Malformed(
            "GitHub OAuth client credentials are not configured".to_string(),
        ))
    }
}

/// Resolves the credential a run authenticates with
#[derive(Clone)]
pub struct TokenSupplier {
    store: Arc<Store>,
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_window: Duration,
}

impl TokenSupplier {
    pub fn new(store: Arc<Store>, endpoint: Arc<dyn TokenEndpoint>, refresh_window: Duration) -> Self {
        Self {
            store,
            endpoint,
            refresh_window,
        }
    }

    /// Session token first, then the persisted record (refreshed if it is
    /// about to expire).
    pub async fn current_token(
        &self,
        user_id: &str,
        session_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AccessCredential, SyncError> {
        if let Some(token) = session_token.filter(|t| !t.is_empty()) {
            debug!("Using session provider token for {}", user_id);
            return Ok(AccessCredential::session(token));
        }

        let record = self
            .store
            .token_record(user_id)?
            .ok_or(SyncError::Unauthenticated)?;

        if !record.expires_within(now, self.refresh_window) {
            return Ok(record);
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            warn!("Stored token for {} is expiring and has no refresh token", user_id);
            return Ok(record);
        };

        match self.endpoint.refresh(&refresh_token).await {
            Ok(refreshed) => {
                let expires_at = match refreshed.expires_in {
                    Some(secs) => match expiry_after(now, secs) {
                        Some(at) => Some(at),
                        None => {
                            warn!(
                                "Token refresh for {} returned an out-of-range expires_in ({}), using stored token",
                                user_id, secs
                            );
                            return Ok(record);
                        }
                    },
                    None => None,
                };
                let credential = AccessCredential {
                    access_token: refreshed.access_token,
                    refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
                    expires_at,
                };
                self.store.save_token(user_id, &credential)?;
                info!("Refreshed GitHub token for {}", user_id);
                Ok(credential)
            }
            Err(e) => {
                warn!("Token refresh failed for {}, using stored token: {}", user_id, e);
                Ok(record)
            }
        }
    }
}
