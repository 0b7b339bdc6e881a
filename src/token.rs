//! OAuth client-credentials token cache
//!
//! Vendor APIs that require OAuth hand out short-lived bearer tokens for a
//! fixed key/secret pair. The cache holds a single token record and reuses
//! it until shortly before the provider-reported expiry; the slot mutex is
//! held across the exchange, so concurrent callers racing an expired token
//! wait for one refresh instead of issuing duplicates.

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::TripError;

/// Refresh this long before the provider-reported expiry.
const EXPIRY_SAFETY_MARGIN_MS: i64 = 60_000;

#[derive(Debug, Clone)]
struct TokenRecord {
    token: String,
    issued_at: i64,
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Single-slot cached bearer token with expiry-aware reuse.
pub struct TokenCache {
    http_client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    slot: Mutex<Option<TokenRecord>>,
}

impl TokenCache {
    pub fn new(
        http_client: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            slot: Mutex::new(None),
        }
    }

    /// Return a valid bearer token, refreshing via the client-credentials
    /// exchange when the cached one is absent or expired.
    pub async fn bearer(&self) -> Result<String, TripError> {
        let mut slot = self.slot.lock().await;
        let now = Utc::now().timestamp_millis();

        if let Some(record) = slot.as_ref() {
            if now < record.expires_at {
                debug!(age_ms = now - record.issued_at, "Reusing cached bearer token");
                return Ok(record.token.clone());
            }
        }

        let record = self.exchange(now).await?;
        let token = record.token.clone();
        *slot = Some(record);
        Ok(token)
    }

    async fn exchange(&self, now: i64) -> Result<TokenRecord, TripError> {
        info!(url = %self.token_url, "Requesting new access token");

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TripError::AuthError(format!("Token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token exchange rejected");
            return Err(TripError::AuthError(format!(
                "Token exchange failed with status {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TripError::AuthError(format!("Malformed token response: {}", e)))?;

        let expires_at = now + body.expires_in * 1000 - EXPIRY_SAFETY_MARGIN_MS;
        debug!(expires_in = body.expires_in, "Access token refreshed");

        Ok(TokenRecord {
            token: body.access_token,
            issued_at: now,
            expires_at,
        })
    }
}
