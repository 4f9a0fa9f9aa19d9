// ABOUTME: OAuth2 client used against third-party authorization servers fronting MCP servers
// ABOUTME: Builds PKCE authorization URLs and performs the authorization-code exchange
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration as StdDuration;
use url::Url;

use crate::constants::{oauth, upstream};
use crate::errors::{AppError, AppResult};

/// Length of generated PKCE verifiers
const CODE_VERIFIER_LENGTH: usize = 64;

/// Fallback lifetime when a provider omits `expires_in`
const DEFAULT_TOKEN_EXPIRY_SECONDS: i64 = 3600;

/// OAuth 2.0 client configuration
///
/// The secret is never serialized, so the configuration can be mirrored into
/// durable storage and the secret looked up again on recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Config {
    /// OAuth client ID from provider
    pub client_id: String,
    /// OAuth client secret from provider
    #[serde(default, skip_serializing)]
    pub client_secret: String,
    /// Authorization endpoint URL
    pub auth_url: String,
    /// Token endpoint URL
    pub token_url: String,
    /// Redirect URI for OAuth callbacks
    pub redirect_uri: String,
    /// OAuth scopes to request
    pub scopes: Vec<String>,
    /// Whether to use PKCE
    pub use_pkce: bool,
}

/// `PKCE` (Proof Key for Code Exchange) parameters
#[derive(Debug, Clone)]
pub struct PkceParams {
    /// Randomly generated code verifier (43-128 characters)
    pub code_verifier: String,
    /// SHA256 hash of code verifier, base64url encoded
    pub code_challenge: String,
    /// Challenge method (always "S256")
    pub code_challenge_method: String,
}

impl PkceParams {
    /// Generate `PKCE` parameters with `S256` challenge method
    #[must_use]
    pub fn generate() -> Self {
        const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
        let mut rng = rand::thread_rng();
        let code_verifier: String = (0..CODE_VERIFIER_LENGTH)
            .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
            .collect();
        Self::from_verifier(code_verifier)
    }

    /// Rebuild parameters from a stored verifier
    #[must_use]
    pub fn from_verifier(code_verifier: String) -> Self {
        let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));
        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: oauth::PKCE_METHOD_S256.into(),
        }
    }
}

/// OAuth 2.0 access token with expiration and refresh capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    /// The access token string
    pub access_token: String,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// Expiration timestamp (UTC)
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional refresh token for getting new access tokens
    pub refresh_token: Option<String>,
    /// Granted OAuth scopes
    pub scope: Option<String>,
}

impl OAuth2Token {
    /// Check if the token is expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now())
    }
}

/// OAuth 2.0 token response from provider
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

/// HTTP client for outbound OAuth and discovery calls
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized
pub fn oauth_http_client() -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(StdDuration::from_secs(upstream::HTTP_TIMEOUT_SECS))
        .connect_timeout(StdDuration::from_secs(5))
        .build()
        .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))
}

/// OAuth 2.0 client for a third-party authorization server
pub struct OAuth2Client {
    config: OAuth2Config,
    client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a client with the given configuration and HTTP client
    #[must_use]
    pub const fn new(config: OAuth2Config, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Get the `OAuth2` configuration
    #[must_use]
    pub const fn config(&self) -> &OAuth2Config {
        &self.config
    }

    /// Get authorization `URL` with `PKCE` support
    ///
    /// # Errors
    ///
    /// Returns an error if the authorization URL is malformed
    pub fn get_authorization_url_with_pkce(
        &self,
        state: &str,
        pkce: &PkceParams,
    ) -> AppResult<String> {
        let mut url = Url::parse(&self.config.auth_url).map_err(|e| {
            AppError::invalid_input(format!("Invalid auth URL {}: {e}", self.config.auth_url))
        })?;

        let mut query_pairs = url.query_pairs_mut();
        query_pairs
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", oauth::RESPONSE_TYPE_CODE)
            .append_pair("state", state);
        if !self.config.scopes.is_empty() {
            query_pairs.append_pair("scope", &self.config.scopes.join(" "));
        }

        if self.config.use_pkce {
            query_pairs
                .append_pair("code_challenge", &pkce.code_challenge)
                .append_pair("code_challenge_method", &pkce.code_challenge_method);
        }

        drop(query_pairs);
        Ok(url.to_string())
    }

    /// Exchange authorization code with `PKCE` support
    ///
    /// # Errors
    ///
    /// Returns an error if the token exchange request fails or response is invalid
    pub async fn exchange_code_with_pkce(
        &self,
        code: &str,
        pkce: &PkceParams,
    ) -> AppResult<OAuth2Token> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("grant_type", oauth::GRANT_AUTHORIZATION_CODE),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if !self.config.client_secret.is_empty() {
            params.push(("client_secret", self.config.client_secret.as_str()));
        }
        if self.config.use_pkce {
            params.push(("code_verifier", &pkce.code_verifier));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                AppError::external_service("token endpoint", e.to_string()).with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::external_auth_failed(format!(
                "Token exchange failed with status {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::external_service("token endpoint", format!("Invalid token response: {e}"))
        })?;
        Ok(Self::token_from_response(token))
    }

    fn token_from_response(response: TokenResponse) -> OAuth2Token {
        let expires_at = response.expires_in.map(|seconds| {
            Utc::now()
                + Duration::seconds(i64::try_from(seconds).unwrap_or(DEFAULT_TOKEN_EXPIRY_SECONDS))
        });

        OAuth2Token {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at,
            refresh_token: response.refresh_token,
            scope: response.scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuth2Config {
        OAuth2Config {
            client_id: "cid".to_owned(),
            client_secret: "shh".to_owned(),
            auth_url: "https://auth.example.com/authorize".to_owned(),
            token_url: "https://auth.example.com/token".to_owned(),
            redirect_uri: "https://gw.example.com/oauth/mcp/callback".to_owned(),
            scopes: vec!["repo".to_owned(), "read:user".to_owned()],
            use_pkce: true,
        }
    }

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let pkce = PkceParams::generate();
        assert_eq!(pkce.code_verifier.len(), CODE_VERIFIER_LENGTH);
        let rebuilt = PkceParams::from_verifier(pkce.code_verifier.clone());
        assert_eq!(rebuilt.code_challenge, pkce.code_challenge);
        assert_eq!(pkce.code_challenge_method, "S256");
    }

    #[test]
    fn test_authorization_url_contains_pkce() {
        let client = OAuth2Client::new(config(), reqwest::Client::new());
        let pkce = PkceParams::generate();
        let url = Url::parse(&client.get_authorization_url_with_pkce("st", &pkce).unwrap()).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "st");
        assert_eq!(pairs["scope"], "repo read:user");
        assert_eq!(pairs["code_challenge"], pkce.code_challenge);
        assert_eq!(pairs["response_type"], "code");
    }

    #[test]
    fn test_secret_is_not_serialized() {
        let json = serde_json::to_value(config()).unwrap();
        assert!(json.get("client_secret").is_none());
        let restored: OAuth2Config = serde_json::from_value(json).unwrap();
        assert!(restored.client_secret.is_empty());
    }
}
