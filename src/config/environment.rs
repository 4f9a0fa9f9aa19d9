// ABOUTME: Environment-driven server configuration for the MCP OAuth gateway
// ABOUTME: Covers listener address, public base URL, token lifetimes and upstream flow limits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::{oauth, upstream};
use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Top-level gateway configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface the HTTP listener binds to
    pub host: String,
    /// HTTP listener port
    pub http_port: u16,
    /// Public base URL; also the issuer of minted tokens
    pub base_url: String,
    /// Namespace of dynamically registered clients
    pub namespace: String,
    /// Path of the platform login page
    pub login_path: String,
    /// Path shown after a standalone upstream login completes
    pub login_complete_path: String,
    /// Path of the composite server authorization page
    pub composite_auth_path: String,
    /// First-tier authorization server settings
    pub oauth: OAuthServerConfig,
    /// Upstream OAuth client settings
    pub upstream: UpstreamConfig,
}

/// First-tier authorization server lifetimes
#[derive(Debug, Clone)]
pub struct OAuthServerConfig {
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// One-time code lifetime in seconds
    pub auth_code_ttl_secs: i64,
    /// Age after which an unredeemed authorization request is swept
    pub auth_request_ttl_secs: i64,
    /// Refresh token lifetime in days
    pub refresh_token_ttl_days: i64,
    /// Client secret lifetime in seconds; rotation at half of it
    pub client_secret_lifetime_secs: i64,
    /// Registration access token lifetime in seconds; rotation at half of it
    pub registration_token_lifetime_secs: i64,
    /// bcrypt work factor for client secrets and registration tokens
    pub bcrypt_cost: u32,
}

/// Upstream OAuth client limits
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Lifetime of a pending upstream flow
    pub state_ttl: Duration,
    /// Maximum in-memory pending flows
    pub state_capacity: usize,
    /// Period of the expired-state sweep
    pub sweep_interval: Duration,
    /// Upper bound on waiting for an authorization URL
    pub auth_url_wait: Duration,
    /// Fallback client secrets keyed by upstream app id
    pub static_secrets: HashMap<String, String>,
}

impl Default for OAuthServerConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: oauth::DEFAULT_ACCESS_TOKEN_TTL_SECS,
            auth_code_ttl_secs: oauth::DEFAULT_AUTH_CODE_TTL_SECS,
            auth_request_ttl_secs: oauth::DEFAULT_AUTH_REQUEST_TTL_SECS,
            refresh_token_ttl_days: oauth::DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            client_secret_lifetime_secs: oauth::DEFAULT_CLIENT_SECRET_LIFETIME_SECS,
            registration_token_lifetime_secs: oauth::DEFAULT_REGISTRATION_TOKEN_LIFETIME_SECS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            state_ttl: Duration::from_secs(upstream::DEFAULT_STATE_TTL_SECS),
            state_capacity: upstream::DEFAULT_STATE_CAPACITY,
            sweep_interval: Duration::from_secs(upstream::DEFAULT_SWEEP_INTERVAL_SECS),
            auth_url_wait: Duration::from_millis(upstream::DEFAULT_AUTH_URL_WAIT_MS),
            static_secrets: HashMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            http_port: 8080,
            base_url: "http://localhost:8080".to_owned(),
            namespace: "default".to_owned(),
            login_path: "/login".to_owned(),
            login_complete_path: "/login_complete".to_owned(),
            composite_auth_path: "/mcp-composite".to_owned(),
            oauth: OAuthServerConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed
    pub fn from_env() -> AppResult<Self> {
        info!("Loading configuration from environment variables");
        let defaults = Self::default();

        let config = Self {
            host: env_var_or("HOST", &defaults.host),
            http_port: parse_env("HTTP_PORT", defaults.http_port)?,
            base_url: env_var_or("BASE_URL", &defaults.base_url)
                .trim_end_matches('/')
                .to_owned(),
            namespace: env_var_or("GATEWAY_NAMESPACE", &defaults.namespace),
            login_path: env_var_or("LOGIN_PATH", &defaults.login_path),
            login_complete_path: env_var_or("LOGIN_COMPLETE_PATH", &defaults.login_complete_path),
            composite_auth_path: env_var_or("COMPOSITE_AUTH_PATH", &defaults.composite_auth_path),
            oauth: OAuthServerConfig::from_env()?,
            upstream: UpstreamConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would mint unusable tokens
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid value
    pub fn validate(&self) -> AppResult<()> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(AppError::config(format!(
                "BASE_URL is not an absolute URL: {}",
                self.base_url
            )));
        }
        if self.oauth.access_token_ttl_secs <= 0 {
            return Err(AppError::config("ACCESS_TOKEN_TTL_SECS must be positive"));
        }
        if self.oauth.auth_request_ttl_secs <= 0 {
            return Err(AppError::config("AUTH_REQUEST_TTL_SECS must be positive"));
        }
        if self.oauth.client_secret_lifetime_secs <= 0
            || self.oauth.registration_token_lifetime_secs <= 0
        {
            return Err(AppError::config("secret lifetimes must be positive"));
        }
        if self.upstream.state_capacity == 0 {
            return Err(AppError::config("UPSTREAM_STATE_CAPACITY must be positive"));
        }
        Ok(())
    }

    /// Authorization endpoint for a target server
    #[must_use]
    pub fn authorize_url(&self, mcp_id: &str) -> String {
        format!("{}/oauth/authorize/{mcp_id}", self.base_url)
    }

    /// Token endpoint for a target server
    #[must_use]
    pub fn token_url(&self, mcp_id: &str) -> String {
        format!("{}/oauth/token/{mcp_id}", self.base_url)
    }

    /// Dynamic registration endpoint for a target server
    #[must_use]
    pub fn registration_url(&self, mcp_id: &str) -> String {
        format!("{}/oauth/register/{mcp_id}", self.base_url)
    }

    /// Public key set location
    #[must_use]
    pub fn jwks_url(&self) -> String {
        format!("{}/oauth/jwks.json", self.base_url)
    }

    /// Resource identifier (default audience) of a target server
    #[must_use]
    pub fn resource_url(&self, mcp_id: &str) -> String {
        format!("{}/mcp-connect/{mcp_id}", self.base_url)
    }

    /// Redirect URI registered with third-party providers
    #[must_use]
    pub fn upstream_redirect_uri(&self) -> String {
        format!("{}{}", self.base_url, upstream::CALLBACK_PATH)
    }

    /// Platform login page continuing to the given gateway path
    #[must_use]
    pub fn login_url(&self, continue_path: &str) -> String {
        format!(
            "{}{}?rd={}",
            self.base_url,
            self.login_path,
            urlencoding::encode(continue_path)
        )
    }

    /// Page shown after a standalone upstream login
    #[must_use]
    pub fn login_complete_url(&self) -> String {
        format!("{}{}", self.base_url, self.login_complete_path)
    }

    /// Composite authorization page for a pending first-tier request
    #[must_use]
    pub fn composite_auth_url(&self, mcp_id: &str, auth_request_id: &str) -> String {
        format!(
            "{}{}/{mcp_id}?oauth_auth_request={}",
            self.base_url,
            self.composite_auth_path,
            urlencoding::encode(auth_request_id)
        )
    }
}

impl OAuthServerConfig {
    fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            access_token_ttl_secs: parse_env("ACCESS_TOKEN_TTL_SECS", defaults.access_token_ttl_secs)?,
            auth_code_ttl_secs: parse_env("AUTH_CODE_TTL_SECS", defaults.auth_code_ttl_secs)?,
            auth_request_ttl_secs: parse_env(
                "AUTH_REQUEST_TTL_SECS",
                defaults.auth_request_ttl_secs,
            )?,
            refresh_token_ttl_days: parse_env(
                "REFRESH_TOKEN_TTL_DAYS",
                defaults.refresh_token_ttl_days,
            )?,
            client_secret_lifetime_secs: parse_env(
                "CLIENT_SECRET_LIFETIME_SECS",
                defaults.client_secret_lifetime_secs,
            )?,
            registration_token_lifetime_secs: parse_env(
                "REGISTRATION_TOKEN_LIFETIME_SECS",
                defaults.registration_token_lifetime_secs,
            )?,
            bcrypt_cost: parse_env("BCRYPT_COST", defaults.bcrypt_cost)?,
        })
    }
}

impl UpstreamConfig {
    fn from_env() -> AppResult<Self> {
        Ok(Self {
            state_ttl: Duration::from_secs(parse_env(
                "UPSTREAM_STATE_TTL_SECS",
                upstream::DEFAULT_STATE_TTL_SECS,
            )?),
            state_capacity: parse_env("UPSTREAM_STATE_CAPACITY", upstream::DEFAULT_STATE_CAPACITY)?,
            sweep_interval: Duration::from_secs(parse_env(
                "UPSTREAM_SWEEP_INTERVAL_SECS",
                upstream::DEFAULT_SWEEP_INTERVAL_SECS,
            )?),
            auth_url_wait: Duration::from_millis(parse_env(
                "UPSTREAM_AUTH_URL_WAIT_MS",
                upstream::DEFAULT_AUTH_URL_WAIT_MS,
            )?),
            static_secrets: parse_static_secrets(&env_var_or("UPSTREAM_STATIC_SECRETS", "")),
        })
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, falling back to a default when unset
fn parse_env<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse comma-separated `app_id=secret` pairs
fn parse_static_secrets(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(app, secret)| (app.trim().to_owned(), secret.trim().to_owned()))
        .filter(|(app, secret)| !app.is_empty() && !secret.is_empty())
        .collect()
}
