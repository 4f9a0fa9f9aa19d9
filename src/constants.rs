// ABOUTME: Gateway-wide constants for OAuth protocol values, lifetimes and vault contexts
// ABOUTME: Defaults here are overridable through environment configuration where noted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Constants Module
//!
//! Protocol constants advertised in the discovery documents and the default
//! values used by [`crate::config::ServerConfig`].

/// First-tier OAuth 2.0 protocol values advertised by the gateway
pub mod oauth {
    /// Only the authorization code flow is supported
    pub const RESPONSE_TYPE_CODE: &str = "code";

    /// Authorization code grant
    pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

    /// Refresh token grant
    pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

    /// HTTP Basic client authentication
    pub const AUTH_METHOD_CLIENT_SECRET_BASIC: &str = "client_secret_basic";

    /// Form body client authentication
    pub const AUTH_METHOD_CLIENT_SECRET_POST: &str = "client_secret_post";

    /// Public clients (PKCE required)
    pub const AUTH_METHOD_NONE: &str = "none";

    /// PKCE SHA-256 transform
    pub const PKCE_METHOD_S256: &str = "S256";

    /// PKCE plain transform
    pub const PKCE_METHOD_PLAIN: &str = "plain";

    /// Response types the server supports
    pub const SUPPORTED_RESPONSE_TYPES: &[&str] = &[RESPONSE_TYPE_CODE];

    /// Grant types the server supports
    pub const SUPPORTED_GRANT_TYPES: &[&str] = &[GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN];

    /// Token endpoint authentication methods the server supports
    pub const SUPPORTED_AUTH_METHODS: &[&str] = &[
        AUTH_METHOD_CLIENT_SECRET_BASIC,
        AUTH_METHOD_CLIENT_SECRET_POST,
        AUTH_METHOD_NONE,
    ];

    /// PKCE challenge methods the server supports
    pub const SUPPORTED_PKCE_METHODS: &[&str] = &[PKCE_METHOD_S256, PKCE_METHOD_PLAIN];

    /// Token type returned by the token endpoint
    pub const TOKEN_TYPE_BEARER: &str = "bearer";

    /// Access token lifetime (10 minutes)
    pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 600;

    /// One-time code lifetime
    pub const DEFAULT_AUTH_CODE_TTL_SECS: i64 = 600;

    /// Unredeemed authorization request lifetime (login plus upstream legs)
    pub const DEFAULT_AUTH_REQUEST_TTL_SECS: i64 = 60 * 60;

    /// Refresh token lifetime
    pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 30;

    /// Client secret lifetime (7 days)
    pub const DEFAULT_CLIENT_SECRET_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

    /// Registration access token lifetime (7 days)
    pub const DEFAULT_REGISTRATION_TOKEN_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

    /// Random bytes in a generated client secret, registration token or refresh token
    pub const SECRET_BYTES: usize = 32;

    /// Random bytes in a generated one-time authorization code
    pub const AUTH_CODE_BYTES: usize = 32;

    /// Prefix of generated client names
    pub const CLIENT_NAME_PREFIX: &str = "mcp_client_";

    /// Cookie carrying a gateway-issued user token for browser legs
    pub const SESSION_COOKIE: &str = "gateway_token";
}

/// Upstream (outbound) OAuth client defaults
pub mod upstream {
    /// Correlation state lifetime
    pub const DEFAULT_STATE_TTL_SECS: u64 = 600;

    /// Maximum in-memory correlation entries
    pub const DEFAULT_STATE_CAPACITY: usize = 1024;

    /// Background sweep period for expired flows, requests and refresh tokens
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

    /// Upper bound on waiting for a computed authorization URL
    pub const DEFAULT_AUTH_URL_WAIT_MS: u64 = 5000;

    /// Gateway path the third-party provider redirects back to
    pub const CALLBACK_PATH: &str = "/oauth/mcp/callback";

    /// Outbound HTTP timeout for discovery and token exchange
    pub const HTTP_TIMEOUT_SECS: u64 = 30;
}

/// Credential vault contexts and names
pub mod vault {
    /// Context holding the token signing key
    pub const SIGNING_KEY_CONTEXT: &str = "mcp-oauth-gateway-signing-key";

    /// Credential name of the token signing key
    pub const SIGNING_KEY_NAME: &str = "signing-key";

    /// Context prefix for PKCE verifiers of upstream flows
    pub const UPSTREAM_STATE_CONTEXT_PREFIX: &str = "upstream-oauth-state-";

    /// Credential name of an upstream PKCE verifier
    pub const UPSTREAM_VERIFIER_NAME: &str = "pkce-verifier";

    /// Context prefix for upstream tokens (followed by user and server ids)
    pub const UPSTREAM_TOKEN_CONTEXT_PREFIX: &str = "upstream-oauth-token-";

    /// Credential name of a stored upstream token
    pub const UPSTREAM_TOKEN_NAME: &str = "token";

    /// Context prefix for upstream OAuth app secrets
    pub const UPSTREAM_APP_CONTEXT_PREFIX: &str = "upstream-oauth-app-";

    /// Credential name of an upstream OAuth app secret
    pub const UPSTREAM_APP_SECRET_NAME: &str = "client-secret";
}

/// Service identification used in logs
pub mod service_names {
    /// Default service name
    pub const MCP_OAUTH_GATEWAY: &str = "mcp-oauth-gateway";
}
