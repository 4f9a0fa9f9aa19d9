// ABOUTME: Token issuer minting and verifying EdDSA-signed gateway tokens
// ABOUTME: Maps bearer tokens and session cookies to internal identities
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Token Issuer
//!
//! Access tokens are compact JWTs signed with the gateway's Ed25519 key and
//! issued by the platform base URL. Two kinds exist, told apart by the
//! `token_type` claim: narrowly scoped `run` tokens and general `user`
//! tokens that carry the auth-provider correlation fields.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, errors::ErrorKind, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::constants::oauth::SESSION_COOKIE;
use crate::crypto::JwksManager;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::{AuthProviderRef, User};

/// User id of the anonymous bootstrap identity
pub const BOOTSTRAP_USER_ID: &str = "bootstrap";

/// Group carried by run identities
pub const RUN_GROUP: &str = "system:run";

/// Token-kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Authenticated platform user
    User,
    /// Identity of a single agent run
    Run,
}

/// Claims carried by gateway-issued tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Audience (requested resource)
    pub aud: String,
    /// Issued at
    pub iat: i64,
    /// Expiry
    pub exp: i64,
    /// Issuer (platform base URL)
    pub iss: String,
    /// Subject (user id)
    pub sub: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Comma-joined group list
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub groups: String,
    /// Auth provider name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider_name: Option<String>,
    /// Auth provider namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider_namespace: Option<String>,
    /// User id at the auth provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider_user_id: Option<String>,
    /// Target resource id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_id: Option<String>,
    /// Free-form scope string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Token kind
    pub token_type: TokenKind,
    /// Run id (run tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Thread id (run tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Agent id (run tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl TokenClaims {
    /// User token claims; timestamps and issuer are set when minted
    #[must_use]
    pub fn for_user(user: &User, audience: impl Into<String>) -> Self {
        let provider = user.auth_provider.as_ref();
        Self {
            aud: audience.into(),
            iat: 0,
            exp: 0,
            iss: String::new(),
            sub: user.id.clone(),
            name: user
                .display_name
                .clone()
                .or_else(|| Some(user.username.clone())),
            email: user.email.clone(),
            picture: user.picture.clone(),
            groups: user.groups.join(","),
            auth_provider_name: provider.map(|p| p.name.clone()),
            auth_provider_namespace: provider.map(|p| p.namespace.clone()),
            auth_provider_user_id: provider.map(|p| p.user_id.clone()),
            mcp_id: None,
            scope: None,
            token_type: TokenKind::User,
            run_id: None,
            thread_id: None,
            agent_id: None,
        }
    }

    /// Run token claims
    #[must_use]
    pub fn for_run(
        run_id: impl Into<String>,
        thread_id: impl Into<String>,
        agent_id: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        let run_id = run_id.into();
        Self {
            aud: audience.into(),
            iat: 0,
            exp: 0,
            iss: String::new(),
            sub: format!("run:{run_id}"),
            name: None,
            email: None,
            picture: None,
            groups: RUN_GROUP.to_owned(),
            auth_provider_name: None,
            auth_provider_namespace: None,
            auth_provider_user_id: None,
            mcp_id: None,
            scope: None,
            token_type: TokenKind::Run,
            run_id: Some(run_id),
            thread_id: Some(thread_id.into()),
            agent_id: Some(agent_id.into()),
        }
    }

    /// Auth provider reference, when all three fields are present
    #[must_use]
    pub fn auth_provider(&self) -> Option<AuthProviderRef> {
        Some(AuthProviderRef {
            namespace: self.auth_provider_namespace.clone()?,
            name: self.auth_provider_name.clone()?,
            user_id: self.auth_provider_user_id.clone()?,
        })
    }
}

/// Internal identity resolved from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User id (or `run:<id>` for run identities)
    pub user_id: String,
    /// Display name
    pub name: Option<String>,
    /// Email
    pub email: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// Groups
    pub groups: Vec<String>,
    /// Provider that authenticated the user
    pub auth_provider: Option<AuthProviderRef>,
    /// Token kind the identity came from
    pub kind: TokenKind,
    /// Run id for run identities
    pub run_id: Option<String>,
}

impl Identity {
    /// Anonymous bootstrap identity used before any provider is configured
    #[must_use]
    pub fn is_bootstrap(&self) -> bool {
        self.user_id == BOOTSTRAP_USER_ID
    }

    /// Authenticated platform user allowed to complete an OAuth flow
    #[must_use]
    pub fn can_complete_flow(&self) -> bool {
        self.kind == TokenKind::User && !self.is_bootstrap()
    }

    /// User record as captured at login
    #[must_use]
    pub fn to_user(&self) -> User {
        User {
            id: self.user_id.clone(),
            username: self.name.clone().unwrap_or_else(|| self.user_id.clone()),
            display_name: self.name.clone(),
            email: self.email.clone(),
            picture: self.picture.clone(),
            groups: self.groups.clone(),
            auth_provider: self.auth_provider.clone(),
        }
    }
}

impl From<TokenClaims> for Identity {
    fn from(claims: TokenClaims) -> Self {
        let groups = claims
            .groups
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_owned)
            .collect();
        let auth_provider = claims.auth_provider();
        match claims.token_type {
            TokenKind::Run => Self {
                user_id: claims.sub,
                name: None,
                email: None,
                picture: None,
                groups,
                auth_provider: None,
                kind: TokenKind::Run,
                run_id: claims.run_id,
            },
            TokenKind::User => Self {
                user_id: claims.sub,
                name: claims.name,
                email: claims.email,
                picture: claims.picture,
                groups,
                auth_provider,
                kind: TokenKind::User,
                run_id: None,
            },
        }
    }
}

/// A freshly minted token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWT
    pub token: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry at issuance
    pub expires_in: i64,
}

/// `JWT` validation error with detailed information
#[derive(Debug, Clone)]
pub enum JwtValidationError {
    /// Token has expired
    TokenExpired,
    /// Token signature, issuer or key id is invalid
    TokenInvalid {
        /// Reason for invalidity
        reason: String,
    },
    /// Token is malformed (not proper `JWT` format)
    TokenMalformed {
        /// Details about malformation
        details: String,
    },
}

impl fmt::Display for JwtValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenExpired => write!(f, "JWT token has expired"),
            Self::TokenInvalid { reason } => write!(f, "JWT token is invalid: {reason}"),
            Self::TokenMalformed { details } => write!(f, "JWT token is malformed: {details}"),
        }
    }
}

impl std::error::Error for JwtValidationError {}

impl From<JwtValidationError> for AppError {
    fn from(error: JwtValidationError) -> Self {
        let code = match error {
            JwtValidationError::TokenExpired => ErrorCode::AuthExpired,
            JwtValidationError::TokenInvalid { .. } => ErrorCode::AuthInvalid,
            JwtValidationError::TokenMalformed { .. } => ErrorCode::AuthMalformed,
        };
        Self::new(code, error.to_string())
    }
}

/// Mints, verifies and authenticates gateway tokens
pub struct AuthManager {
    jwks: Arc<JwksManager>,
    issuer: String,
    token_ttl: Duration,
}

impl AuthManager {
    /// Create a token issuer for the given base URL
    #[must_use]
    pub fn new(jwks: Arc<JwksManager>, issuer: impl Into<String>, token_ttl_secs: i64) -> Self {
        Self {
            jwks,
            issuer: issuer.into(),
            token_ttl: Duration::seconds(token_ttl_secs),
        }
    }

    /// Issuer written into every token
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Access token lifetime
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Sign `claims`, stamping issuer, issue time and expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key cannot be loaded or signing fails
    pub async fn new_token(&self, mut claims: TokenClaims) -> AppResult<IssuedToken> {
        let key = self.jwks.active_key().await?;
        let now = Utc::now();
        let expires_at = now + self.token_ttl;

        claims.iss.clone_from(&self.issuer);
        claims.iat = now.timestamp();
        claims.exp = expires_at.timestamp();

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(key.kid.clone());

        let token = encode(&header, &claims, &key.encoding_key()?)
            .map_err(|e| AppError::internal(format!("Failed to sign token: {e}")))?;

        Ok(IssuedToken {
            token,
            expires_at,
            expires_in: claims.exp - claims.iat,
        })
    }

    /// Verify signature, issuer and expiry and return the claims
    ///
    /// # Errors
    ///
    /// Returns a [`JwtValidationError`] describing why the token was rejected
    pub async fn decode_token(&self, token: &str) -> Result<TokenClaims, JwtValidationError> {
        let header = decode_header(token).map_err(|e| JwtValidationError::TokenMalformed {
            details: e.to_string(),
        })?;
        let kid = header.kid.ok_or_else(|| JwtValidationError::TokenMalformed {
            details: "missing kid".to_owned(),
        })?;

        let key = self
            .jwks
            .key_for(&kid)
            .await
            .map_err(|e| JwtValidationError::TokenInvalid {
                reason: e.to_string(),
            })?
            .ok_or_else(|| JwtValidationError::TokenInvalid {
                reason: format!("unknown key id {kid}"),
            })?;
        let decoding_key = key
            .decoding_key()
            .map_err(|e| JwtValidationError::TokenInvalid {
                reason: e.to_string(),
            })?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[&self.issuer]);
        // Audience belongs to the resource server
        validation.validate_aud = false;

        decode::<TokenClaims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Self::convert_jwt_error(&e))
    }

    fn convert_jwt_error(e: &jsonwebtoken::errors::Error) -> JwtValidationError {
        warn!("JWT token validation failed: {e}");
        match e.kind() {
            ErrorKind::ExpiredSignature => JwtValidationError::TokenExpired,
            ErrorKind::InvalidSignature => JwtValidationError::TokenInvalid {
                reason: "Token signature verification failed".into(),
            },
            ErrorKind::InvalidIssuer => JwtValidationError::TokenInvalid {
                reason: "Token issuer mismatch".into(),
            },
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                JwtValidationError::TokenMalformed {
                    details: e.to_string(),
                }
            }
            _ => JwtValidationError::TokenInvalid {
                reason: e.to_string(),
            },
        }
    }

    /// Identity behind the request's bearer token or session cookie
    ///
    /// Returns `Ok(None)` when the request carries no credentials.
    ///
    /// # Errors
    ///
    /// Returns an auth error if credentials are present but invalid
    pub async fn authenticate_request(&self, headers: &HeaderMap) -> AppResult<Option<Identity>> {
        let Some(token) = extract_bearer(headers).or_else(|| cookie_value(headers, SESSION_COOKIE))
        else {
            return Ok(None);
        };

        let claims = self.decode_token(&token).await?;
        Ok(Some(Identity::from(claims)))
    }
}

/// Bearer token from the `Authorization` header
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

/// Value of a named cookie
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
}
