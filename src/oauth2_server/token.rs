// ABOUTME: OAuth 2.0 token endpoint for the authorization_code and refresh_token grants
// ABOUTME: One-time codes and refresh tokens are deleted before anything else is issued
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Token Endpoint
//!
//! Both grants look their record up by SHA-256 hash and delete it first. A
//! failed delete means another request already consumed it, which is
//! reported as `invalid_request`. There is no transaction tying the delete to
//! the issuance that follows, so a crash in between strands the grant.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::endpoints::OAuth2AuthorizationServer;
use super::models::{OAuth2Error, TokenRequest, TokenResponse};
use super::pkce;
use crate::auth::TokenClaims;
use crate::constants::oauth;
use crate::crypto::{random_token, sha256_hex};
use crate::models::{AuthProviderRef, AuthRequestStatus, OAuthClient, OAuthToken};

/// Client credentials presented at the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// External `client_id`
    pub client_id: String,
    /// Secret, absent for public clients
    pub client_secret: Option<String>,
    /// `token_endpoint_auth_method` the credentials were presented with
    pub auth_method: &'static str,
}

impl ClientCredentials {
    /// HTTP Basic credentials (RFC 6749 Section 2.3.1), else form fields
    #[must_use]
    pub fn from_request(headers: &HeaderMap, request: &TokenRequest) -> Option<Self> {
        Self::from_basic(headers).or_else(|| {
            request.client_id.clone().map(|client_id| {
                let client_secret = request
                    .client_secret
                    .clone()
                    .filter(|secret| !secret.is_empty());
                Self {
                    client_id,
                    auth_method: if client_secret.is_some() {
                        oauth::AUTH_METHOD_CLIENT_SECRET_POST
                    } else {
                        oauth::AUTH_METHOD_NONE
                    },
                    client_secret,
                }
            })
        })
    }

    fn from_basic(headers: &HeaderMap) -> Option<Self> {
        let encoded = headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Basic ")?;
        let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (client_id, client_secret) = decoded.rsplit_once(':')?;
        Some(Self {
            client_id: urlencoding::decode(client_id).ok()?.into_owned(),
            client_secret: Some(urlencoding::decode(client_secret).ok()?.into_owned())
                .filter(|secret| !secret.is_empty()),
            auth_method: oauth::AUTH_METHOD_CLIENT_SECRET_BASIC,
        })
    }
}

/// Subject of a token issuance
struct Grant<'a> {
    client: &'a OAuthClient,
    user_id: &'a str,
    mcp_id: &'a str,
    resource: &'a str,
    scope: Option<&'a str>,
    auth_provider: Option<&'a AuthProviderRef>,
}

impl OAuth2AuthorizationServer {
    /// Handle token request (POST /oauth/token/{mcp_id})
    ///
    /// # Errors
    /// Returns an OAuth error for bad credentials, disallowed grants or unusable grant records
    pub async fn token(
        &self,
        mcp_id: &str,
        headers: &HeaderMap,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        let credentials = ClientCredentials::from_request(headers, &request)
            .ok_or_else(OAuth2Error::invalid_client)?;
        let client = self
            .resources
            .client_registry
            .validate_client(
                &credentials.client_id,
                credentials.client_secret.as_deref(),
                credentials.auth_method,
            )
            .await?;

        let grant_type = request
            .grant_type
            .as_deref()
            .ok_or_else(|| OAuth2Error::invalid_request("Missing grant_type"))?;
        if !oauth::SUPPORTED_GRANT_TYPES.contains(&grant_type) {
            return Err(OAuth2Error::unsupported_grant_type());
        }
        if !client.manifest.grant_types.iter().any(|g| g == grant_type) {
            return Err(OAuth2Error::unauthorized_client(&format!(
                "Client is not registered for grant_type {grant_type}"
            )));
        }

        match grant_type {
            oauth::GRANT_AUTHORIZATION_CODE => {
                self.handle_authorization_code_grant(mcp_id, &client, &request)
                    .await
            }
            _ => self.handle_refresh_token_grant(mcp_id, &client, &request).await,
        }
    }

    async fn handle_authorization_code_grant(
        &self,
        mcp_id: &str,
        client: &OAuthClient,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        let code = request
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| OAuth2Error::invalid_request("Missing code"))?;

        let store = &self.resources.store;
        let mut matches = store.find_auth_requests_by_code_hash(&sha256_hex(code)).await?;
        if matches.len() != 1 {
            warn!(matches = matches.len(), "Authorization code did not resolve to exactly one request");
            return Err(OAuth2Error::invalid_request("Invalid authorization code"));
        }
        let auth_request = matches.remove(0);

        if !store.delete_auth_request(&auth_request.id).await? {
            warn!(auth_request_id = %auth_request.id, "Authorization code already consumed");
            return Err(OAuth2Error::invalid_request("Invalid authorization code"));
        }

        if auth_request.client_namespace != client.namespace || auth_request.client_name != client.name {
            return Err(OAuth2Error::invalid_grant("Code was issued to another client"));
        }
        if auth_request.mcp_id != mcp_id {
            return Err(OAuth2Error::invalid_grant("Code was issued for another server"));
        }
        let code_ttl = Duration::seconds(self.resources.config.oauth.auth_code_ttl_secs);
        let fresh = auth_request
            .code_issued_at
            .is_some_and(|issued_at| Utc::now() < issued_at + code_ttl);
        if auth_request.status != AuthRequestStatus::Finalized || !fresh {
            return Err(OAuth2Error::invalid_grant("Authorization code expired"));
        }
        if request
            .redirect_uri
            .as_deref()
            .is_some_and(|uri| uri != auth_request.redirect_uri)
        {
            return Err(OAuth2Error::invalid_grant("redirect_uri mismatch"));
        }

        match auth_request.code_challenge.as_deref() {
            Some(challenge) => {
                let verifier = request
                    .code_verifier
                    .as_deref()
                    .ok_or_else(|| OAuth2Error::invalid_grant("code_verifier is required (PKCE)"))?;
                if !pkce::verify_challenge(
                    verifier,
                    challenge,
                    auth_request.code_challenge_method.as_deref(),
                ) {
                    warn!(client_id = %client.client_id(), "PKCE verification failed");
                    return Err(OAuth2Error::invalid_grant("Invalid code_verifier"));
                }
            }
            None if client.is_public() => {
                return Err(OAuth2Error::invalid_grant("Public clients must use PKCE"));
            }
            None => {}
        }

        let user_id = auth_request
            .user_id
            .as_deref()
            .ok_or_else(|| OAuth2Error::invalid_grant("Authorization request has no user"))?;

        self.issue_tokens(&Grant {
            client,
            user_id,
            mcp_id,
            resource: &auth_request.resource,
            scope: auth_request.scope.as_deref(),
            auth_provider: auth_request.auth_provider.as_ref(),
        })
        .await
    }

    async fn handle_refresh_token_grant(
        &self,
        mcp_id: &str,
        client: &OAuthClient,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| OAuth2Error::invalid_request("Missing refresh_token"))?;

        let store = &self.resources.store;
        let hashed = sha256_hex(refresh_token);
        let record = store
            .get_oauth_token(&hashed)
            .await?
            .ok_or_else(|| OAuth2Error::invalid_request("Invalid refresh token"))?;
        if !store.delete_oauth_token(&hashed).await? {
            warn!("Refresh token already consumed");
            return Err(OAuth2Error::invalid_request("Invalid refresh token"));
        }

        if record.client_namespace != client.namespace || record.client_name != client.name {
            return Err(OAuth2Error::invalid_grant("Refresh token was issued to another client"));
        }
        if record.mcp_id != mcp_id {
            return Err(OAuth2Error::invalid_grant("Refresh token was issued for another server"));
        }
        if record.expires_at <= Utc::now() {
            return Err(OAuth2Error::invalid_grant("Refresh token expired"));
        }

        self.issue_tokens(&Grant {
            client,
            user_id: &record.user_id,
            mcp_id,
            resource: &record.resource,
            scope: record.scope.as_deref(),
            auth_provider: record.auth_provider.as_ref(),
        })
        .await
    }

    async fn issue_tokens(&self, grant: &Grant<'_>) -> Result<TokenResponse, OAuth2Error> {
        if let Some(provider) = grant.auth_provider {
            if !self
                .resources
                .session_validator
                .is_session_valid(grant.user_id, provider)
                .await?
            {
                warn!(user_id = %grant.user_id, provider = %provider.name, "Auth provider session is no longer valid");
                return Err(OAuth2Error::invalid_grant("Session is no longer valid"));
            }
        }

        let store = &self.resources.store;
        let user = store
            .get_user(grant.user_id)
            .await?
            .ok_or_else(|| OAuth2Error::invalid_grant("Unknown user"))?;

        let mut claims = TokenClaims::for_user(&user, grant.resource);
        claims.mcp_id = Some(grant.mcp_id.to_owned());
        claims.scope = grant.scope.map(str::to_owned);
        let access = self.resources.auth_manager.new_token(claims).await?;

        let refresh_token = random_token(oauth::SECRET_BYTES)?;
        let now = Utc::now();
        store
            .create_oauth_token(&OAuthToken {
                hashed_token: sha256_hex(&refresh_token),
                client_namespace: grant.client.namespace.clone(),
                client_name: grant.client.name.clone(),
                user_id: grant.user_id.to_owned(),
                mcp_id: grant.mcp_id.to_owned(),
                resource: grant.resource.to_owned(),
                scope: grant.scope.map(str::to_owned),
                auth_provider: grant.auth_provider.cloned(),
                created_at: now,
                expires_at: now
                    + Duration::days(self.resources.config.oauth.refresh_token_ttl_days),
            })
            .await?;

        info!(
            client_id = %grant.client.client_id(),
            user_id = %grant.user_id,
            mcp_id = %grant.mcp_id,
            "Issued access and refresh tokens"
        );
        Ok(TokenResponse {
            access_token: access.token,
            token_type: oauth::TOKEN_TYPE_BEARER.to_owned(),
            expires_in: access.expires_in,
            refresh_token,
            scope: grant.scope.map(str::to_owned),
        })
    }
}
