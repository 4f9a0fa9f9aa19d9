// ABOUTME: First-tier OAuth 2.0 authorization endpoint: authorize, login continuation and finalization
// ABOUTME: Drives each auth request from creation through optional upstream authorization to a one-time code
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Authorization Endpoint
//!
//! An [`OAuthAuthRequest`] moves `pending → awaiting_upstream → finalized`.
//! Until the client's `redirect_uri` has been checked against its
//! registration every failure is a direct 4xx JSON error; afterwards every
//! failure is a redirect back to the client carrying `error`,
//! `error_description` and `state`.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::models::{AuthorizeRequest, OAuth2Error, RedirectResult, UpstreamCallbackParams};
use super::pkce;
use crate::auth::Identity;
use crate::constants::oauth;
use crate::crypto::{random_token, sha256_hex};
use crate::mcp::resources::ServerResources;
use crate::models::{AuthRequestStatus, OAuthAuthRequest, OAuthClient};

/// OAuth 2.0 Authorization Server
pub struct OAuth2AuthorizationServer {
    pub(super) resources: Arc<ServerResources>,
}

/// Append query parameters to a trusted redirect URI
pub(super) fn append_query(redirect_uri: &str, params: &[(&str, &str)]) -> RedirectResult {
    let mut url = Url::parse(redirect_uri)
        .map_err(|_| OAuth2Error::invalid_request("Registered redirect_uri is not a valid URL"))?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url.to_string())
}

/// Whether every requested scope token is registered for the client
///
/// Clients registered without a scope are not restricted.
fn scope_allowed(client: &OAuthClient, requested: Option<&str>) -> bool {
    let (Some(requested), Some(registered)) = (requested, client.manifest.scope.as_deref()) else {
        return true;
    };
    let registered: HashSet<&str> = registered.split_whitespace().collect();
    requested
        .split_whitespace()
        .all(|scope| registered.contains(scope))
}

impl OAuth2AuthorizationServer {
    /// Create an authorization server over shared resources
    #[must_use]
    pub const fn new(resources: Arc<ServerResources>) -> Self {
        Self { resources }
    }

    /// Handle authorization request (GET /oauth/authorize/{mcp_id})
    ///
    /// Creates a pending auth request and sends the user agent to the
    /// platform login, which continues at `/oauth/callback/{id}/{mcp_id}`.
    ///
    /// # Errors
    /// Returns a direct error while the redirect URI is untrusted
    pub async fn authorize(&self, mcp_id: &str, request: AuthorizeRequest) -> RedirectResult {
        if request.code_challenge.is_some() {
            if let Some(method) = request.code_challenge_method.as_deref() {
                if !pkce::is_supported_method(method) {
                    return Err(OAuth2Error::invalid_request(&format!(
                        "Unsupported code_challenge_method: {method}"
                    )));
                }
            }
        }

        let client_id = request
            .client_id
            .as_deref()
            .ok_or_else(|| OAuth2Error::invalid_request("Missing client_id"))?;
        let client = self
            .resources
            .client_registry
            .get_client(client_id)
            .await
            .map_err(|e| {
                warn!(client_id = %client_id, error = %e, "Authorization for unknown client");
                OAuth2Error::invalid_request("Unknown client_id")
            })?;

        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) if client.manifest.redirect_uris.iter().any(|r| r == uri) => uri.to_owned(),
            None if client.manifest.redirect_uris.len() == 1 => {
                client.manifest.redirect_uris[0].clone()
            }
            _ => {
                warn!(client_id = %client_id, "Authorization with unregistered redirect_uri");
                return Err(OAuth2Error::invalid_request("Invalid redirect_uri"));
            }
        };

        // The redirect URI is trusted from here on
        let state = request.state.clone();
        let fail = |error: OAuth2Error| Ok(error.with_state(state.clone()).redirect_location(&redirect_uri));

        let response_type = request.response_type.as_deref().unwrap_or_default();
        if !oauth::SUPPORTED_RESPONSE_TYPES.contains(&response_type) {
            return Err(OAuth2Error::invalid_request(&format!(
                "Unsupported response_type: {response_type}"
            )));
        }
        if !client
            .manifest
            .response_types
            .iter()
            .any(|allowed| allowed == response_type)
        {
            return fail(OAuth2Error::unsupported_response_type(
                "response_type not registered for this client",
            ));
        }
        if client.is_public() && request.code_challenge.is_none() {
            return fail(OAuth2Error::invalid_request(
                "code_challenge is required for public clients",
            ));
        }
        if !scope_allowed(&client, request.scope.as_deref()) {
            return fail(OAuth2Error::invalid_scope(
                "Requested scope exceeds the client's registered scope",
            ));
        }

        let auth_request = OAuthAuthRequest {
            id: Uuid::new_v4().to_string(),
            client_namespace: client.namespace.clone(),
            client_name: client.name.clone(),
            mcp_id: mcp_id.to_owned(),
            redirect_uri: redirect_uri.clone(),
            state: request.state,
            scope: request.scope,
            code_challenge_method: request.code_challenge.as_ref().map(|_| {
                request
                    .code_challenge_method
                    .unwrap_or_else(|| oauth::PKCE_METHOD_PLAIN.to_owned())
            }),
            code_challenge: request.code_challenge,
            resource: request
                .resource
                .unwrap_or_else(|| self.resources.config.resource_url(mcp_id)),
            grant_type: oauth::GRANT_AUTHORIZATION_CODE.to_owned(),
            hashed_auth_code: None,
            code_issued_at: None,
            user_id: None,
            auth_provider: None,
            status: AuthRequestStatus::Pending,
            created_at: Utc::now(),
        };
        if let Err(e) = self.resources.store.create_auth_request(&auth_request).await {
            return fail(e.into());
        }

        info!(
            auth_request_id = %auth_request.id,
            client_id = %client_id,
            mcp_id = %mcp_id,
            "Created OAuth authorization request"
        );
        Ok(self.resources.config.login_url(&format!(
            "/oauth/callback/{}/{mcp_id}",
            auth_request.id
        )))
    }

    /// Continue a request after platform login (GET /oauth/callback/{id}/{mcp_id})
    ///
    /// # Errors
    /// Returns a direct error when the request is unknown
    pub async fn callback(
        &self,
        auth_request_id: &str,
        mcp_id: &str,
        identity: Option<Identity>,
    ) -> RedirectResult {
        let mut request = self.load_request(auth_request_id).await?;
        if request.mcp_id != mcp_id {
            return Err(OAuth2Error::invalid_request(
                "Authorization request belongs to another server",
            ));
        }
        if request.status == AuthRequestStatus::Finalized {
            return Ok(Self::redirect_error(
                &request,
                OAuth2Error::invalid_request("Authorization request already completed"),
            ));
        }

        let Some(identity) = identity.filter(Identity::can_complete_flow) else {
            warn!(auth_request_id = %auth_request_id, "Authorization callback without an authenticated user");
            self.discard_request(&request.id).await;
            return Ok(Self::redirect_error(
                &request,
                OAuth2Error::access_denied("An authenticated user is required"),
            ));
        };

        match self.bind_identity(&mut request, &identity).await {
            Ok(location) => Ok(location),
            Err(error) => Ok(Self::redirect_error(&request, error)),
        }
    }

    async fn bind_identity(
        &self,
        request: &mut OAuthAuthRequest,
        identity: &Identity,
    ) -> RedirectResult {
        let store = &self.resources.store;
        store.upsert_user(&identity.to_user()).await?;
        request.user_id = Some(identity.user_id.clone());
        request.auth_provider.clone_from(&identity.auth_provider);

        let Some(server) = store.get_mcp_server(&request.mcp_id).await? else {
            debug!(mcp_id = %request.mcp_id, "No server record; finalizing without upstream check");
            return self.finalize(request).await;
        };

        if server.is_composite() {
            request.status = AuthRequestStatus::AwaitingUpstream;
            store.update_auth_request(request).await?;
            return Ok(self
                .resources
                .config
                .composite_auth_url(&request.mcp_id, &request.id));
        }

        let auth_url = self
            .resources
            .upstream
            .check_auth(&identity.user_id, &server, Some(&request.id))
            .await?;
        if let Some(auth_url) = auth_url {
            request.status = AuthRequestStatus::AwaitingUpstream;
            store.update_auth_request(request).await?;
            info!(auth_request_id = %request.id, mcp_id = %request.mcp_id, "Awaiting upstream authorization");
            return Ok(auth_url);
        }

        self.finalize(request).await
    }

    /// Issue a fresh one-time code and send the user agent back to the client
    ///
    /// Only the SHA-256 of the code is stored. A finalized request is never
    /// finalized again.
    ///
    /// # Errors
    /// Returns an error if the request is already finalized or cannot be stored
    pub async fn finalize(&self, request: &mut OAuthAuthRequest) -> RedirectResult {
        if request.status == AuthRequestStatus::Finalized {
            warn!(auth_request_id = %request.id, "Refusing to finalize a completed authorization request");
            return Err(OAuth2Error::invalid_request(
                "Authorization request already completed",
            ));
        }

        let code = random_token(oauth::AUTH_CODE_BYTES)?;
        request.hashed_auth_code = Some(sha256_hex(&code));
        request.code_issued_at = Some(Utc::now());
        request.status = AuthRequestStatus::Finalized;
        self.resources.store.update_auth_request(request).await?;

        info!(auth_request_id = %request.id, mcp_id = %request.mcp_id, "Issued authorization code");
        let mut params = vec![("code", code.as_str())];
        if let Some(state) = request.state.as_deref() {
            params.push(("state", state));
        }
        append_query(&request.redirect_uri, &params)
    }

    /// Handle the third-party provider's redirect (GET /oauth/mcp/callback)
    ///
    /// # Errors
    /// Returns a direct error when no first-tier request can be correlated
    pub async fn upstream_callback(&self, params: UpstreamCallbackParams) -> RedirectResult {
        let state = params
            .state
            .as_deref()
            .filter(|state| !state.is_empty())
            .ok_or_else(|| OAuth2Error::invalid_request("Missing state"))?;

        let resolved = self
            .resources
            .upstream
            .resolve_callback(
                state,
                params.code.as_deref(),
                params.error.as_deref(),
                params.error_description.as_deref(),
            )
            .await;

        match resolved {
            Ok(auth_request_id) if auth_request_id.is_empty() => {
                Ok(self.resources.config.login_complete_url())
            }
            Ok(auth_request_id) => self.resume_after_upstream(&auth_request_id).await,
            Err(failure) => {
                warn!(error = %failure.error, "Upstream OAuth callback failed");
                let Some(auth_request_id) = failure.auth_request_id else {
                    return Err(failure.error.into());
                };
                let request = self.load_request(&auth_request_id).await?;
                Ok(Self::redirect_error(
                    &request,
                    OAuth2Error::access_denied(&format!(
                        "Upstream authorization failed: {}",
                        failure.error.message
                    )),
                ))
            }
        }
    }

    async fn resume_after_upstream(&self, auth_request_id: &str) -> RedirectResult {
        let mut request = self.load_request(auth_request_id).await?;
        let server = match self.resources.store.get_mcp_server(&request.mcp_id).await {
            Ok(server) => server,
            Err(e) => return Ok(Self::redirect_error(&request, e.into())),
        };

        if server.is_some_and(|server| server.is_composite()) {
            return Ok(self
                .resources
                .config
                .composite_auth_url(&request.mcp_id, &request.id));
        }
        match self.finalize(&mut request).await {
            Ok(location) => Ok(location),
            Err(error) => Ok(Self::redirect_error(&request, error)),
        }
    }

    pub(super) async fn load_request(&self, id: &str) -> Result<OAuthAuthRequest, OAuth2Error> {
        self.resources
            .store
            .get_auth_request(id)
            .await?
            .ok_or_else(|| OAuth2Error::invalid_request("Unknown authorization request"))
    }

    async fn discard_request(&self, id: &str) {
        if let Err(e) = self.resources.store.delete_auth_request(id).await {
            warn!(auth_request_id = %id, error = %e, "Failed to delete authorization request");
        }
    }

    pub(super) fn redirect_error(request: &OAuthAuthRequest, error: OAuth2Error) -> String {
        error
            .with_state(request.state.clone())
            .redirect_location(&request.redirect_uri)
    }
}
