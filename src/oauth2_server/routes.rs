// ABOUTME: Axum route handlers for the gateway's OAuth 2.0 authorization server surface
// ABOUTME: Registration, authorize, callbacks, token, composite polling, discovery and JWKS
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! OAuth 2.0 server routes
//!
//! ## Endpoints
//!
//! - `POST /oauth/register/:mcp_id` - dynamic client registration
//! - `GET|PUT|DELETE /oauth/register/:client_id` - client self-management
//! - `GET /oauth/authorize/:mcp_id` - first-tier authorize
//! - `GET /oauth/callback/:auth_request_id/:mcp_id` - post-login continuation
//! - `POST /oauth/token/:mcp_id` - token exchange
//! - `GET /oauth/mcp/callback` - third-party provider redirect target
//! - `GET /oauth/composite/:mcp_id` - composite authorization polling
//! - `GET /.well-known/oauth-authorization-server/:mcp_id` - RFC 8414 metadata
//! - `GET /.well-known/oauth-protected-resource/mcp-connect/:mcp_id` - RFC 9728 metadata
//! - `GET /oauth/jwks.json`, `GET /.well-known/jwks.json` - verification keys
//! - `GET /health` - liveness

use axum::{
    body::Bytes,
    extract::{rejection::FormRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::composite::CompositeOutcome;
use super::endpoints::OAuth2AuthorizationServer;
use super::models::{
    found, redirect_response, AuthorizationServerMetadata, AuthorizeRequest, ClientRegistrationRequest,
    CompositeAuthStatus, CompositeQuery, OAuth2Error, ProtectedResourceMetadata, TokenRequest,
    UpstreamCallbackParams,
};
use crate::auth::{extract_bearer, Identity};
use crate::constants::{oauth, service_names};
use crate::errors::AppError;
use crate::mcp::resources::ServerResources;

/// OAuth 2.0 route collection
pub struct OAuth2Routes;

impl OAuth2Routes {
    /// Create all OAuth 2.0 routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/oauth/register/:id",
                post(Self::handle_register)
                    .get(Self::handle_read_client)
                    .put(Self::handle_update_client)
                    .delete(Self::handle_delete_client),
            )
            .route("/oauth/authorize/:mcp_id", get(Self::handle_authorize))
            .route(
                "/oauth/callback/:auth_request_id/:mcp_id",
                get(Self::handle_callback),
            )
            .route("/oauth/token/:mcp_id", post(Self::handle_token))
            .route("/oauth/mcp/callback", get(Self::handle_upstream_callback))
            .route("/oauth/composite/:mcp_id", get(Self::handle_composite))
            .route(
                "/.well-known/oauth-authorization-server/:mcp_id",
                get(Self::handle_authorization_server_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource/mcp-connect/:mcp_id",
                get(Self::handle_protected_resource_metadata),
            )
            .route("/oauth/jwks.json", get(Self::handle_jwks))
            .route("/.well-known/jwks.json", get(Self::handle_jwks))
            .route("/health", get(Self::handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(resources)
    }

    fn server(resources: Arc<ServerResources>) -> OAuth2AuthorizationServer {
        OAuth2AuthorizationServer::new(resources)
    }

    async fn identity(resources: &ServerResources, headers: &HeaderMap) -> Option<Identity> {
        match resources.auth_manager.authenticate_request(headers).await {
            Ok(identity) => identity,
            Err(e) => {
                debug!(error = %e, "Ignoring invalid session credentials");
                None
            }
        }
    }

    fn parse_registration(body: &Bytes) -> Result<ClientRegistrationRequest, OAuth2Error> {
        serde_json::from_slice(body).map_err(|e| {
            OAuth2Error::invalid_client_metadata(&format!("Invalid registration request: {e}"))
        })
    }

    fn no_store_json<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
        (status, [(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
    }

    /// Handle client registration (POST /oauth/register/:mcp_id)
    async fn handle_register(
        State(resources): State<Arc<ServerResources>>,
        Path(mcp_id): Path<String>,
        body: Bytes,
    ) -> Response {
        let request = match Self::parse_registration(&body) {
            Ok(request) => request,
            Err(error) => return error.into_response(),
        };
        match resources
            .client_registry
            .register_client(&mcp_id, request)
            .await
        {
            Ok(response) => Self::no_store_json(StatusCode::CREATED, &response),
            Err(error) => error.into_response(),
        }
    }

    /// Handle registration read (GET /oauth/register/:client_id)
    async fn handle_read_client(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        headers: HeaderMap,
    ) -> Response {
        let token = extract_bearer(&headers);
        match resources
            .client_registry
            .read_client(&client_id, token.as_deref())
            .await
        {
            Ok(response) => Self::no_store_json(StatusCode::OK, &response),
            Err(error) => error.into_response(),
        }
    }

    /// Handle registration update (PUT /oauth/register/:client_id)
    async fn handle_update_client(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let request = match Self::parse_registration(&body) {
            Ok(request) => request,
            Err(error) => return error.into_response(),
        };
        let token = extract_bearer(&headers);
        match resources
            .client_registry
            .update_client(&client_id, token.as_deref(), request)
            .await
        {
            Ok(response) => Self::no_store_json(StatusCode::OK, &response),
            Err(error) => error.into_response(),
        }
    }

    /// Handle registration delete (DELETE /oauth/register/:client_id)
    async fn handle_delete_client(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        headers: HeaderMap,
    ) -> Response {
        let token = extract_bearer(&headers);
        match resources
            .client_registry
            .delete_client(&client_id, token.as_deref())
            .await
        {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(error) => error.into_response(),
        }
    }

    async fn handle_authorize(
        State(resources): State<Arc<ServerResources>>,
        Path(mcp_id): Path<String>,
        Query(request): Query<AuthorizeRequest>,
    ) -> Response {
        redirect_response(Self::server(resources).authorize(&mcp_id, request).await)
    }

    async fn handle_callback(
        State(resources): State<Arc<ServerResources>>,
        Path((auth_request_id, mcp_id)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> Response {
        let identity = Self::identity(&resources, &headers).await;
        redirect_response(
            Self::server(resources)
                .callback(&auth_request_id, &mcp_id, identity)
                .await,
        )
    }

    async fn handle_token(
        State(resources): State<Arc<ServerResources>>,
        Path(mcp_id): Path<String>,
        headers: HeaderMap,
        form: Result<Form<TokenRequest>, FormRejection>,
    ) -> Response {
        let request = match form {
            Ok(Form(request)) => request,
            Err(rejection) => {
                debug!(error = %rejection, "Rejected malformed token request");
                return OAuth2Error::invalid_request(&format!(
                    "Token requests must be application/x-www-form-urlencoded: {}",
                    rejection.body_text()
                ))
                .into_response();
            }
        };
        match Self::server(resources)
            .token(&mcp_id, &headers, request)
            .await
        {
            Ok(response) => response.into_response(),
            Err(error) => error.into_response(),
        }
    }

    async fn handle_upstream_callback(
        State(resources): State<Arc<ServerResources>>,
        Query(params): Query<UpstreamCallbackParams>,
    ) -> Response {
        redirect_response(Self::server(resources).upstream_callback(params).await)
    }

    async fn handle_composite(
        State(resources): State<Arc<ServerResources>>,
        Path(mcp_id): Path<String>,
        Query(query): Query<CompositeQuery>,
        headers: HeaderMap,
    ) -> Response {
        let identity = Self::identity(&resources, &headers).await;
        let outcome = Self::server(resources)
            .check_composite_auth(&mcp_id, query.oauth_auth_request.as_deref(), identity)
            .await;
        match outcome {
            Ok(CompositeOutcome::Pending(pending)) => {
                Self::no_store_json(StatusCode::OK, &CompositeAuthStatus { pending })
            }
            Ok(CompositeOutcome::Finalized(location)) => found(&location),
            Ok(CompositeOutcome::Complete) => Self::no_store_json(
                StatusCode::OK,
                &CompositeAuthStatus {
                    pending: Vec::new(),
                },
            ),
            Err(error) => error.into_response(),
        }
    }

    async fn handle_authorization_server_metadata(
        State(resources): State<Arc<ServerResources>>,
        Path(mcp_id): Path<String>,
    ) -> Json<AuthorizationServerMetadata> {
        let config = &resources.config;
        let to_vec = |values: &[&str]| -> Vec<String> {
            values.iter().map(|v| (*v).to_owned()).collect()
        };
        Json(AuthorizationServerMetadata {
            issuer: config.base_url.clone(),
            authorization_endpoint: config.authorize_url(&mcp_id),
            token_endpoint: config.token_url(&mcp_id),
            registration_endpoint: config.registration_url(&mcp_id),
            jwks_uri: config.jwks_url(),
            response_types_supported: to_vec(oauth::SUPPORTED_RESPONSE_TYPES),
            grant_types_supported: to_vec(oauth::SUPPORTED_GRANT_TYPES),
            token_endpoint_auth_methods_supported: to_vec(oauth::SUPPORTED_AUTH_METHODS),
            code_challenge_methods_supported: to_vec(oauth::SUPPORTED_PKCE_METHODS),
        })
    }

    async fn handle_protected_resource_metadata(
        State(resources): State<Arc<ServerResources>>,
        Path(mcp_id): Path<String>,
    ) -> Json<ProtectedResourceMetadata> {
        Json(ProtectedResourceMetadata {
            resource: resources.config.resource_url(&mcp_id),
            authorization_servers: vec![resources.config.base_url.clone()],
            bearer_methods_supported: vec!["header".to_owned()],
        })
    }

    async fn handle_jwks(State(resources): State<Arc<ServerResources>>) -> Result<Response, AppError> {
        let jwks = resources.jwks_manager.jwks().await?;
        Ok((
            StatusCode::OK,
            [(header::CACHE_CONTROL, "public, max-age=3600")],
            Json(jwks),
        )
            .into_response())
    }

    async fn handle_health() -> Json<serde_json::Value> {
        Json(json!({
            "status": "ok",
            "service": service_names::MCP_OAUTH_GATEWAY,
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }
}
