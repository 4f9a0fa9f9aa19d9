// ABOUTME: Decides whether a remote MCP server needs an upstream OAuth authorization
// ABOUTME: Sends an MCP initialize request and runs RFC 9728 / RFC 8414 discovery on a 401
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # MCP Auth Probing
//!
//! The gateway never speaks the tool protocol beyond a single `initialize`
//! request. A `401 Unauthorized` answer means the server sits behind a
//! third-party authorization server, which is then located through:
//!
//! 1. the `resource_metadata` attribute of `WWW-Authenticate`, or the
//!    `/.well-known/oauth-protected-resource{path}` fallback (RFC 9728)
//! 2. the authorization server metadata of the first listed issuer
//!    (RFC 8414, with OpenID Connect discovery fallbacks)

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

use crate::errors::{AppError, AppResult};

/// MCP protocol revision sent in the probe
const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// One probe of one remote server on behalf of one user
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// Server id
    pub server_id: String,
    /// Remote server URL
    pub url: String,
    /// Extra headers configured for the server
    pub headers: HashMap<String, String>,
    /// User the probe runs for
    pub user_id: String,
    /// Stored upstream access token, if any
    pub access_token: Option<String>,
}

/// Where and how to obtain an upstream authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAuthRequirement {
    /// Issuer URL of the authorization server
    pub authorization_server_url: String,
    /// Discovered authorization endpoint
    pub authorization_endpoint: String,
    /// Discovered token endpoint
    pub token_endpoint: String,
    /// Scopes advertised by the protected resource
    pub scopes: Vec<String>,
}

/// Probe outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProbe {
    /// The server accepted the request as is
    Authorized,
    /// An upstream OAuth dance is needed first
    Required(UpstreamAuthRequirement),
}

/// Capability prober consulted before finishing a first-tier flow
#[async_trait]
pub trait McpAuthProber: Send + Sync {
    /// Check whether `request.url` currently requires upstream authorization
    async fn check_auth(&self, request: &ProbeRequest) -> AppResult<AuthProbe>;
}

#[derive(Debug, Deserialize)]
struct ProtectedResourceMetadata {
    #[serde(default)]
    authorization_servers: Vec<String>,
    #[serde(default)]
    scopes_supported: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationServerMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
}

/// Production prober over HTTP
pub struct HttpMcpProber {
    http: reqwest::Client,
}

impl HttpMcpProber {
    /// Create a prober using the given HTTP client
    #[must_use]
    pub const fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn discover(
        &self,
        resource_url: &Url,
        www_authenticate: Option<&str>,
    ) -> AppResult<UpstreamAuthRequirement> {
        let resource = self
            .fetch_protected_resource_metadata(resource_url, www_authenticate)
            .await?;
        let issuer = resource.authorization_servers.first().ok_or_else(|| {
            AppError::external_service(
                "protected resource metadata",
                format!("{resource_url} lists no authorization servers"),
            )
        })?;
        let issuer_url = Url::parse(issuer).map_err(|e| {
            AppError::external_service(
                "protected resource metadata",
                format!("invalid authorization server URL {issuer}: {e}"),
            )
        })?;
        let metadata = self.fetch_authorization_server_metadata(&issuer_url).await?;

        Ok(UpstreamAuthRequirement {
            authorization_server_url: metadata.issuer,
            authorization_endpoint: metadata.authorization_endpoint,
            token_endpoint: metadata.token_endpoint,
            scopes: resource.scopes_supported.unwrap_or_default(),
        })
    }

    async fn fetch_protected_resource_metadata(
        &self,
        resource_url: &Url,
        www_authenticate: Option<&str>,
    ) -> AppResult<ProtectedResourceMetadata> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(url) = www_authenticate
            .and_then(parse_resource_metadata_url)
            .and_then(|raw| Url::parse(&raw).ok())
        {
            candidates.push(url);
        }
        candidates.push(protected_resource_well_known(resource_url));

        for candidate in candidates {
            if let Some(metadata) = self.fetch_json(&candidate).await {
                return Ok(metadata);
            }
        }

        Err(AppError::external_service(
            "protected resource metadata",
            format!("not found for {resource_url}"),
        ))
    }

    async fn fetch_authorization_server_metadata(
        &self,
        issuer: &Url,
    ) -> AppResult<AuthorizationServerMetadata> {
        for candidate in authorization_server_candidates(issuer) {
            if let Some(metadata) = self.fetch_json(&candidate).await {
                return Ok(metadata);
            }
        }

        Err(AppError::external_service(
            "authorization server metadata",
            format!("not found for {issuer}"),
        ))
    }

    async fn fetch_json<T: for<'de> Deserialize<'de>>(&self, url: &Url) -> Option<T> {
        let response = match self.http.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Metadata candidate unavailable");
                return None;
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Metadata candidate unreachable");
                return None;
            }
        };
        match response.json().await {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(url = %url, error = %e, "Ignoring unparseable metadata document");
                None
            }
        }
    }
}

#[async_trait]
impl McpAuthProber for HttpMcpProber {
    async fn check_auth(&self, request: &ProbeRequest) -> AppResult<AuthProbe> {
        let url = Url::parse(&request.url).map_err(|e| {
            AppError::invalid_input(format!("Invalid MCP server URL {}: {e}", request.url))
        })?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": crate::constants::service_names::MCP_OAUTH_GATEWAY,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });

        let mut builder = self
            .http
            .post(url.clone())
            .header(header::ACCEPT, "application/json, text/event-stream")
            .json(&body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &request.access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            AppError::external_service(request.server_id.clone(), e.to_string()).with_source(e)
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                let www_authenticate = response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                debug!(
                    server_id = %request.server_id,
                    user_id = %request.user_id,
                    "MCP server requires upstream authorization"
                );
                let requirement = self.discover(&url, www_authenticate.as_deref()).await?;
                Ok(AuthProbe::Required(requirement))
            }
            status if status.is_success() => Ok(AuthProbe::Authorized),
            status => Err(AppError::external_service(
                request.server_id.clone(),
                format!("initialize returned {status}"),
            )),
        }
    }
}

/// `resource_metadata` attribute of a `WWW-Authenticate` challenge
#[must_use]
pub fn parse_resource_metadata_url(www_authenticate: &str) -> Option<String> {
    const KEY: &str = "resource_metadata=";
    let rest = &www_authenticate[www_authenticate.find(KEY)? + KEY.len()..];

    if let Some(quoted) = rest.strip_prefix('"') {
        return quoted.find('"').map(|end| quoted[..end].to_owned());
    }
    let end = rest
        .find(|c: char| c.is_whitespace() || c == ',')
        .unwrap_or(rest.len());
    Some(rest[..end].to_owned())
}

fn protected_resource_well_known(resource_url: &Url) -> Url {
    let path = resource_url.path().trim_end_matches('/');
    let mut url = resource_url.clone();
    url.set_path(&format!("/.well-known/oauth-protected-resource{path}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn authorization_server_candidates(issuer: &Url) -> Vec<Url> {
    let path = issuer.path().trim_end_matches('/').to_owned();
    let with_path = |prefix: &str, suffix: &str| {
        let mut url = issuer.clone();
        url.set_path(&format!("{prefix}{suffix}"));
        url.set_query(None);
        url.set_fragment(None);
        url
    };

    let mut candidates = vec![
        with_path("/.well-known/oauth-authorization-server", &path),
        with_path("/.well-known/openid-configuration", &path),
    ];
    if !path.is_empty() {
        candidates.push(with_path(&path, "/.well-known/openid-configuration"));
    }
    candidates
}
