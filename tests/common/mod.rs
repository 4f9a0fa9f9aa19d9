// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Builds in-memory gateways, a stub prober, a local upstream token server and flow helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]
//! Shared test utilities for `mcp_oauth_gateway`
//!
//! This module provides common test setup functions to reduce duplication
//! across integration tests.

use async_trait::async_trait;
use axum::{extract::Form, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use dashmap::DashMap;
use mcp_oauth_gateway::{
    auth::TokenClaims,
    config::ServerConfig,
    errors::{AppError, AppResult},
    mcp::{
        prober::{AuthProbe, McpAuthProber, ProbeRequest, UpstreamAuthRequirement},
        resources::ServerResources,
    },
    models::{AuthProviderRef, ComponentRef, McpRuntime, McpServer, UpstreamOAuthApp, User},
    oauth2_server::{ClientRegistrationResponse, OAuth2Routes},
    storage::{GatewayStore, MemoryStore},
    vault::MemoryVault,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use crate::helpers::axum_test::AxumTestRequest;

static INIT_LOGGER: Once = Once::new();

/// Gateway base URL used by every test gateway
pub const BASE_URL: &str = "http://gateway.test";
/// Redirect URI registered by test clients
pub const REDIRECT_URI: &str = "https://app.example.com/cb";
/// RFC 7636 Appendix B verifier
pub const VERIFIER: &str = "dBjftJeZ4CVP-mJ92K1s_N3eBzCi-j5ZRQHxvSxmRsc";
/// RFC 7636 Appendix B S256 challenge
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
/// Code accepted by the local upstream token server
pub const UPSTREAM_CODE: &str = "good-code";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            Ok("WARN" | "ERROR") | _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Scripted probe answer for one remote URL
#[derive(Debug, Clone)]
pub enum StubProbe {
    /// Usable without upstream authorization
    Authorized,
    /// Upstream authorization needed
    Required(UpstreamAuthRequirement),
    /// Probe itself fails
    Fail,
}

/// Prober answering from a script; any stored upstream token counts as authorized
#[derive(Default)]
pub struct StubProber {
    rules: DashMap<String, StubProbe>,
}

impl StubProber {
    pub fn set(&self, url: &str, probe: StubProbe) {
        self.rules.insert(url.to_owned(), probe);
    }
}

#[async_trait]
impl McpAuthProber for StubProber {
    async fn check_auth(&self, request: &ProbeRequest) -> AppResult<AuthProbe> {
        if request.access_token.is_some() {
            return Ok(AuthProbe::Authorized);
        }
        let rule = self
            .rules
            .get(&request.url)
            .map_or(StubProbe::Authorized, |rule| rule.clone());
        match rule {
            StubProbe::Authorized => Ok(AuthProbe::Authorized),
            StubProbe::Required(requirement) => Ok(AuthProbe::Required(requirement)),
            StubProbe::Fail => Err(AppError::external_service("stub prober", "unreachable")),
        }
    }
}

/// In-memory gateway with handles on its backends
pub struct TestGateway {
    pub resources: Arc<ServerResources>,
    pub store: Arc<MemoryStore>,
    pub vault: Arc<MemoryVault>,
    pub prober: Arc<StubProber>,
}

impl TestGateway {
    /// Fresh router over the gateway's resources
    pub fn router(&self) -> Router {
        OAuth2Routes::routes(self.resources.clone())
    }
}

/// Configuration tuned for fast tests
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig {
        base_url: BASE_URL.to_owned(),
        ..ServerConfig::default()
    };
    config.oauth.bcrypt_cost = 4;
    config.upstream.auth_url_wait = Duration::from_millis(200);
    config
}

/// Gateway over fresh in-memory backends
pub fn create_test_gateway() -> TestGateway {
    create_test_gateway_with(
        test_config(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryVault::new()),
        Arc::new(StubProber::default()),
    )
}

/// Gateway over the given backends; two gateways sharing them act as two processes
pub fn create_test_gateway_with(
    config: ServerConfig,
    store: Arc<MemoryStore>,
    vault: Arc<MemoryVault>,
    prober: Arc<StubProber>,
) -> TestGateway {
    init_test_logging();
    let resources = ServerResources::new(
        config,
        store.clone(),
        vault.clone(),
        prober.clone(),
        reqwest::Client::new(),
    )
    .unwrap();
    TestGateway {
        resources: Arc::new(resources),
        store,
        vault,
        prober,
    }
}

/// Test user with an auth-provider reference
pub fn test_user(user_id: &str) -> User {
    User {
        id: user_id.to_owned(),
        username: user_id.to_owned(),
        display_name: Some("Test User".to_owned()),
        email: Some(format!("{user_id}@example.com")),
        picture: None,
        groups: vec!["users".to_owned()],
        auth_provider: Some(AuthProviderRef {
            namespace: "default".to_owned(),
            name: "github".to_owned(),
            user_id: format!("gh-{user_id}"),
        }),
    }
}

/// Session token for a logged-in platform user
pub async fn user_token(gateway: &TestGateway, user_id: &str) -> String {
    gateway
        .resources
        .auth_manager
        .new_token(TokenClaims::for_user(&test_user(user_id), BASE_URL))
        .await
        .unwrap()
        .token
}

/// Register a confidential client allowed both grants
pub async fn register_client(gateway: &TestGateway, mcp_id: &str) -> ClientRegistrationResponse {
    register_client_with(
        gateway,
        mcp_id,
        json!({
            "redirect_uris": [REDIRECT_URI],
            "grant_types": ["authorization_code", "refresh_token"],
            "client_name": "Test Client",
        }),
    )
    .await
}

/// Register a client with an explicit manifest
pub async fn register_client_with(
    gateway: &TestGateway,
    mcp_id: &str,
    manifest: serde_json::Value,
) -> ClientRegistrationResponse {
    AxumTestRequest::post(&format!("/oauth/register/{mcp_id}"))
        .json(&manifest)
        .send(gateway.router())
        .await
        .assert_status(StatusCode::CREATED)
        .json()
}

/// Query parameter of a URL
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Authorize URL with S256 PKCE and `state=xyz`
pub fn authorize_uri(mcp_id: &str, client_id: &str) -> String {
    let query = serde_urlencoded::to_string([
        ("client_id", client_id),
        ("redirect_uri", REDIRECT_URI),
        ("response_type", "code"),
        ("state", "xyz"),
        ("code_challenge", CHALLENGE),
        ("code_challenge_method", "S256"),
    ])
    .unwrap();
    format!("/oauth/authorize/{mcp_id}?{query}")
}

/// Gateway path the login page continues to
pub fn login_continuation(login_location: &str) -> String {
    assert!(login_location.starts_with(&format!("{BASE_URL}/login?")));
    query_param(login_location, "rd").unwrap()
}

/// Authorize, then complete platform login; returns the callback's redirect target
pub async fn authorize_and_login(
    gateway: &TestGateway,
    mcp_id: &str,
    client_id: &str,
    user_id: &str,
) -> String {
    let login = AxumTestRequest::get(&authorize_uri(mcp_id, client_id))
        .send(gateway.router())
        .await
        .location();
    let token = user_token(gateway, user_id).await;
    AxumTestRequest::get(&login_continuation(&login))
        .bearer(&token)
        .send(gateway.router())
        .await
        .location()
}

/// Redeem a one-time code with Basic client credentials
pub async fn redeem_code(
    gateway: &TestGateway,
    mcp_id: &str,
    client: &ClientRegistrationResponse,
    code: &str,
    verifier: &str,
) -> crate::helpers::axum_test::AxumTestResponse {
    AxumTestRequest::post(&format!("/oauth/token/{mcp_id}"))
        .basic_auth(&client.client_id, client.client_secret.as_deref().unwrap())
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", verifier),
        ])
        .send(gateway.router())
        .await
}

/// Remote MCP server record
pub fn remote_server(id: &str, url: &str, catalog_entry_id: &str, composite_id: Option<&str>) -> McpServer {
    McpServer {
        id: id.to_owned(),
        name: id.to_owned(),
        user_id: None,
        catalog_entry_id: Some(catalog_entry_id.to_owned()),
        composite_id: composite_id.map(str::to_owned),
        runtime: McpRuntime::Remote {
            url: url.to_owned(),
            headers: HashMap::new(),
        },
    }
}

/// Composite MCP server record
pub fn composite_server(id: &str, components: &[(&str, bool)]) -> McpServer {
    McpServer {
        id: id.to_owned(),
        name: id.to_owned(),
        user_id: None,
        catalog_entry_id: None,
        composite_id: None,
        runtime: McpRuntime::Composite {
            components: components
                .iter()
                .map(|(catalog_entry_id, disabled)| ComponentRef {
                    catalog_entry_id: (*catalog_entry_id).to_owned(),
                    disabled: *disabled,
                })
                .collect(),
        },
    }
}

/// Remote server behind a third-party authorization server whose token
/// endpoint is `token_url`; registers the upstream app and the probe rule
pub async fn protect_server(
    gateway: &TestGateway,
    server: &McpServer,
    issuer: &str,
    token_url: &str,
) {
    gateway.store.upsert_mcp_server(server).await.unwrap();
    gateway
        .resources
        .upstream
        .register_app(
            &UpstreamOAuthApp {
                id: format!("app-{}", server.id),
                authorization_server_url: issuer.to_owned(),
                client_id: format!("client-{}", server.id),
                authorization_endpoint: None,
                token_endpoint: None,
                scopes: vec![],
            },
            Some("upstream-secret"),
        )
        .await
        .unwrap();
    gateway.prober.set(
        server.remote_url().unwrap(),
        StubProbe::Required(UpstreamAuthRequirement {
            authorization_server_url: issuer.to_owned(),
            authorization_endpoint: format!("{issuer}/authorize"),
            token_endpoint: token_url.to_owned(),
            scopes: vec!["read".to_owned()],
        }),
    );
}

async fn handle_upstream_token(Form(params): Form<HashMap<String, String>>) -> impl IntoResponse {
    let valid = params.get("grant_type").map(String::as_str) == Some("authorization_code")
        && params.get("code").map(String::as_str) == Some(UPSTREAM_CODE)
        && params.get("client_secret").map(String::as_str) == Some("upstream-secret")
        && params.contains_key("code_verifier");
    if valid {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": "upstream-access-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "upstream-refresh-token",
            })),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
    }
}

/// Local third-party token endpoint; returns its URL
pub async fn spawn_upstream_token_server() -> String {
    let app = Router::new().route("/token", post(handle_upstream_token));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/token")
}
