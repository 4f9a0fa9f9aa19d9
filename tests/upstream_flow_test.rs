// ABOUTME: Integration tests for the upstream OAuth leg toward third-party authorization servers
// ABOUTME: Covers probe-triggered flows, callback resumption, cross-process recovery and state sweeping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use axum::http::StatusCode;
use common::{
    authorize_and_login, create_test_gateway, create_test_gateway_with, protect_server,
    query_param, redeem_code, register_client, remote_server, spawn_upstream_token_server,
    test_config, StubProbe, StubProber, BASE_URL, REDIRECT_URI, UPSTREAM_CODE, VERIFIER,
};
use helpers::axum_test::AxumTestRequest;
use mcp_oauth_gateway::{
    models::AuthRequestStatus,
    oauth2_server::{OAuth2Error, TokenResponse},
    storage::{GatewayStore, MemoryStore},
    vault::MemoryVault,
};
use std::sync::Arc;
use std::time::Duration;

const MCP_ID: &str = "remote-1";
const MCP_URL: &str = "https://mcp.remote.test/mcp";
const ISSUER: &str = "https://auth.remote.test";

fn upstream_callback(state: &str, code: &str) -> String {
    format!(
        "/oauth/mcp/callback?{}",
        serde_urlencoded::to_string([("state", state), ("code", code)]).unwrap()
    )
}

#[tokio::test]
async fn test_remote_server_requires_upstream_authorization() {
    let gateway = create_test_gateway();
    let token_url = spawn_upstream_token_server().await;
    protect_server(
        &gateway,
        &remote_server(MCP_ID, MCP_URL, "remote", None),
        ISSUER,
        &token_url,
    )
    .await;
    let client = register_client(&gateway, MCP_ID).await;

    let upstream_url = authorize_and_login(&gateway, MCP_ID, &client.client_id, "alice").await;
    assert!(upstream_url.starts_with(&format!("{ISSUER}/authorize?")));
    assert_eq!(
        query_param(&upstream_url, "client_id").as_deref(),
        Some("client-remote-1")
    );
    assert_eq!(
        query_param(&upstream_url, "redirect_uri"),
        Some(format!("{BASE_URL}/oauth/mcp/callback"))
    );
    assert_eq!(
        query_param(&upstream_url, "code_challenge_method").as_deref(),
        Some("S256")
    );
    assert_eq!(query_param(&upstream_url, "scope").as_deref(), Some("read"));
    let state = query_param(&upstream_url, "state").unwrap();

    let record = gateway
        .store
        .get_upstream_state(&state)
        .await
        .unwrap()
        .unwrap();
    assert!(record.config.client_secret.is_empty());
    assert_eq!(record.auth_url.as_deref(), Some(upstream_url.as_str()));
    let auth_request_id = record.auth_request_id.clone().unwrap();
    assert_eq!(
        gateway
            .store
            .get_auth_request(&auth_request_id)
            .await
            .unwrap()
            .unwrap()
            .status,
        AuthRequestStatus::AwaitingUpstream
    );

    let location = AxumTestRequest::get(&upstream_callback(&state, UPSTREAM_CODE))
        .send(gateway.router())
        .await
        .location();
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));
    let code = query_param(&location, "code").unwrap();

    let stored = gateway
        .resources
        .upstream
        .stored_token("alice", MCP_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "upstream-access-token");
    assert!(gateway.store.get_upstream_state(&state).await.unwrap().is_none());

    let tokens: TokenResponse = redeem_code(&gateway, MCP_ID, &client, &code, VERIFIER)
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(tokens.token_type, "bearer");

    // A stored upstream token satisfies the next login directly
    let second = authorize_and_login(&gateway, MCP_ID, &client.client_id, "alice").await;
    assert!(query_param(&second, "code").is_some());
}

#[tokio::test]
async fn test_callback_recovered_by_another_process() {
    let store = Arc::new(MemoryStore::new());
    let vault = Arc::new(MemoryVault::new());
    let prober = Arc::new(StubProber::default());
    let first = create_test_gateway_with(test_config(), store.clone(), vault.clone(), prober.clone());
    let second = create_test_gateway_with(test_config(), store, vault, prober);

    let token_url = spawn_upstream_token_server().await;
    protect_server(
        &first,
        &remote_server(MCP_ID, MCP_URL, "remote", None),
        ISSUER,
        &token_url,
    )
    .await;
    let client = register_client(&first, MCP_ID).await;

    let upstream_url = authorize_and_login(&first, MCP_ID, &client.client_id, "alice").await;
    let state = query_param(&upstream_url, "state").unwrap();

    let location = AxumTestRequest::get(&upstream_callback(&state, UPSTREAM_CODE))
        .send(second.router())
        .await
        .location();
    let code = query_param(&location, "code").unwrap();

    redeem_code(&second, MCP_ID, &client, &code, VERIFIER)
        .await
        .assert_status(StatusCode::OK);
    assert!(second
        .resources
        .upstream
        .stored_token("alice", MCP_ID)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_provider_error_denies_first_tier_request() {
    let gateway = create_test_gateway();
    let token_url = spawn_upstream_token_server().await;
    protect_server(
        &gateway,
        &remote_server(MCP_ID, MCP_URL, "remote", None),
        ISSUER,
        &token_url,
    )
    .await;
    let client = register_client(&gateway, MCP_ID).await;

    let upstream_url = authorize_and_login(&gateway, MCP_ID, &client.client_id, "alice").await;
    let state = query_param(&upstream_url, "state").unwrap();

    let query = serde_urlencoded::to_string([
        ("state", state.as_str()),
        ("error", "access_denied"),
        ("error_description", "user said no"),
    ])
    .unwrap();
    let location = AxumTestRequest::get(&format!("/oauth/mcp/callback?{query}"))
        .send(gateway.router())
        .await
        .location();
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));
    assert!(query_param(&location, "code").is_none());
    assert!(gateway
        .resources
        .upstream
        .stored_token("alice", MCP_ID)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_rejected_upstream_code_denies_first_tier_request() {
    let gateway = create_test_gateway();
    let token_url = spawn_upstream_token_server().await;
    protect_server(
        &gateway,
        &remote_server(MCP_ID, MCP_URL, "remote", None),
        ISSUER,
        &token_url,
    )
    .await;
    let client = register_client(&gateway, MCP_ID).await;

    let upstream_url = authorize_and_login(&gateway, MCP_ID, &client.client_id, "alice").await;
    let state = query_param(&upstream_url, "state").unwrap();

    let location = AxumTestRequest::get(&upstream_callback(&state, "bad-code"))
        .send(gateway.router())
        .await
        .location();
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));
}

#[tokio::test]
async fn test_unknown_state_is_direct_error() {
    let gateway = create_test_gateway();

    let error: OAuth2Error = AxumTestRequest::get(&upstream_callback("no-such-state", "x"))
        .send(gateway.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST)
        .json();
    assert_eq!(error.error, "invalid_request");

    AxumTestRequest::get("/oauth/mcp/callback?code=x")
        .send(gateway.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_probe_failure_fails_flow_with_redirect() {
    let gateway = create_test_gateway();
    gateway
        .store
        .upsert_mcp_server(&remote_server(MCP_ID, MCP_URL, "remote", None))
        .await
        .unwrap();
    gateway.prober.set(MCP_URL, StubProbe::Fail);
    let client = register_client(&gateway, MCP_ID).await;

    let location = authorize_and_login(&gateway, MCP_ID, &client.client_id, "alice").await;
    assert!(location.starts_with(REDIRECT_URI));
    assert!(query_param(&location, "error").is_some());
    assert!(query_param(&location, "code").is_none());
}

#[tokio::test]
async fn test_missing_upstream_app_fails_flow_with_redirect() {
    let gateway = create_test_gateway();
    gateway
        .store
        .upsert_mcp_server(&remote_server(MCP_ID, MCP_URL, "remote", None))
        .await
        .unwrap();
    gateway.prober.set(
        MCP_URL,
        StubProbe::Required(mcp_oauth_gateway::mcp::prober::UpstreamAuthRequirement {
            authorization_server_url: "https://unregistered.test".to_owned(),
            authorization_endpoint: "https://unregistered.test/authorize".to_owned(),
            token_endpoint: "https://unregistered.test/token".to_owned(),
            scopes: vec![],
        }),
    );
    let client = register_client(&gateway, MCP_ID).await;

    let location = authorize_and_login(&gateway, MCP_ID, &client.client_id, "alice").await;
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&location, "error").as_deref(), Some("invalid_request"));
}

#[tokio::test]
async fn test_sweeper_removes_expired_state() {
    let mut config = test_config();
    config.upstream.state_ttl = Duration::from_millis(100);
    let gateway = create_test_gateway_with(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryVault::new()),
        Arc::new(StubProber::default()),
    );
    let token_url = spawn_upstream_token_server().await;
    protect_server(
        &gateway,
        &remote_server(MCP_ID, MCP_URL, "remote", None),
        ISSUER,
        &token_url,
    )
    .await;
    let client = register_client(&gateway, MCP_ID).await;

    let upstream_url = authorize_and_login(&gateway, MCP_ID, &client.client_id, "alice").await;
    let state = query_param(&upstream_url, "state").unwrap();
    assert!(gateway.store.get_upstream_state(&state).await.unwrap().is_some());

    let sweeper = gateway.resources.spawn_sweeper(Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(400)).await;
    sweeper.shutdown().await;

    assert!(gateway.store.get_upstream_state(&state).await.unwrap().is_none());
    AxumTestRequest::get(&upstream_callback(&state, UPSTREAM_CODE))
        .send(gateway.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
