// ABOUTME: Resource store abstraction used for every gateway record
// ABOUTME: Typed CRUD plus the indexed lookups the OAuth flows depend on
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Resource Store
//!
//! The gateway never talks to a concrete backend. Every record goes through
//! [`GatewayStore`]; `delete_*` methods report whether a record was actually
//! removed so callers can build delete-before-use semantics on top of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AppResult;
use crate::models::{
    McpServer, OAuthAuthRequest, OAuthClient, OAuthToken, UpstreamOAuthApp, UpstreamStateRecord,
    User,
};

/// In-memory implementation
pub mod memory;

pub use memory::MemoryStore;

/// Narrow resource-store interface
#[async_trait]
pub trait GatewayStore: Send + Sync {
    // ================================
    // OAuth Clients
    // ================================

    /// Create a client; fails if `namespace:name` already exists
    async fn create_oauth_client(&self, client: &OAuthClient) -> AppResult<()>;

    /// Get a client by namespace and name
    async fn get_oauth_client(&self, namespace: &str, name: &str)
        -> AppResult<Option<OAuthClient>>;

    /// Replace an existing client; fails if it does not exist
    async fn update_oauth_client(&self, client: &OAuthClient) -> AppResult<()>;

    /// Delete a client, returning whether it existed
    async fn delete_oauth_client(&self, namespace: &str, name: &str) -> AppResult<bool>;

    // ================================
    // Authorization Requests
    // ================================

    /// Create an authorization request
    async fn create_auth_request(&self, request: &OAuthAuthRequest) -> AppResult<()>;

    /// Get an authorization request by id
    async fn get_auth_request(&self, id: &str) -> AppResult<Option<OAuthAuthRequest>>;

    /// Replace an existing authorization request
    async fn update_auth_request(&self, request: &OAuthAuthRequest) -> AppResult<()>;

    /// Delete an authorization request, returning whether it existed
    async fn delete_auth_request(&self, id: &str) -> AppResult<bool>;

    /// All requests whose current one-time code hashes to `hashed_code`
    async fn find_auth_requests_by_code_hash(
        &self,
        hashed_code: &str,
    ) -> AppResult<Vec<OAuthAuthRequest>>;

    /// Delete requests created before `cutoff`, returning how many were removed
    async fn delete_expired_auth_requests(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;

    // ================================
    // Refresh Tokens
    // ================================

    /// Store a refresh-token record
    async fn create_oauth_token(&self, token: &OAuthToken) -> AppResult<()>;

    /// Get a refresh-token record by hash
    async fn get_oauth_token(&self, hashed_token: &str) -> AppResult<Option<OAuthToken>>;

    /// Delete a refresh-token record, returning whether it existed
    async fn delete_oauth_token(&self, hashed_token: &str) -> AppResult<bool>;

    /// Delete every refresh-token record bound to a client
    async fn delete_oauth_tokens_for_client(&self, namespace: &str, name: &str)
        -> AppResult<usize>;

    /// Delete refresh-token records that expired before `now`
    async fn delete_expired_oauth_tokens(&self, now: DateTime<Utc>) -> AppResult<usize>;

    // ================================
    // Users
    // ================================

    /// Create or replace a user
    async fn upsert_user(&self, user: &User) -> AppResult<()>;

    /// Get a user by id
    async fn get_user(&self, id: &str) -> AppResult<Option<User>>;

    // ================================
    // MCP Servers
    // ================================

    /// Create or replace a server
    async fn upsert_mcp_server(&self, server: &McpServer) -> AppResult<()>;

    /// Get a server by id
    async fn get_mcp_server(&self, id: &str) -> AppResult<Option<McpServer>>;

    /// Component instances whose parent is `composite_id`
    async fn list_component_servers(&self, composite_id: &str) -> AppResult<Vec<McpServer>>;

    // ================================
    // Upstream OAuth Apps
    // ================================

    /// Create an upstream app
    async fn create_upstream_app(&self, app: &UpstreamOAuthApp) -> AppResult<()>;

    /// Apps registered for an authorization server (trailing slash insensitive)
    async fn find_upstream_apps_by_auth_server(
        &self,
        authorization_server_url: &str,
    ) -> AppResult<Vec<UpstreamOAuthApp>>;

    // ================================
    // Upstream Flow State
    // ================================

    /// Create or replace a durable upstream state record
    async fn upsert_upstream_state(&self, record: &UpstreamStateRecord) -> AppResult<()>;

    /// Get a durable upstream state record
    async fn get_upstream_state(&self, state: &str) -> AppResult<Option<UpstreamStateRecord>>;

    /// Delete a durable upstream state record, returning whether it existed
    async fn delete_upstream_state(&self, state: &str) -> AppResult<bool>;

    /// Delete records that expired before `now`, returning their states
    async fn delete_expired_upstream_states(&self, now: DateTime<Utc>) -> AppResult<Vec<String>>;
}
