// ABOUTME: DashMap-backed resource store for single-process deployments and tests
// ABOUTME: Removal through DashMap::remove makes delete-before-use race free within a process
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::GatewayStore;
use crate::errors::{AppError, AppResult};
use crate::models::{
    McpServer, OAuthAuthRequest, OAuthClient, OAuthToken, UpstreamOAuthApp, UpstreamStateRecord,
    User,
};

/// In-memory [`GatewayStore`]
#[derive(Default)]
pub struct MemoryStore {
    clients: DashMap<(String, String), OAuthClient>,
    auth_requests: DashMap<String, OAuthAuthRequest>,
    tokens: DashMap<String, OAuthToken>,
    users: DashMap<String, User>,
    servers: DashMap<String, McpServer>,
    upstream_apps: DashMap<String, UpstreamOAuthApp>,
    upstream_states: DashMap<String, UpstreamStateRecord>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn client_key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_owned(), name.to_owned())
}

fn normalize_issuer(url: &str) -> &str {
    url.trim_end_matches('/')
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn create_oauth_client(&self, client: &OAuthClient) -> AppResult<()> {
        let key = client_key(&client.namespace, &client.name);
        if self.clients.contains_key(&key) {
            return Err(AppError::conflict(format!(
                "OAuth client {} already exists",
                client.client_id()
            )));
        }
        self.clients.insert(key, client.clone());
        Ok(())
    }

    async fn get_oauth_client(
        &self,
        namespace: &str,
        name: &str,
    ) -> AppResult<Option<OAuthClient>> {
        Ok(self
            .clients
            .get(&client_key(namespace, name))
            .map(|entry| entry.value().clone()))
    }

    async fn update_oauth_client(&self, client: &OAuthClient) -> AppResult<()> {
        let key = client_key(&client.namespace, &client.name);
        match self.clients.get_mut(&key) {
            Some(mut entry) => {
                *entry = client.clone();
                Ok(())
            }
            None => Err(AppError::not_found(format!(
                "OAuth client {}",
                client.client_id()
            ))),
        }
    }

    async fn delete_oauth_client(&self, namespace: &str, name: &str) -> AppResult<bool> {
        Ok(self.clients.remove(&client_key(namespace, name)).is_some())
    }

    async fn create_auth_request(&self, request: &OAuthAuthRequest) -> AppResult<()> {
        self.auth_requests
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_auth_request(&self, id: &str) -> AppResult<Option<OAuthAuthRequest>> {
        Ok(self.auth_requests.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_auth_request(&self, request: &OAuthAuthRequest) -> AppResult<()> {
        match self.auth_requests.get_mut(&request.id) {
            Some(mut entry) => {
                *entry = request.clone();
                Ok(())
            }
            None => Err(AppError::not_found(format!(
                "OAuth authorization request {}",
                request.id
            ))),
        }
    }

    async fn delete_auth_request(&self, id: &str) -> AppResult<bool> {
        Ok(self.auth_requests.remove(id).is_some())
    }

    async fn find_auth_requests_by_code_hash(
        &self,
        hashed_code: &str,
    ) -> AppResult<Vec<OAuthAuthRequest>> {
        Ok(self
            .auth_requests
            .iter()
            .filter(|entry| entry.hashed_auth_code.as_deref() == Some(hashed_code))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_expired_auth_requests(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let before = self.auth_requests.len();
        self.auth_requests
            .retain(|_, request| request.created_at >= cutoff);
        Ok(before.saturating_sub(self.auth_requests.len()))
    }

    async fn create_oauth_token(&self, token: &OAuthToken) -> AppResult<()> {
        self.tokens
            .insert(token.hashed_token.clone(), token.clone());
        Ok(())
    }

    async fn get_oauth_token(&self, hashed_token: &str) -> AppResult<Option<OAuthToken>> {
        Ok(self.tokens.get(hashed_token).map(|entry| entry.value().clone()))
    }

    async fn delete_oauth_token(&self, hashed_token: &str) -> AppResult<bool> {
        Ok(self.tokens.remove(hashed_token).is_some())
    }

    async fn delete_oauth_tokens_for_client(
        &self,
        namespace: &str,
        name: &str,
    ) -> AppResult<usize> {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, token| !(token.client_namespace == namespace && token.client_name == name));
        Ok(before.saturating_sub(self.tokens.len()))
    }

    async fn delete_expired_oauth_tokens(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| token.expires_at > now);
        Ok(before.saturating_sub(self.tokens.len()))
    }

    async fn upsert_user(&self, user: &User) -> AppResult<()> {
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &str) -> AppResult<Option<User>> {
        Ok(self.users.get(id).map(|entry| entry.value().clone()))
    }

    async fn upsert_mcp_server(&self, server: &McpServer) -> AppResult<()> {
        self.servers.insert(server.id.clone(), server.clone());
        Ok(())
    }

    async fn get_mcp_server(&self, id: &str) -> AppResult<Option<McpServer>> {
        Ok(self.servers.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_component_servers(&self, composite_id: &str) -> AppResult<Vec<McpServer>> {
        let mut servers: Vec<McpServer> = self
            .servers
            .iter()
            .filter(|entry| entry.composite_id.as_deref() == Some(composite_id))
            .map(|entry| entry.value().clone())
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(servers)
    }

    async fn create_upstream_app(&self, app: &UpstreamOAuthApp) -> AppResult<()> {
        if self.upstream_apps.contains_key(&app.id) {
            return Err(AppError::conflict(format!(
                "Upstream OAuth app {} already exists",
                app.id
            )));
        }
        self.upstream_apps.insert(app.id.clone(), app.clone());
        Ok(())
    }

    async fn find_upstream_apps_by_auth_server(
        &self,
        authorization_server_url: &str,
    ) -> AppResult<Vec<UpstreamOAuthApp>> {
        let wanted = normalize_issuer(authorization_server_url);
        Ok(self
            .upstream_apps
            .iter()
            .filter(|entry| normalize_issuer(&entry.authorization_server_url) == wanted)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn upsert_upstream_state(&self, record: &UpstreamStateRecord) -> AppResult<()> {
        self.upstream_states
            .insert(record.state.clone(), record.clone());
        Ok(())
    }

    async fn get_upstream_state(&self, state: &str) -> AppResult<Option<UpstreamStateRecord>> {
        Ok(self
            .upstream_states
            .get(state)
            .map(|entry| entry.value().clone()))
    }

    async fn delete_upstream_state(&self, state: &str) -> AppResult<bool> {
        Ok(self.upstream_states.remove(state).is_some())
    }

    async fn delete_expired_upstream_states(&self, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        let expired: Vec<String> = self
            .upstream_states
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for state in &expired {
            self.upstream_states.remove(state);
        }
        Ok(expired)
    }
}
