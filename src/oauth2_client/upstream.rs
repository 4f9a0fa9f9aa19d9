// ABOUTME: Upstream OAuth bridge: the gateway acting as OAuth client for remote MCP servers
// ABOUTME: Correlates pending flows in memory and durably so any instance can finish a callback
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Upstream OAuth Bridge
//!
//! A flow starts when the prober reports that a remote server needs
//! authorization. [`UpstreamBridge::new_state`] persists the correlation
//! before anything else happens:
//!
//! - the durable [`UpstreamStateRecord`] (client config without its secret)
//! - the PKCE verifier, in the credential vault
//! - the in-memory [`PendingFlow`], with its authorization-URL promise
//!
//! A callback served by the originating process takes the cached flow. Any
//! other process rebuilds it from the durable record, the vault and a fresh
//! [`UpstreamBridge::lookup`] of the client secret.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::{OAuth2Client, OAuth2Config, OAuth2Token, PkceParams};
use super::state_cache::{AuthUrlReceiver, PendingFlow, UpstreamStateCache};
use crate::config::ServerConfig;
use crate::constants::{oauth, vault};
use crate::crypto::random_token;
use crate::errors::{AppError, AppResult};
use crate::mcp::prober::{AuthProbe, McpAuthProber, ProbeRequest, UpstreamAuthRequirement};
use crate::models::{McpRuntime, McpServer, UpstreamOAuthApp, UpstreamStateRecord};
use crate::storage::GatewayStore;
use crate::vault::{Credential, CredentialVault};

/// Credential value key of a PKCE verifier
const VERIFIER_KEY: &str = "code_verifier";
/// Credential value key of an upstream app secret
const CLIENT_SECRET_KEY: &str = "client_secret";
/// Credential value key of a serialized upstream token
const TOKEN_KEY: &str = "token";

/// Inputs of a new upstream flow
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// User the flow runs for
    pub user_id: String,
    /// Server the token is for
    pub mcp_id: String,
    /// First-tier request to resume afterwards
    pub auth_request_id: Option<String>,
    /// Issuer URL of the provider
    pub authorization_server_url: String,
    /// Client configuration including the secret
    pub config: OAuth2Config,
    /// PKCE parameters
    pub pkce: PkceParams,
}

/// Failed upstream callback, with the first-tier request it belonged to
#[derive(Debug)]
pub struct UpstreamCallbackError {
    /// Correlated first-tier request, when the state was recognised
    pub auth_request_id: Option<String>,
    /// What went wrong
    pub error: AppError,
}

impl UpstreamCallbackError {
    fn new(auth_request_id: Option<String>, error: AppError) -> Self {
        Self {
            auth_request_id,
            error,
        }
    }
}

/// OAuth client role of the gateway
pub struct UpstreamBridge {
    store: Arc<dyn GatewayStore>,
    vault: Arc<dyn CredentialVault>,
    prober: Arc<dyn McpAuthProber>,
    http: reqwest::Client,
    cache: UpstreamStateCache,
    redirect_uri: String,
    state_ttl: chrono::Duration,
    auth_url_wait: Duration,
    static_secrets: HashMap<String, String>,
}

fn verifier_context(state: &str) -> String {
    format!("{}{state}", vault::UPSTREAM_STATE_CONTEXT_PREFIX)
}

fn token_context(user_id: &str, mcp_id: &str) -> String {
    format!("{}{user_id}-{mcp_id}", vault::UPSTREAM_TOKEN_CONTEXT_PREFIX)
}

fn app_context(app_id: &str) -> String {
    format!("{}{app_id}", vault::UPSTREAM_APP_CONTEXT_PREFIX)
}

impl UpstreamBridge {
    /// Create a bridge from configuration and collaborators
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the state TTL is out of range
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn GatewayStore>,
        vault: Arc<dyn CredentialVault>,
        prober: Arc<dyn McpAuthProber>,
        http: reqwest::Client,
    ) -> AppResult<Self> {
        let state_ttl = chrono::Duration::from_std(config.upstream.state_ttl)
            .map_err(|e| AppError::config(format!("UPSTREAM_STATE_TTL_SECS out of range: {e}")))?;

        Ok(Self {
            store,
            vault,
            prober,
            http,
            cache: UpstreamStateCache::new(config.upstream.state_capacity, config.upstream.state_ttl),
            redirect_uri: config.upstream_redirect_uri(),
            state_ttl,
            auth_url_wait: config.upstream.auth_url_wait,
            static_secrets: config.upstream.static_secrets.clone(),
        })
    }

    /// Register a third-party OAuth app, storing its secret in the vault
    ///
    /// # Errors
    ///
    /// Returns an error if the app already exists or the vault rejects the secret
    pub async fn register_app(
        &self,
        app: &UpstreamOAuthApp,
        client_secret: Option<&str>,
    ) -> AppResult<()> {
        self.store.create_upstream_app(app).await?;
        if let Some(secret) = client_secret {
            self.vault
                .create(
                    Credential::new(app_context(&app.id), vault::UPSTREAM_APP_SECRET_NAME)
                        .with_value(CLIENT_SECRET_KEY, secret),
                )
                .await?;
        }
        info!(app_id = %app.id, issuer = %app.authorization_server_url, "Registered upstream OAuth app");
        Ok(())
    }

    /// Start a flow: persist its correlation and return the state with its URL promise
    ///
    /// # Errors
    ///
    /// Returns an error if the RNG, the vault or the store fails
    pub async fn new_state(&self, request: FlowRequest) -> AppResult<(String, AuthUrlReceiver)> {
        let state = random_token(oauth::SECRET_BYTES)?;
        let now = Utc::now();

        self.vault
            .create(
                Credential::new(verifier_context(&state), vault::UPSTREAM_VERIFIER_NAME)
                    .with_value(VERIFIER_KEY, request.pkce.code_verifier.clone()),
            )
            .await?;
        self.store
            .upsert_upstream_state(&UpstreamStateRecord {
                state: state.clone(),
                user_id: request.user_id.clone(),
                mcp_id: request.mcp_id.clone(),
                auth_request_id: request.auth_request_id.clone(),
                authorization_server_url: request.authorization_server_url.clone(),
                config: OAuth2Config {
                    client_secret: String::new(),
                    ..request.config.clone()
                },
                auth_url: None,
                created_at: now,
                expires_at: now + self.state_ttl,
            })
            .await?;

        let receiver = self
            .cache
            .insert(PendingFlow {
                state: state.clone(),
                user_id: request.user_id,
                mcp_id: request.mcp_id,
                auth_request_id: request.auth_request_id,
                authorization_server_url: request.authorization_server_url,
                config: request.config,
                pkce: request.pkce,
            })
            .await;

        debug!(state = %state, "Started upstream OAuth flow");
        Ok((state, receiver))
    }

    /// Record the computed authorization URL and resolve the flow's promise
    ///
    /// # Errors
    ///
    /// Returns an error if the durable record cannot be updated
    pub async fn handle_auth_url(&self, state: &str, auth_url: &str) -> AppResult<()> {
        if let Some(mut record) = self.store.get_upstream_state(state).await? {
            record.auth_url = Some(auth_url.to_owned());
            self.store.upsert_upstream_state(&record).await?;
        }
        if !self.cache.publish_auth_url(state, auth_url).await {
            debug!(state = %state, "No cached flow; authorization URL recorded durably only");
        }
        Ok(())
    }

    /// Wait (bounded) for a flow's authorization URL, then fall back to the durable record
    ///
    /// # Errors
    ///
    /// Returns an error if no URL is known after the wait
    pub async fn await_auth_url(
        &self,
        state: &str,
        mut receiver: AuthUrlReceiver,
    ) -> AppResult<String> {
        let waited = tokio::time::timeout(self.auth_url_wait, async {
            receiver
                .wait_for(Option::is_some)
                .await
                .map(|value| (*value).clone())
        })
        .await;
        if let Ok(Ok(Some(url))) = waited {
            return Ok(url);
        }

        self.store
            .get_upstream_state(state)
            .await?
            .and_then(|record| record.auth_url)
            .ok_or_else(|| {
                AppError::external_service(
                    "upstream OAuth",
                    format!("authorization URL for state {state} not available"),
                )
            })
    }

    /// Client credentials registered for an authorization server
    ///
    /// # Errors
    ///
    /// Returns not-found when no app matches and a conflict when several do
    pub async fn lookup(&self, authorization_server_url: &str) -> AppResult<(String, String)> {
        let (app, secret) = self.lookup_app(authorization_server_url).await?;
        Ok((app.client_id, secret))
    }

    async fn lookup_app(
        &self,
        authorization_server_url: &str,
    ) -> AppResult<(UpstreamOAuthApp, String)> {
        let mut apps = self
            .store
            .find_upstream_apps_by_auth_server(authorization_server_url)
            .await?;
        let app = match apps.len() {
            0 => {
                return Err(AppError::not_found(format!(
                    "OAuth app for authorization server {authorization_server_url}"
                )))
            }
            1 => apps.remove(0),
            n => {
                return Err(AppError::conflict(format!(
                    "{n} OAuth apps match authorization server {authorization_server_url}"
                )))
            }
        };

        let revealed = self
            .vault
            .reveal(&[app_context(&app.id)], vault::UPSTREAM_APP_SECRET_NAME)
            .await?;
        let secret = match revealed {
            Some(credential) => credential.value(CLIENT_SECRET_KEY)?.to_owned(),
            None => self.static_secrets.get(&app.id).cloned().unwrap_or_else(|| {
                debug!(app_id = %app.id, "No secret stored for upstream app; using public client");
                String::new()
            }),
        };
        Ok((app, secret))
    }

    /// Decide whether `server` needs an upstream authorization for `user_id`
    ///
    /// Returns the authorization URL to send the user to, or `None` when the
    /// server is usable as is.
    ///
    /// # Errors
    ///
    /// Returns an error if probing, app lookup or flow creation fails
    pub async fn check_auth(
        &self,
        user_id: &str,
        server: &McpServer,
        auth_request_id: Option<&str>,
    ) -> AppResult<Option<String>> {
        let McpRuntime::Remote { url, headers } = &server.runtime else {
            return Ok(None);
        };

        let access_token = self
            .stored_token(user_id, &server.id)
            .await?
            .filter(|token| !token.is_expired())
            .map(|token| token.access_token);

        let probe = self
            .prober
            .check_auth(&ProbeRequest {
                server_id: server.id.clone(),
                url: url.clone(),
                headers: headers.clone(),
                user_id: user_id.to_owned(),
                access_token,
            })
            .await?;

        match probe {
            AuthProbe::Authorized => Ok(None),
            AuthProbe::Required(requirement) => {
                if let Some(auth_url) = self.reuse_flow(user_id, &server.id, auth_request_id).await {
                    return Ok(Some(auth_url));
                }
                self.start_flow(user_id, &server.id, auth_request_id, requirement)
                    .await
                    .map(Some)
            }
        }
    }

    /// Authorization URL of a live flow already started for the same correlation
    async fn reuse_flow(
        &self,
        user_id: &str,
        mcp_id: &str,
        auth_request_id: Option<&str>,
    ) -> Option<String> {
        let state = self
            .cache
            .find_flow(user_id, mcp_id, auth_request_id)
            .await?;
        let receiver = self.cache.subscribe(&state).await?;
        match self.await_auth_url(&state, receiver).await {
            Ok(auth_url) => {
                debug!(state = %state, mcp_id = %mcp_id, "Reusing in-flight upstream OAuth flow");
                Some(auth_url)
            }
            Err(e) => {
                debug!(state = %state, error = %e, "In-flight upstream flow has no URL; starting another");
                None
            }
        }
    }

    async fn start_flow(
        &self,
        user_id: &str,
        mcp_id: &str,
        auth_request_id: Option<&str>,
        requirement: UpstreamAuthRequirement,
    ) -> AppResult<String> {
        let (app, client_secret) = self
            .lookup_app(&requirement.authorization_server_url)
            .await?;

        let config = OAuth2Config {
            client_id: app.client_id,
            client_secret,
            auth_url: app
                .authorization_endpoint
                .unwrap_or(requirement.authorization_endpoint),
            token_url: app.token_endpoint.unwrap_or(requirement.token_endpoint),
            redirect_uri: self.redirect_uri.clone(),
            scopes: if app.scopes.is_empty() {
                requirement.scopes
            } else {
                app.scopes
            },
            use_pkce: true,
        };
        let pkce = PkceParams::generate();
        let client = OAuth2Client::new(config.clone(), self.http.clone());

        let (state, receiver) = self
            .new_state(FlowRequest {
                user_id: user_id.to_owned(),
                mcp_id: mcp_id.to_owned(),
                auth_request_id: auth_request_id.map(str::to_owned),
                authorization_server_url: requirement.authorization_server_url,
                config,
                pkce: pkce.clone(),
            })
            .await?;

        let auth_url = client.get_authorization_url_with_pkce(&state, &pkce)?;
        self.handle_auth_url(&state, &auth_url).await?;
        self.await_auth_url(&state, receiver).await
    }

    /// Finish a flow from the provider's redirect
    ///
    /// Returns the correlated first-tier request id, or an empty string for a
    /// standalone login.
    ///
    /// # Errors
    ///
    /// Returns the failure together with the correlated request id, if known
    pub async fn resolve_callback(
        &self,
        state: &str,
        code: Option<&str>,
        error: Option<&str>,
        error_description: Option<&str>,
    ) -> Result<String, UpstreamCallbackError> {
        let flow = match self.cache.take(state).await {
            Some(flow) => Arc::unwrap_or_clone(flow),
            None => self
                .recover_flow(state)
                .await
                .map_err(|e| UpstreamCallbackError::new(None, e))?,
        };
        let auth_request_id = flow.auth_request_id.clone();

        let outcome = self.complete_flow(&flow, code, error, error_description).await;
        self.discard_state(state).await;

        outcome
            .map(|()| auth_request_id.clone().unwrap_or_default())
            .map_err(|e| UpstreamCallbackError::new(auth_request_id, e))
    }

    async fn complete_flow(
        &self,
        flow: &PendingFlow,
        code: Option<&str>,
        error: Option<&str>,
        error_description: Option<&str>,
    ) -> AppResult<()> {
        if let Some(error) = error {
            return Err(AppError::external_auth_failed(format!(
                "authorization server returned {error}: {}",
                error_description.unwrap_or_default()
            )));
        }
        let code = code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AppError::invalid_input("Missing authorization code"))?;

        let token = OAuth2Client::new(flow.config.clone(), self.http.clone())
            .exchange_code_with_pkce(code, &flow.pkce)
            .await?;

        self.vault
            .create(
                Credential::new(
                    token_context(&flow.user_id, &flow.mcp_id),
                    vault::UPSTREAM_TOKEN_NAME,
                )
                .with_value(TOKEN_KEY, serde_json::to_string(&token)?),
            )
            .await?;

        info!(
            user_id = %flow.user_id,
            mcp_id = %flow.mcp_id,
            "Stored upstream OAuth token"
        );
        Ok(())
    }

    async fn recover_flow(&self, state: &str) -> AppResult<PendingFlow> {
        let record = self
            .store
            .get_upstream_state(state)
            .await?
            .ok_or_else(|| AppError::not_found("upstream OAuth state"))?;
        if record.expires_at <= Utc::now() {
            self.discard_state(state).await;
            return Err(AppError::auth_expired());
        }

        let verifier = self
            .vault
            .reveal(&[verifier_context(state)], vault::UPSTREAM_VERIFIER_NAME)
            .await?
            .ok_or_else(|| AppError::not_found("PKCE verifier for upstream OAuth state"))?;
        let pkce = PkceParams::from_verifier(verifier.value(VERIFIER_KEY)?.to_owned());

        let (_, client_secret) = self.lookup(&record.authorization_server_url).await?;
        let mut config = record.config;
        config.client_secret = client_secret;

        info!(state = %state, "Recovered upstream OAuth flow from durable state");
        Ok(PendingFlow {
            state: record.state,
            user_id: record.user_id,
            mcp_id: record.mcp_id,
            auth_request_id: record.auth_request_id,
            authorization_server_url: record.authorization_server_url,
            config,
            pkce,
        })
    }

    async fn discard_state(&self, state: &str) {
        if let Err(e) = self.store.delete_upstream_state(state).await {
            warn!(state = %state, error = %e, "Failed to delete upstream OAuth state");
        }
        if let Err(e) = self
            .vault
            .delete(&verifier_context(state), vault::UPSTREAM_VERIFIER_NAME)
            .await
        {
            warn!(state = %state, error = %e, "Failed to delete upstream PKCE verifier");
        }
    }

    /// Upstream token stored for a user and server
    ///
    /// # Errors
    ///
    /// Returns an error if the vault fails or the stored value is corrupt
    pub async fn stored_token(&self, user_id: &str, mcp_id: &str) -> AppResult<Option<OAuth2Token>> {
        let Some(credential) = self
            .vault
            .reveal(&[token_context(user_id, mcp_id)], vault::UPSTREAM_TOKEN_NAME)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(credential.value(TOKEN_KEY)?)?))
    }

    /// Remove expired flows from memory and from durable storage
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list expired records
    pub async fn sweep(&self) -> AppResult<usize> {
        let cached = self.cache.remove_expired().await;
        let expired = self.store.delete_expired_upstream_states(Utc::now()).await?;
        for state in &expired {
            if let Err(e) = self
                .vault
                .delete(&verifier_context(state), vault::UPSTREAM_VERIFIER_NAME)
                .await
            {
                warn!(state = %state, error = %e, "Failed to delete expired PKCE verifier");
            }
        }
        if cached > 0 || !expired.is_empty() {
            debug!(cached, durable = expired.len(), "Swept expired upstream OAuth state");
        }
        Ok(cached.max(expired.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::vault::MemoryVault;
    use async_trait::async_trait;

    struct NeverProbed;

    #[async_trait]
    impl McpAuthProber for NeverProbed {
        async fn check_auth(&self, _request: &ProbeRequest) -> AppResult<AuthProbe> {
            Ok(AuthProbe::Authorized)
        }
    }

    fn bridge(store: Arc<MemoryStore>, vault: Arc<MemoryVault>) -> UpstreamBridge {
        let mut config = ServerConfig::default();
        config.upstream.auth_url_wait = Duration::from_millis(50);
        config
            .upstream
            .static_secrets
            .insert("static-app".to_owned(), "static-secret".to_owned());
        UpstreamBridge::new(
            &config,
            store,
            vault,
            Arc::new(NeverProbed),
            reqwest::Client::new(),
        )
        .unwrap()
    }

    fn app(id: &str, issuer: &str) -> UpstreamOAuthApp {
        UpstreamOAuthApp {
            id: id.to_owned(),
            authorization_server_url: issuer.to_owned(),
            client_id: format!("{id}-client"),
            authorization_endpoint: None,
            token_endpoint: None,
            scopes: vec![],
        }
    }

    fn flow_request() -> FlowRequest {
        FlowRequest {
            user_id: "u1".to_owned(),
            mcp_id: "srv".to_owned(),
            auth_request_id: Some("req-1".to_owned()),
            authorization_server_url: "https://auth.example.com".to_owned(),
            config: OAuth2Config {
                client_id: "cid".to_owned(),
                client_secret: "secret".to_owned(),
                auth_url: "https://auth.example.com/authorize".to_owned(),
                token_url: "https://auth.example.com/token".to_owned(),
                redirect_uri: "http://localhost:8080/oauth/mcp/callback".to_owned(),
                scopes: vec![],
                use_pkce: true,
            },
            pkce: PkceParams::generate(),
        }
    }

    #[tokio::test]
    async fn test_new_state_is_durable_before_returning() {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(MemoryVault::new());
        let bridge = bridge(store.clone(), vault.clone());

        let request = flow_request();
        let verifier = request.pkce.code_verifier.clone();
        let (state, _receiver) = bridge.new_state(request).await.unwrap();

        let record = store.get_upstream_state(&state).await.unwrap().unwrap();
        assert_eq!(record.auth_request_id.as_deref(), Some("req-1"));
        assert!(record.config.client_secret.is_empty());
        let stored = vault
            .reveal(&[verifier_context(&state)], vault::UPSTREAM_VERIFIER_NAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.value(VERIFIER_KEY).unwrap(), verifier);
    }

    #[tokio::test]
    async fn test_auth_url_promise_and_durable_fallback() {
        let store = Arc::new(MemoryStore::new());
        let bridge = bridge(store.clone(), Arc::new(MemoryVault::new()));

        let (state, receiver) = bridge.new_state(flow_request()).await.unwrap();
        bridge
            .handle_auth_url(&state, "https://auth.example.com/authorize?x=1")
            .await
            .unwrap();
        assert_eq!(
            bridge.await_auth_url(&state, receiver).await.unwrap(),
            "https://auth.example.com/authorize?x=1"
        );

        // A receiver that never resolves falls back to the durable record
        let (_tx, never) = tokio::sync::watch::channel(None);
        assert_eq!(
            bridge.await_auth_url(&state, never).await.unwrap(),
            "https://auth.example.com/authorize?x=1"
        );
    }

    #[tokio::test]
    async fn test_lookup_requires_exactly_one_app() {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(MemoryVault::new());
        let bridge = bridge(store.clone(), vault);

        assert!(bridge.lookup("https://none.example.com").await.is_err());

        bridge
            .register_app(&app("gh", "https://github.com/"), Some("gh-secret"))
            .await
            .unwrap();
        assert_eq!(
            bridge.lookup("https://github.com").await.unwrap(),
            ("gh-client".to_owned(), "gh-secret".to_owned())
        );

        bridge
            .register_app(&app("static-app", "https://static.example.com"), None)
            .await
            .unwrap();
        assert_eq!(
            bridge.lookup("https://static.example.com").await.unwrap().1,
            "static-secret"
        );

        bridge
            .register_app(&app("gh2", "https://github.com"), None)
            .await
            .unwrap();
        assert!(bridge.lookup("https://github.com").await.is_err());
    }

    #[tokio::test]
    async fn test_provider_error_is_propagated_with_correlation() {
        let store = Arc::new(MemoryStore::new());
        let bridge = bridge(store.clone(), Arc::new(MemoryVault::new()));

        let (state, _receiver) = bridge.new_state(flow_request()).await.unwrap();
        let err = bridge
            .resolve_callback(&state, None, Some("access_denied"), Some("user said no"))
            .await
            .unwrap_err();
        assert_eq!(err.auth_request_id.as_deref(), Some("req-1"));
        assert!(store.get_upstream_state(&state).await.unwrap().is_none());

        let unknown = bridge
            .resolve_callback("missing", Some("code"), None, None)
            .await
            .unwrap_err();
        assert!(unknown.auth_request_id.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_durable_state() {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(MemoryVault::new());
        let mut config = ServerConfig::default();
        config.upstream.state_ttl = Duration::from_millis(10);
        let bridge = UpstreamBridge::new(
            &config,
            store.clone(),
            vault.clone(),
            Arc::new(NeverProbed),
            reqwest::Client::new(),
        )
        .unwrap();

        let (state, _receiver) = bridge.new_state(flow_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(bridge.sweep().await.unwrap(), 1);
        assert!(store.get_upstream_state(&state).await.unwrap().is_none());
        assert!(vault
            .reveal(&[verifier_context(&state)], vault::UPSTREAM_VERIFIER_NAME)
            .await
            .unwrap()
            .is_none());
    }

    struct RequiresAuth;

    #[async_trait]
    impl McpAuthProber for RequiresAuth {
        async fn check_auth(&self, _request: &ProbeRequest) -> AppResult<AuthProbe> {
            Ok(AuthProbe::Required(UpstreamAuthRequirement {
                authorization_server_url: "https://auth.example.com".to_owned(),
                authorization_endpoint: "https://auth.example.com/authorize".to_owned(),
                token_endpoint: "https://auth.example.com/token".to_owned(),
                scopes: vec!["read".to_owned()],
            }))
        }
    }

    #[tokio::test]
    async fn test_repeated_checks_reuse_the_live_flow() {
        let store = Arc::new(MemoryStore::new());
        let mut config = ServerConfig::default();
        config.upstream.auth_url_wait = Duration::from_millis(50);
        let bridge = UpstreamBridge::new(
            &config,
            store.clone(),
            Arc::new(MemoryVault::new()),
            Arc::new(RequiresAuth),
            reqwest::Client::new(),
        )
        .unwrap();
        bridge
            .register_app(&app("ex", "https://auth.example.com"), Some("ex-secret"))
            .await
            .unwrap();
        let server = McpServer {
            id: "srv".to_owned(),
            name: "srv".to_owned(),
            user_id: None,
            catalog_entry_id: None,
            composite_id: None,
            runtime: McpRuntime::Remote {
                url: "https://mcp.example.com/mcp".to_owned(),
                headers: HashMap::new(),
            },
        };

        let first = bridge.check_auth("u1", &server, Some("req-1")).await.unwrap().unwrap();
        let again = bridge.check_auth("u1", &server, Some("req-1")).await.unwrap().unwrap();
        assert_eq!(first, again);

        let other_request = bridge.check_auth("u1", &server, Some("req-2")).await.unwrap().unwrap();
        let other_user = bridge.check_auth("u2", &server, Some("req-1")).await.unwrap().unwrap();
        assert_ne!(first, other_request);
        assert_ne!(first, other_user);
        assert_ne!(other_request, other_user);
    }
}
