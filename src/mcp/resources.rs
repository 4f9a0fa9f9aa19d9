// ABOUTME: Centralized resource container for dependency injection in the gateway
// ABOUTME: Wires store, vault, token issuer, client registry and upstream bridge once at startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Server Resources Module
//!
//! Every handler receives one `Arc<ServerResources>` as axum state. The
//! expensive collaborators are built here exactly once and shared.
//!
//! The container also owns the background sweep that expires pending
//! upstream flows, abandoned authorization requests and refresh tokens.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::AuthManager;
use crate::config::ServerConfig;
use crate::crypto::JwksManager;
use crate::errors::AppResult;
use crate::mcp::prober::McpAuthProber;
use crate::oauth2_client::UpstreamBridge;
use crate::oauth2_server::client_registration::ClientRegistrationManager;
use crate::oauth2_server::session::{AcceptAllSessions, SessionValidator};
use crate::storage::GatewayStore;
use crate::vault::CredentialVault;

/// Handle on the background sweep task
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep and wait for it to exit
    pub async fn shutdown(self) {
        if let Err(e) = self.shutdown_tx.send(()).await {
            debug!(error = ?e, "Sweeper shutdown signal send failed (task already gone)");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Expired state sweeper exited abnormally");
        }
    }
}

/// Records removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Upstream flows, cached or durable
    pub upstream_states: usize,
    /// Authorization requests older than the request lifetime
    pub auth_requests: usize,
    /// Refresh tokens past their expiry
    pub refresh_tokens: usize,
}

/// Centralized resource container for dependency injection
#[derive(Clone)]
pub struct ServerResources {
    /// Environment configuration
    pub config: Arc<ServerConfig>,
    /// Resource store
    pub store: Arc<dyn GatewayStore>,
    /// Credential vault
    pub vault: Arc<dyn CredentialVault>,
    /// Signing key set
    pub jwks_manager: Arc<JwksManager>,
    /// Token issuer
    pub auth_manager: Arc<AuthManager>,
    /// First-tier client registry
    pub client_registry: Arc<ClientRegistrationManager>,
    /// Upstream OAuth client role
    pub upstream: Arc<UpstreamBridge>,
    /// Auth-provider session check for redemptions
    pub session_validator: Arc<dyn SessionValidator>,
}

impl ServerResources {
    /// Create new server resources with proper Arc sharing
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream bridge rejects the configuration
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn GatewayStore>,
        vault: Arc<dyn CredentialVault>,
        prober: Arc<dyn McpAuthProber>,
        http: reqwest::Client,
    ) -> AppResult<Self> {
        let config = Arc::new(config);
        let jwks_manager = Arc::new(JwksManager::new(vault.clone()));
        let auth_manager = Arc::new(AuthManager::new(
            jwks_manager.clone(),
            config.base_url.clone(),
            config.oauth.access_token_ttl_secs,
        ));
        let client_registry = Arc::new(ClientRegistrationManager::new(
            store.clone(),
            config.clone(),
        ));
        let upstream = Arc::new(UpstreamBridge::new(
            &config,
            store.clone(),
            vault.clone(),
            prober,
            http,
        )?);

        Ok(Self {
            config,
            store,
            vault,
            jwks_manager,
            auth_manager,
            client_registry,
            upstream,
            session_validator: Arc::new(AcceptAllSessions),
        })
    }

    /// Replace the session validator
    #[must_use]
    pub fn with_session_validator(mut self, validator: Arc<dyn SessionValidator>) -> Self {
        self.session_validator = validator;
        self
    }

    /// Remove expired upstream flows, stale authorization requests and expired refresh tokens
    ///
    /// Each kind is swept independently; a failure is logged and the
    /// remaining kinds are still swept.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let now = Utc::now();

        match self.upstream.sweep().await {
            Ok(removed) => stats.upstream_states = removed,
            Err(e) => warn!(error = %e, "Upstream state sweep failed"),
        }

        let cutoff = now - ChronoDuration::seconds(self.config.oauth.auth_request_ttl_secs);
        match self.store.delete_expired_auth_requests(cutoff).await {
            Ok(removed) => stats.auth_requests = removed,
            Err(e) => warn!(error = %e, "Failed to delete stale authorization requests"),
        }

        match self.store.delete_expired_oauth_tokens(now).await {
            Ok(removed) => stats.refresh_tokens = removed,
            Err(e) => warn!(error = %e, "Failed to delete expired refresh tokens"),
        }

        if stats != SweepStats::default() {
            debug!(
                upstream_states = stats.upstream_states,
                auth_requests = stats.auth_requests,
                refresh_tokens = stats.refresh_tokens,
                "Swept expired gateway state"
            );
        }
        stats
    }

    /// Run [`Self::sweep`] every `period` until shut down
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let resources = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        resources.sweep().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Expired state sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}
