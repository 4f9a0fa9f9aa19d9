// ABOUTME: Composite auth coordinator deciding when a composite server's first-tier flow may finish
// ABOUTME: Reports components still lacking upstream authorization and finalizes once none remain
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::endpoints::OAuth2AuthorizationServer;
use super::models::{OAuth2Error, PendingComponent};
use crate::auth::Identity;
use crate::models::{AuthRequestStatus, McpRuntime};

/// Result of one composite check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeOutcome {
    /// Components still needing authorization; poll again after driving each URL
    Pending(Vec<PendingComponent>),
    /// Every component is authorized and the first-tier flow was finalized
    Finalized(String),
    /// Every component is authorized; no first-tier flow to finish
    Complete,
}

impl OAuth2AuthorizationServer {
    /// Check which enabled remote components of `mcp_id` still need authorization
    ///
    /// Probe failures exclude a component from the pending set instead of
    /// failing the check. With an `auth_request_id` the caller must be the
    /// user who logged in on that request; once nothing is pending the
    /// request is finalized, and a finalized request is never finalized twice.
    ///
    /// # Errors
    /// Returns an error if the composite or the request is unknown, or the caller is not its user
    pub async fn check_composite_auth(
        &self,
        mcp_id: &str,
        auth_request_id: Option<&str>,
        identity: Option<Identity>,
    ) -> Result<CompositeOutcome, OAuth2Error> {
        let store = &self.resources.store;
        let composite = store
            .get_mcp_server(mcp_id)
            .await?
            .ok_or_else(|| OAuth2Error::invalid_request("Unknown composite server"))?;
        let McpRuntime::Composite { components } = &composite.runtime else {
            return Err(OAuth2Error::invalid_request("Server is not a composite"));
        };
        let disabled: HashSet<&str> = components
            .iter()
            .filter(|component| component.disabled)
            .map(|component| component.catalog_entry_id.as_str())
            .collect();

        let identity = identity.filter(Identity::can_complete_flow);
        let request = match auth_request_id {
            Some(id) => Some(self.load_request(id).await?),
            None => None,
        };
        if let Some(request) = &request {
            if request.mcp_id != mcp_id {
                return Err(OAuth2Error::invalid_request(
                    "Authorization request belongs to another server",
                ));
            }
            let owner = identity.as_ref().map(|identity| identity.user_id.as_str());
            if request.user_id.is_none() || request.user_id.as_deref() != owner {
                warn!(
                    auth_request_id = %request.id,
                    "Composite check by a caller who does not own the authorization request"
                );
                return Err(OAuth2Error::access_denied(
                    "Authorization request belongs to another user",
                ));
            }
            if request.status == AuthRequestStatus::Finalized {
                return Err(OAuth2Error::invalid_request(
                    "Authorization request already completed",
                ));
            }
        }

        let user_id = identity
            .map(|identity| identity.user_id)
            .ok_or_else(|| OAuth2Error::access_denied("An authenticated user is required"))?;

        let mut pending = Vec::new();
        for server in store.list_component_servers(mcp_id).await? {
            let component_id = server
                .catalog_entry_id
                .clone()
                .unwrap_or_else(|| server.id.clone());
            if disabled.contains(component_id.as_str()) {
                debug!(component_id = %component_id, "Skipping disabled component");
                continue;
            }
            if server.remote_url().is_none() {
                continue;
            }

            match self
                .resources
                .upstream
                .check_auth(&user_id, &server, auth_request_id)
                .await
            {
                Ok(Some(auth_url)) => pending.push(PendingComponent {
                    component_id,
                    component_server_id: server.id,
                    auth_url,
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        component_server_id = %server.id,
                        error = %e,
                        "Component auth check failed; excluding it from pending set"
                    );
                }
            }
        }

        if !pending.is_empty() {
            debug!(mcp_id = %mcp_id, pending = pending.len(), "Composite components awaiting authorization");
            return Ok(CompositeOutcome::Pending(pending));
        }

        let Some(mut request) = request else {
            return Ok(CompositeOutcome::Complete);
        };
        info!(mcp_id = %mcp_id, auth_request_id = %request.id, "All composite components authorized");
        match self.finalize(&mut request).await {
            Ok(location) => Ok(CompositeOutcome::Finalized(location)),
            Err(error) => Ok(CompositeOutcome::Finalized(Self::redirect_error(&request, error))),
        }
    }
}
