// ABOUTME: Persistent record types for OAuth clients, auth requests, refresh tokens and MCP servers
// ABOUTME: Shared by the resource store, the first-tier authorization server and the upstream bridge
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Gateway Records
//!
//! Everything the gateway persists through [`crate::storage::GatewayStore`].
//! Secrets never appear here in plaintext: client secrets and registration
//! tokens are bcrypt hashes, one-time codes and refresh tokens are SHA-256
//! hashes, and upstream secrets live in the credential vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::oauth2_client::client::OAuth2Config;

/// Client-supplied registration metadata (RFC 7591)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientManifest {
    /// Registered redirect URIs; exact match required at `/authorize`
    pub redirect_uris: Vec<String>,
    /// Allowed grant types
    pub grant_types: Vec<String>,
    /// Allowed response types
    pub response_types: Vec<String>,
    /// Token endpoint authentication method
    pub token_endpoint_auth_method: String,
    /// Space-separated scopes the client may request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Human-readable client name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Client homepage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    /// Client logo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

/// A first-tier OAuth client, dynamic or static
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    /// Namespace half of the external `client_id`
    pub namespace: String,
    /// Name half of the external `client_id`
    pub name: String,
    /// Registration metadata
    pub manifest: ClientManifest,
    /// Target server the client registered against
    pub mcp_id: Option<String>,
    /// bcrypt hash of the client secret
    pub client_secret_hash: Option<String>,
    /// When the current secret was issued; `None` forces rotation
    pub client_secret_issued_at: Option<DateTime<Utc>>,
    /// When the current secret expires
    pub client_secret_expires_at: Option<DateTime<Utc>>,
    /// bcrypt hash of the registration access token
    pub registration_token_hash: Option<String>,
    /// When the current registration token was issued; `None` forces rotation
    pub registration_token_issued_at: Option<DateTime<Utc>>,
    /// When the current registration token expires
    pub registration_token_expires_at: Option<DateTime<Utc>>,
    /// Admin-created rather than dynamically registered
    pub is_static: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    /// External `client_id` (`namespace:name`)
    #[must_use]
    pub fn client_id(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }

    /// Whether the client authenticates without a secret
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.manifest.token_endpoint_auth_method == crate::constants::oauth::AUTH_METHOD_NONE
    }
}

/// Split an external `client_id` into `(namespace, name)`
#[must_use]
pub fn parse_client_id(client_id: &str) -> Option<(&str, &str)> {
    client_id
        .split_once(':')
        .filter(|(namespace, name)| !namespace.is_empty() && !name.is_empty() && !name.contains(':'))
}

/// Identity provider that authenticated a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProviderRef {
    /// Provider namespace
    pub namespace: String,
    /// Provider name
    pub name: String,
    /// User id at the provider
    pub user_id: String,
}

/// Lifecycle of a first-tier authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequestStatus {
    /// Created at `/authorize`, waiting for user login
    Pending,
    /// Logged in, waiting for one or more upstream authorizations
    AwaitingUpstream,
    /// Code delivered to the client; no further code may be issued
    Finalized,
}

/// One first-tier flow in progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAuthRequest {
    /// Request id embedded in the login continuation URL
    pub id: String,
    /// Client namespace
    pub client_namespace: String,
    /// Client name
    pub client_name: String,
    /// Target server
    pub mcp_id: String,
    /// Trusted redirect URI
    pub redirect_uri: String,
    /// Client `state` parameter echoed back
    pub state: Option<String>,
    /// Requested scopes
    pub scope: Option<String>,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE challenge method
    pub code_challenge_method: Option<String>,
    /// Requested audience
    pub resource: String,
    /// Grant type the code will be redeemed with
    pub grant_type: String,
    /// SHA-256 of the current one-time code
    pub hashed_auth_code: Option<String>,
    /// When the current code was issued
    pub code_issued_at: Option<DateTime<Utc>>,
    /// Authenticated user
    pub user_id: Option<String>,
    /// Provider that authenticated the user
    pub auth_provider: Option<AuthProviderRef>,
    /// Lifecycle state
    pub status: AuthRequestStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Refresh token record keyed by the SHA-256 of the opaque token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    /// SHA-256 of the refresh token (hex)
    pub hashed_token: String,
    /// Client namespace
    pub client_namespace: String,
    /// Client name
    pub client_name: String,
    /// Token owner
    pub user_id: String,
    /// Target server
    pub mcp_id: String,
    /// Audience of minted access tokens
    pub resource: String,
    /// Granted scopes
    pub scope: Option<String>,
    /// Provider that authenticated the user
    pub auth_provider: Option<AuthProviderRef>,
    /// Issue time
    pub created_at: DateTime<Utc>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

/// Platform user as seen by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user id
    pub id: String,
    /// Login name
    pub username: String,
    /// Display name
    pub display_name: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// Group memberships
    pub groups: Vec<String>,
    /// Provider that last authenticated the user
    pub auth_provider: Option<AuthProviderRef>,
}

/// Component reference declared by a composite server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Catalog entry the component is instantiated from
    pub catalog_entry_id: String,
    /// Excluded from the composite
    #[serde(default)]
    pub disabled: bool,
}

/// How an MCP server is run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "runtime", rename_all = "snake_case")]
pub enum McpRuntime {
    /// Reached over HTTP; may sit behind a third-party authorization server
    Remote {
        /// Server URL
        url: String,
        /// Extra headers sent with every request
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Local subprocess; never has an OAuth leg
    Local {
        /// Launch command
        command: String,
    },
    /// Assembled from component servers
    Composite {
        /// Declared components
        components: Vec<ComponentRef>,
    },
}

/// An MCP server instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    /// Server id (`mcp_id` in routes)
    pub id: String,
    /// Display name
    pub name: String,
    /// Owner
    pub user_id: Option<String>,
    /// Catalog entry this instance came from
    pub catalog_entry_id: Option<String>,
    /// Parent composite server, for component instances
    pub composite_id: Option<String>,
    /// Runtime
    #[serde(flatten)]
    pub runtime: McpRuntime,
}

impl McpServer {
    /// Remote URL, when the server is remote
    #[must_use]
    pub fn remote_url(&self) -> Option<&str> {
        match &self.runtime {
            McpRuntime::Remote { url, .. } => Some(url),
            McpRuntime::Local { .. } | McpRuntime::Composite { .. } => None,
        }
    }

    /// Whether the server is a composite
    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self.runtime, McpRuntime::Composite { .. })
    }
}

/// Registered client of a third-party authorization server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamOAuthApp {
    /// App id; also the vault context suffix of its secret
    pub id: String,
    /// Issuer URL of the third-party authorization server
    pub authorization_server_url: String,
    /// Client id registered with that server
    pub client_id: String,
    /// Authorization endpoint override
    pub authorization_endpoint: Option<String>,
    /// Token endpoint override
    pub token_endpoint: Option<String>,
    /// Scopes to request
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Durable mirror of an upstream flow, for cross-process callback handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamStateRecord {
    /// Opaque state sent to the third-party server
    pub state: String,
    /// User the flow runs for
    pub user_id: String,
    /// Server the token is for
    pub mcp_id: String,
    /// Correlated first-tier request, if any
    pub auth_request_id: Option<String>,
    /// Issuer URL used to look the secret up again
    pub authorization_server_url: String,
    /// Client configuration without its secret
    pub config: OAuth2Config,
    /// Authorization URL once computed
    pub auth_url: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}
