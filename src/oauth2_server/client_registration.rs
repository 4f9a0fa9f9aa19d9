// ABOUTME: OAuth 2.0 dynamic client registration and self-management (RFC 7591 / RFC 7592)
// ABOUTME: Owns client secret and registration token lifecycle: generate, bcrypt-hash, rotate at half-life
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{ClientRegistrationRequest, ClientRegistrationResponse, OAuth2Error};
use crate::config::ServerConfig;
use crate::constants::oauth;
use crate::crypto::random_token;
use crate::errors::{AppError, AppResult};
use crate::models::{parse_client_id, ClientManifest, OAuthClient};
use crate::storage::GatewayStore;

/// Plaintext values produced by a rotation, returned exactly once
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    /// New client secret
    pub client_secret: Option<String>,
    /// New registration access token
    pub registration_token: Option<String>,
}

impl IssuedCredentials {
    /// Whether anything was regenerated
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.client_secret.is_none() && self.registration_token.is_none()
    }
}

/// Whether a value issued at `issued_at` must be regenerated
///
/// Never-issued values always rotate; otherwise rotation happens once at
/// least half of `lifetime_secs` has elapsed.
#[must_use]
pub fn needs_rotation(issued_at: Option<DateTime<Utc>>, lifetime_secs: i64, now: DateTime<Utc>) -> bool {
    issued_at.map_or(true, |issued_at| {
        now - issued_at >= Duration::seconds(lifetime_secs) / 2
    })
}

/// bcrypt hash on the blocking pool
///
/// # Errors
///
/// Returns an internal error if hashing fails
pub async fn hash_secret(secret: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(secret, cost))
        .await
        .map_err(|e| AppError::internal(format!("bcrypt task failed: {e}")))?
        .map_err(|e| AppError::internal(format!("bcrypt hashing failed: {e}")))
}

/// bcrypt verification on the blocking pool; any failure counts as a mismatch
pub async fn verify_secret(secret: String, hash: String) -> bool {
    match tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash).unwrap_or(false)).await {
        Ok(matches) => matches,
        Err(e) => {
            warn!(error = %e, "bcrypt verification task failed");
            false
        }
    }
}

/// OAuth 2.0 Client Registration Manager
pub struct ClientRegistrationManager {
    store: Arc<dyn GatewayStore>,
    config: Arc<ServerConfig>,
}

impl ClientRegistrationManager {
    /// Creates a new client registration manager
    #[must_use]
    pub fn new(store: Arc<dyn GatewayStore>, config: Arc<ServerConfig>) -> Self {
        Self { store, config }
    }

    /// Register a new OAuth 2.0 client (RFC 7591)
    ///
    /// # Errors
    /// Returns an error if client registration validation fails or storage fails
    pub async fn register_client(
        &self,
        mcp_id: &str,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuth2Error> {
        let manifest = Self::validate_registration_request(request)?;
        let now = Utc::now();

        let mut client = OAuthClient {
            namespace: self.config.namespace.clone(),
            name: Self::generate_client_name(),
            manifest,
            mcp_id: Some(mcp_id.to_owned()),
            client_secret_hash: None,
            client_secret_issued_at: None,
            client_secret_expires_at: None,
            registration_token_hash: None,
            registration_token_issued_at: None,
            registration_token_expires_at: None,
            is_static: false,
            created_at: now,
        };
        let issued = self.ensure_token_and_secret(&mut client, now).await?;

        self.store.create_oauth_client(&client).await.map_err(|e| {
            tracing::error!(error = %e, client_id = %client.client_id(), "Failed to store OAuth client registration");
            OAuth2Error::server_error("Failed to store client registration")
        })?;

        info!(client_id = %client.client_id(), mcp_id = %mcp_id, "Registered OAuth client");
        Ok(self.registration_response(&client, issued))
    }

    /// Read a registration, rotating credentials that passed half their lifetime (RFC 7592)
    ///
    /// # Errors
    /// Returns `invalid_token` unless `registration_token` authenticates the client
    pub async fn read_client(
        &self,
        client_id: &str,
        registration_token: Option<&str>,
    ) -> Result<ClientRegistrationResponse, OAuth2Error> {
        let mut client = self
            .authenticate_registration(client_id, registration_token)
            .await?;

        let issued = self.ensure_token_and_secret(&mut client, Utc::now()).await?;
        if !issued.is_empty() {
            self.store.update_oauth_client(&client).await?;
            debug!(client_id = %client_id, "Rotated client credentials on read");
        }
        Ok(self.registration_response(&client, issued))
    }

    /// Replace a registration's metadata; identity never changes (RFC 7592)
    ///
    /// # Errors
    /// Returns `invalid_token` on bad credentials and `invalid_client_metadata` on bad metadata
    pub async fn update_client(
        &self,
        client_id: &str,
        registration_token: Option<&str>,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuth2Error> {
        let mut client = self
            .authenticate_registration(client_id, registration_token)
            .await?;
        let manifest = Self::validate_registration_request(request)?;

        let was_public = client.is_public();
        client.manifest = manifest;
        if client.is_public() {
            client.client_secret_hash = None;
            client.client_secret_issued_at = None;
            client.client_secret_expires_at = None;
        } else if was_public {
            client.client_secret_issued_at = None;
        }

        let issued = self.ensure_token_and_secret(&mut client, Utc::now()).await?;
        self.store.update_oauth_client(&client).await?;

        info!(client_id = %client_id, "Updated OAuth client registration");
        Ok(self.registration_response(&client, issued))
    }

    /// Delete a registration and every refresh token bound to it (RFC 7592)
    ///
    /// # Errors
    /// Returns `invalid_token` unless `registration_token` authenticates the client
    pub async fn delete_client(
        &self,
        client_id: &str,
        registration_token: Option<&str>,
    ) -> Result<(), OAuth2Error> {
        let client = self
            .authenticate_registration(client_id, registration_token)
            .await?;

        self.store
            .delete_oauth_client(&client.namespace, &client.name)
            .await?;
        let revoked = self
            .store
            .delete_oauth_tokens_for_client(&client.namespace, &client.name)
            .await?;

        info!(client_id = %client_id, revoked, "Deleted OAuth client registration");
        Ok(())
    }

    /// Force a new client secret regardless of its age
    ///
    /// # Errors
    /// Returns an error if the client is unknown, public, or cannot be stored
    pub async fn roll_secret(&self, client_id: &str) -> AppResult<String> {
        let mut client = self.get_client(client_id).await?;
        if client.is_public() {
            return Err(AppError::invalid_input(format!(
                "client {client_id} is public and has no secret"
            )));
        }

        client.client_secret_issued_at = None;
        let issued = self.ensure_token_and_secret(&mut client, Utc::now()).await?;
        self.store.update_oauth_client(&client).await?;

        info!(client_id = %client_id, "Rolled OAuth client secret");
        issued
            .client_secret
            .ok_or_else(|| AppError::internal("secret rotation produced no value"))
    }

    /// Create an admin-managed client; returns it with its plaintext secret, if any
    ///
    /// Static clients cannot use the self-management endpoints and their
    /// secrets do not expire; use [`Self::roll_secret`] to replace one.
    ///
    /// # Errors
    /// Returns an error if the metadata is invalid or the name is taken
    pub async fn create_static_client(
        &self,
        name: &str,
        manifest: ClientManifest,
    ) -> AppResult<(OAuthClient, Option<String>)> {
        let manifest = Self::validate_registration_request(ClientRegistrationRequest {
            redirect_uris: manifest.redirect_uris,
            grant_types: Some(manifest.grant_types).filter(|g| !g.is_empty()),
            response_types: Some(manifest.response_types).filter(|r| !r.is_empty()),
            token_endpoint_auth_method: Some(manifest.token_endpoint_auth_method)
                .filter(|m| !m.is_empty()),
            scope: manifest.scope,
            client_name: manifest.client_name,
            client_uri: manifest.client_uri,
            logo_uri: manifest.logo_uri,
        })
        .map_err(|e| {
            AppError::invalid_input(e.error_description.unwrap_or(e.error))
        })?;

        let now = Utc::now();
        let mut client = OAuthClient {
            namespace: self.config.namespace.clone(),
            name: name.to_owned(),
            manifest,
            mcp_id: None,
            client_secret_hash: None,
            client_secret_issued_at: None,
            client_secret_expires_at: None,
            registration_token_hash: None,
            registration_token_issued_at: None,
            registration_token_expires_at: None,
            is_static: true,
            created_at: now,
        };
        let issued = self.ensure_token_and_secret(&mut client, now).await?;
        self.store.create_oauth_client(&client).await?;

        info!(client_id = %client.client_id(), "Created static OAuth client");
        Ok((client, issued.client_secret))
    }

    /// Regenerate the secret and registration token independently when due
    ///
    /// Only bcrypt hashes are stored on `client`; the plaintext values are
    /// returned once and never again.
    ///
    /// # Errors
    /// Returns an error if the RNG or bcrypt fails
    pub async fn ensure_token_and_secret(
        &self,
        client: &mut OAuthClient,
        now: DateTime<Utc>,
    ) -> AppResult<IssuedCredentials> {
        let settings = &self.config.oauth;
        let mut issued = IssuedCredentials::default();

        if !client.is_public()
            && needs_rotation(
                client.client_secret_issued_at,
                settings.client_secret_lifetime_secs,
                now,
            )
        {
            let secret = random_token(oauth::SECRET_BYTES)?;
            client.client_secret_hash = Some(hash_secret(secret.clone(), settings.bcrypt_cost).await?);
            client.client_secret_issued_at = Some(now);
            client.client_secret_expires_at = (!client.is_static)
                .then(|| now + Duration::seconds(settings.client_secret_lifetime_secs));
            issued.client_secret = Some(secret);
        }

        if !client.is_static
            && needs_rotation(
                client.registration_token_issued_at,
                settings.registration_token_lifetime_secs,
                now,
            )
        {
            let token = random_token(oauth::SECRET_BYTES)?;
            client.registration_token_hash =
                Some(hash_secret(token.clone(), settings.bcrypt_cost).await?);
            client.registration_token_issued_at = Some(now);
            client.registration_token_expires_at =
                Some(now + Duration::seconds(settings.registration_token_lifetime_secs));
            issued.registration_token = Some(token);
        }

        Ok(issued)
    }

    /// Authenticate a client at the token endpoint
    ///
    /// Public clients (`none`) are identified by `client_id` alone. A
    /// confidential client must present its secret with the
    /// `token_endpoint_auth_method` it registered.
    ///
    /// # Errors
    /// Returns `invalid_client` for unknown clients, a mismatched method, missing or wrong secrets and expired secrets
    pub async fn validate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        auth_method: &str,
    ) -> Result<OAuthClient, OAuth2Error> {
        let client = self.get_client(client_id).await.map_err(|e| {
            warn!(client_id = %client_id, error = %e, "OAuth client not found");
            OAuth2Error::invalid_client()
        })?;

        if client.is_public() {
            return Ok(client);
        }
        if client.manifest.token_endpoint_auth_method != auth_method {
            warn!(
                client_id = %client_id,
                registered = %client.manifest.token_endpoint_auth_method,
                presented = %auth_method,
                "OAuth client used an unregistered authentication method"
            );
            return Err(OAuth2Error::invalid_client());
        }

        let (Some(secret), Some(hash)) = (client_secret, client.client_secret_hash.clone()) else {
            warn!(client_id = %client_id, "OAuth client presented no secret");
            return Err(OAuth2Error::invalid_client());
        };
        if !verify_secret(secret.to_owned(), hash).await {
            warn!(client_id = %client_id, "OAuth client secret validation failed");
            return Err(OAuth2Error::invalid_client());
        }
        if client
            .client_secret_expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now())
        {
            warn!(client_id = %client_id, "OAuth client secret has expired");
            return Err(OAuth2Error::invalid_client());
        }

        debug!(client_id = %client_id, "OAuth client validated");
        Ok(client)
    }

    /// Get client by external `client_id`
    ///
    /// # Errors
    /// Returns an error if the id is malformed or the client does not exist
    pub async fn get_client(&self, client_id: &str) -> AppResult<OAuthClient> {
        let (namespace, name) = parse_client_id(client_id)
            .ok_or_else(|| AppError::invalid_input(format!("malformed client_id {client_id}")))?;
        self.store
            .get_oauth_client(namespace, name)
            .await?
            .ok_or_else(|| AppError::not_found(format!("OAuth client {client_id}")))
    }

    async fn authenticate_registration(
        &self,
        client_id: &str,
        registration_token: Option<&str>,
    ) -> Result<OAuthClient, OAuth2Error> {
        let token = registration_token.ok_or_else(OAuth2Error::invalid_token)?;
        let client = self.get_client(client_id).await.map_err(|e| {
            debug!(client_id = %client_id, error = %e, "Registration lookup failed");
            OAuth2Error::invalid_token()
        })?;

        if client.is_static {
            warn!(client_id = %client_id, "Rejected self-management of a static client");
            return Err(OAuth2Error::access_denied(
                "static clients cannot be managed through registration",
            ));
        }

        let hash = client
            .registration_token_hash
            .clone()
            .ok_or_else(OAuth2Error::invalid_token)?;
        if !verify_secret(token.to_owned(), hash).await {
            warn!(client_id = %client_id, "Registration access token validation failed");
            return Err(OAuth2Error::invalid_token());
        }
        if client
            .registration_token_expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now())
        {
            return Err(OAuth2Error::invalid_token());
        }
        Ok(client)
    }

    fn registration_response(
        &self,
        client: &OAuthClient,
        issued: IssuedCredentials,
    ) -> ClientRegistrationResponse {
        let client_id = client.client_id();
        ClientRegistrationResponse {
            registration_client_uri: self.config.registration_url(&client_id),
            client_id,
            client_secret: issued.client_secret,
            client_id_issued_at: client.created_at.timestamp(),
            client_secret_expires_at: client
                .client_secret_expires_at
                .map_or(0, |expires_at| expires_at.timestamp()),
            registration_access_token: issued.registration_token,
            metadata: client.manifest.clone(),
        }
    }

    /// Validate registration request and apply defaults
    fn validate_registration_request(
        request: ClientRegistrationRequest,
    ) -> Result<ClientManifest, OAuth2Error> {
        if request.redirect_uris.is_empty() {
            return Err(OAuth2Error::invalid_redirect_uri(
                "At least one redirect_uri is required",
            ));
        }
        if let Some(uri) = request
            .redirect_uris
            .iter()
            .find(|uri| !Self::is_valid_redirect_uri(uri))
        {
            return Err(OAuth2Error::invalid_redirect_uri(&format!(
                "Invalid redirect_uri: {uri}"
            )));
        }

        let token_endpoint_auth_method = request
            .token_endpoint_auth_method
            .unwrap_or_else(|| oauth::AUTH_METHOD_CLIENT_SECRET_BASIC.to_owned());
        if !oauth::SUPPORTED_AUTH_METHODS.contains(&token_endpoint_auth_method.as_str()) {
            return Err(OAuth2Error::invalid_client_metadata(&format!(
                "Unsupported token_endpoint_auth_method: {token_endpoint_auth_method}"
            )));
        }

        let grant_types = request
            .grant_types
            .unwrap_or_else(|| vec![oauth::GRANT_AUTHORIZATION_CODE.to_owned()]);
        if let Some(grant_type) = grant_types
            .iter()
            .find(|g| !oauth::SUPPORTED_GRANT_TYPES.contains(&g.as_str()))
        {
            return Err(OAuth2Error::invalid_client_metadata(&format!(
                "Unsupported grant_type: {grant_type}"
            )));
        }

        let response_types = request
            .response_types
            .unwrap_or_else(|| vec![oauth::RESPONSE_TYPE_CODE.to_owned()]);
        if let Some(response_type) = response_types
            .iter()
            .find(|r| !oauth::SUPPORTED_RESPONSE_TYPES.contains(&r.as_str()))
        {
            return Err(OAuth2Error::invalid_client_metadata(&format!(
                "Unsupported response_type: {response_type}"
            )));
        }

        let scope = request
            .scope
            .map(|scope| scope.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|scope| !scope.is_empty());

        Ok(ClientManifest {
            redirect_uris: request.redirect_uris,
            grant_types,
            response_types,
            token_endpoint_auth_method,
            scope,
            client_name: request.client_name,
            client_uri: request.client_uri,
            logo_uri: request.logo_uri,
        })
    }

    /// Check if redirect URI is valid
    ///
    /// Absolute, no fragment, no wildcard. `https` anywhere, `http` only on
    /// loopback, and custom schemes for native apps.
    fn is_valid_redirect_uri(uri: &str) -> bool {
        if uri.trim().is_empty() || uri.contains('#') || uri.contains('*') {
            warn!(redirect_uri = %uri, "Rejected redirect_uri with fragment or wildcard");
            return false;
        }

        let Ok(parsed) = url::Url::parse(uri) else {
            warn!(redirect_uri = %uri, "Rejected malformed redirect_uri");
            return false;
        };

        match parsed.scheme() {
            "https" => true,
            "http" => {
                let loopback = matches!(
                    parsed.host_str(),
                    Some("localhost" | "127.0.0.1" | "[::1]")
                );
                if !loopback {
                    warn!(redirect_uri = %uri, "Rejected non-loopback http redirect_uri");
                }
                loopback
            }
            "javascript" | "data" | "file" | "vbscript" => false,
            _ => true,
        }
    }

    /// Generate client name
    fn generate_client_name() -> String {
        format!("{}{}", oauth::CLIENT_NAME_PREFIX, Uuid::new_v4().simple())
    }
}
