// ABOUTME: OAuth 2.0 wire types for registration, authorization, token exchange and discovery
// ABOUTME: Implements RFC 6749 error responses, RFC 7591 registration and RFC 8414 / RFC 9728 metadata
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{AppError, ErrorCode};
use crate::models::ClientManifest;

/// OAuth 2.0 Client Registration Request (RFC 7591)
#[derive(Debug, Default, Deserialize)]
pub struct ClientRegistrationRequest {
    /// Redirect URIs for authorization code flow
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Grant types the client can use
    pub grant_types: Option<Vec<String>>,
    /// Response types the client can use
    pub response_types: Option<Vec<String>>,
    /// Token endpoint authentication method
    pub token_endpoint_auth_method: Option<String>,
    /// Scopes the client can request
    pub scope: Option<String>,
    /// Optional client name for display
    pub client_name: Option<String>,
    /// Optional client URI for information
    pub client_uri: Option<String>,
    /// Optional logo URI
    pub logo_uri: Option<String>,
}

/// OAuth 2.0 Client Registration Response (RFC 7591)
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    /// External client identifier (`namespace:name`)
    pub client_id: String,
    /// Plaintext secret, present only when freshly generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Registration time (seconds since epoch)
    pub client_id_issued_at: i64,
    /// Secret expiry (seconds since epoch, 0 when no secret)
    pub client_secret_expires_at: i64,
    /// Plaintext registration token, present only when freshly generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,
    /// Self-management endpoint
    pub registration_client_uri: String,
    /// Registered metadata
    #[serde(flatten)]
    pub metadata: ClientManifest,
}

/// OAuth 2.0 Authorization Request
///
/// Every field is optional so that missing parameters surface as OAuth errors
/// rather than extractor rejections.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct AuthorizeRequest {
    /// Response type (only `code`)
    pub response_type: Option<String>,
    /// Client identifier
    pub client_id: Option<String>,
    /// Redirect URI for response
    pub redirect_uri: Option<String>,
    /// Requested scopes
    pub scope: Option<String>,
    /// State parameter for CSRF protection
    pub state: Option<String>,
    /// PKCE code challenge (RFC 7636)
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (plain or S256)
    pub code_challenge_method: Option<String>,
    /// Requested audience (RFC 8707)
    pub resource: Option<String>,
}

/// OAuth 2.0 Token Request
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// Grant type (`authorization_code`, `refresh_token`)
    pub grant_type: Option<String>,
    /// Authorization code (for `authorization_code` grant)
    pub code: Option<String>,
    /// Redirect URI
    pub redirect_uri: Option<String>,
    /// Client ID (when not using HTTP Basic)
    pub client_id: Option<String>,
    /// Client secret (when not using HTTP Basic)
    pub client_secret: Option<String>,
    /// Refresh token (for `refresh_token` grant)
    pub refresh_token: Option<String>,
    /// PKCE code verifier (RFC 7636)
    pub code_verifier: Option<String>,
}

/// OAuth 2.0 Token Response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token (JWT)
    pub access_token: String,
    /// Token type (always "bearer")
    pub token_type: String,
    /// Expires in seconds
    pub expires_in: i64,
    /// Opaque refresh token
    pub refresh_token: String,
    /// Scopes granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl IntoResponse for TokenResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(self),
        )
            .into_response()
    }
}

/// Upstream provider redirect parameters
#[derive(Debug, Default, Deserialize)]
pub struct UpstreamCallbackParams {
    /// Correlation state
    pub state: Option<String>,
    /// Authorization code
    pub code: Option<String>,
    /// Provider error code
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
}

/// Composite polling query
#[derive(Debug, Default, Deserialize)]
pub struct CompositeQuery {
    /// First-tier request to finalize once all components are authorized
    pub oauth_auth_request: Option<String>,
}

/// One component still waiting for upstream authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingComponent {
    /// Catalog entry id of the component
    pub component_id: String,
    /// Component server instance id
    pub component_server_id: String,
    /// Where the user must go to authorize it
    pub auth_url: String,
}

/// Composite polling response
#[derive(Debug, Serialize, Deserialize)]
pub struct CompositeAuthStatus {
    /// Components still pending
    pub pending: Vec<PendingComponent>,
}

/// Authorization server metadata (RFC 8414)
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Dynamic registration endpoint
    pub registration_endpoint: String,
    /// Key set location
    pub jwks_uri: String,
    /// Supported response types
    pub response_types_supported: Vec<String>,
    /// Supported grant types
    pub grant_types_supported: Vec<String>,
    /// Supported token endpoint authentication methods
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// Supported PKCE methods
    pub code_challenge_methods_supported: Vec<String>,
}

/// Protected resource metadata (RFC 9728)
#[derive(Debug, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Resource identifier
    pub resource: String,
    /// Issuers that can mint tokens for the resource
    pub authorization_servers: Vec<String>,
    /// How bearer tokens may be presented
    pub bearer_methods_supported: Vec<String>,
}

/// OAuth 2.0 Error Response (RFC 6749 §4.1.2.1 and §5.2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Error {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// Client state echoed back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl OAuth2Error {
    fn new(error: &str, description: &str) -> Self {
        Self {
            error: error.to_owned(),
            error_description: Some(description.to_owned()),
            state: None,
        }
    }

    /// Create an `invalid_request` error
    #[must_use]
    pub fn invalid_request(description: &str) -> Self {
        Self::new("invalid_request", description)
    }

    /// Create an `invalid_client` error
    #[must_use]
    pub fn invalid_client() -> Self {
        Self::new("invalid_client", "Client authentication failed")
    }

    /// Create an `invalid_token` error for registration self-management (RFC 6750)
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new("invalid_token", "Registration access token is missing or invalid")
    }

    /// Create an `invalid_redirect_uri` error (RFC 7591 Section 3.2.2)
    #[must_use]
    pub fn invalid_redirect_uri(description: &str) -> Self {
        Self::new("invalid_redirect_uri", description)
    }

    /// Create an `invalid_grant` error
    #[must_use]
    pub fn invalid_grant(description: &str) -> Self {
        Self::new("invalid_grant", description)
    }

    /// Create an `unsupported_grant_type` error
    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self::new("unsupported_grant_type", "Grant type not supported")
    }

    /// Create an `unsupported_response_type` error
    #[must_use]
    pub fn unsupported_response_type(description: &str) -> Self {
        Self::new("unsupported_response_type", description)
    }

    /// Create an `unauthorized_client` error (RFC 6749 Section 4.1.2.1)
    /// Used when a client attempts to use a `grant_type` or `response_type` it was not registered for
    #[must_use]
    pub fn unauthorized_client(description: &str) -> Self {
        Self::new("unauthorized_client", description)
    }

    /// Create an `invalid_scope` error (RFC 6749 Section 4.1.2.1)
    /// Used when a client requests scopes beyond what it was registered for
    #[must_use]
    pub fn invalid_scope(description: &str) -> Self {
        Self::new("invalid_scope", description)
    }

    /// Create an `access_denied` error
    #[must_use]
    pub fn access_denied(description: &str) -> Self {
        Self::new("access_denied", description)
    }

    /// Create an `invalid_client_metadata` error (RFC 7591 Section 3.2.2)
    #[must_use]
    pub fn invalid_client_metadata(description: &str) -> Self {
        Self::new("invalid_client_metadata", description)
    }

    /// Create a `server_error` error
    #[must_use]
    pub fn server_error(description: &str) -> Self {
        Self::new("server_error", description)
    }

    /// Attach the client's `state`
    #[must_use]
    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }

    /// Redirect location carrying this error as query parameters
    #[must_use]
    pub fn redirect_location(&self, redirect_uri: &str) -> String {
        let Ok(mut url) = Url::parse(redirect_uri) else {
            return redirect_uri.to_owned();
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("error", &self.error);
            if let Some(description) = &self.error_description {
                query.append_pair("error_description", description);
            }
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
        }
        url.to_string()
    }

    /// HTTP status when rendered directly
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "invalid_client" | "invalid_token" => StatusCode::UNAUTHORIZED,
            "access_denied" => StatusCode::FORBIDDEN,
            "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<AppError> for OAuth2Error {
    fn from(error: AppError) -> Self {
        match error.code {
            ErrorCode::AuthRequired
            | ErrorCode::AuthInvalid
            | ErrorCode::AuthExpired
            | ErrorCode::AuthMalformed => Self::invalid_client(),
            ErrorCode::PermissionDenied => Self::access_denied(&error.message),
            ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::ResourceNotFound
            | ErrorCode::ResourceAlreadyExists => Self::invalid_request(&error.message),
            _ => {
                tracing::error!(error = %error, "OAuth request failed with server error");
                Self::server_error("The authorization server encountered an unexpected error")
            }
        }
    }
}

impl IntoResponse for OAuth2Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = if self.error == "invalid_token" {
                r#"Bearer error="invalid_token""#
            } else {
                "Basic"
            };
            return (
                status,
                [
                    (header::WWW_AUTHENTICATE, challenge),
                    (header::CACHE_CONTROL, "no-store"),
                ],
                Json(self),
            )
                .into_response();
        }
        (status, [(header::CACHE_CONTROL, "no-store")], Json(self)).into_response()
    }
}

/// Result of a browser-facing step: a redirect target, or an error that
/// cannot be redirected because no redirect URI is trusted yet
pub type RedirectResult = Result<String, OAuth2Error>;

/// `302 Found` to `location`
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Render a browser-facing step
pub fn redirect_response(result: RedirectResult) -> Response {
    match result {
        Ok(location) => found(&location),
        Err(error) => error.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_location_appends_error_parameters() {
        let error = OAuth2Error::invalid_scope("scope admin not allowed")
            .with_state(Some("xyz".to_owned()));
        let location = error.redirect_location("https://app.example.com/cb?keep=1");
        let url = Url::parse(&location).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("keep".to_owned(), "1".to_owned()),
                ("error".to_owned(), "invalid_scope".to_owned()),
                (
                    "error_description".to_owned(),
                    "scope admin not allowed".to_owned()
                ),
                ("state".to_owned(), "xyz".to_owned()),
            ]
        );
    }

    #[test]
    fn test_invalid_client_is_unauthorized() {
        assert_eq!(OAuth2Error::invalid_client().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            OAuth2Error::invalid_request("x").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_app_error_mapping_hides_internal_details() {
        let mapped = OAuth2Error::from(AppError::database("connection refused on 10.0.0.1"));
        assert_eq!(mapped.error, "server_error");
        assert!(!mapped
            .error_description
            .unwrap_or_default()
            .contains("10.0.0.1"));
    }

    #[test]
    fn test_token_response_omits_missing_scope() {
        let json = serde_json::to_value(TokenResponse {
            access_token: "a".to_owned(),
            token_type: "bearer".to_owned(),
            expires_in: 600,
            refresh_token: "r".to_owned(),
            scope: None,
        })
        .unwrap();
        assert!(json.get("scope").is_none());
        assert_eq!(json["expires_in"], 600);
    }
}
