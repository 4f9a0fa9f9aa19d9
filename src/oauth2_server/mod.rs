// ABOUTME: First-tier OAuth 2.0 authorization server fronting MCP servers
// ABOUTME: RFC 7591 registration, authorize/callback, token endpoint and composite coordination
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// RFC 7591 / RFC 7592 dynamic client registration
pub mod client_registration;
/// Composite server authorization coordinator
pub mod composite;
/// Authorization endpoint and request lifecycle
pub mod endpoints;
/// OAuth 2.0 data models and types
pub mod models;
/// PKCE verification (RFC 7636)
pub mod pkce;
/// HTTP routes
pub mod routes;
/// Auth-provider session validation hook
pub mod session;
/// Token endpoint
pub mod token;

pub use client_registration::ClientRegistrationManager;
pub use composite::CompositeOutcome;
pub use endpoints::OAuth2AuthorizationServer;
pub use models::{
    AuthorizeRequest, ClientRegistrationRequest, ClientRegistrationResponse, OAuth2Error,
    TokenRequest, TokenResponse,
};
pub use routes::OAuth2Routes;
pub use session::{AcceptAllSessions, SessionValidator};
