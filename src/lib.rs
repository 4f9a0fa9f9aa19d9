// ABOUTME: Main library entry point for the MCP OAuth gateway
// ABOUTME: First-tier OAuth 2.0 authorization server plus upstream OAuth client for remote MCP servers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # MCP OAuth Gateway
//!
//! The gateway sits in front of MCP tool servers and plays two OAuth roles:
//!
//! - **Authorization server** for MCP clients: dynamic client registration,
//!   authorization code flow with PKCE, refresh token rotation and
//!   EdDSA-signed access tokens.
//! - **OAuth client** toward third-party authorization servers that protect
//!   remote MCP servers, so that a single first-tier login also collects
//!   every upstream authorization the target needs.
//!
//! ## Architecture
//!
//! - **`oauth2_server`**: registration, authorize, callbacks, token endpoint
//!   and the composite coordinator
//! - **`oauth2_client`**: upstream bridge with durable flow correlation
//! - **`auth`** / **`crypto`**: token issuer and signing keys
//! - **`storage`** / **`vault`**: narrow interfaces to records and secrets
//! - **`mcp`**: upstream auth probing and the shared resource container
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_oauth_gateway::config::ServerConfig;
//! use mcp_oauth_gateway::errors::AppResult;
//! use mcp_oauth_gateway::mcp::{prober::HttpMcpProber, resources::ServerResources};
//! use mcp_oauth_gateway::oauth2_client::oauth_http_client;
//! use mcp_oauth_gateway::oauth2_server::OAuth2Routes;
//! use mcp_oauth_gateway::{storage::MemoryStore, vault::MemoryVault};
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let http = oauth_http_client()?;
//!     let resources = ServerResources::new(
//!         ServerConfig::from_env()?,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryVault::new()),
//!         Arc::new(HttpMcpProber::new(http.clone())),
//!         http,
//!     )?;
//!     let _router = OAuth2Routes::routes(Arc::new(resources));
//!     Ok(())
//! }
//! ```

/// Token issuer and request authentication
pub mod auth;

/// Environment configuration
pub mod config;

/// Protocol constants and defaults
pub mod constants;

/// Signing keys, JWKS and random tokens
pub mod crypto;

/// Unified error handling
pub mod errors;

/// Structured logging setup
pub mod logging;

/// Upstream auth probing and shared resources
pub mod mcp;

/// Persistent record types
pub mod models;

/// OAuth 2.0 client role toward third-party authorization servers
pub mod oauth2_client;

/// OAuth 2.0 authorization server role toward MCP clients
pub mod oauth2_server;

/// Resource store interface and in-memory implementation
pub mod storage;

/// Credential vault interface and in-memory implementation
pub mod vault;
