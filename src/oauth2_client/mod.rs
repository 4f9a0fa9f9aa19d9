// ABOUTME: OAuth 2.0 client side of the gateway, used against third-party authorization servers
// ABOUTME: Holds the outbound client, the pending-flow cache and the upstream bridge
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # OAuth 2.0 Client Module
//!
//! The gateway acts as an OAuth 2.0 client toward the authorization servers
//! that front remote MCP servers. This module handles:
//! - Authorization URLs and code exchange with PKCE
//! - Correlation of pending flows with first-tier authorization requests
//! - Recovery of a flow on a different process than the one that started it

/// Core OAuth 2.0 client implementation
pub mod client;
/// Bounded in-memory cache of pending flows
pub mod state_cache;
/// Upstream bridge coordinating probing, flow state and callbacks
pub mod upstream;

pub use client::{oauth_http_client, OAuth2Client, OAuth2Config, OAuth2Token, PkceParams};
pub use state_cache::{AuthUrlReceiver, PendingFlow, UpstreamStateCache};
pub use upstream::{FlowRequest, UpstreamBridge, UpstreamCallbackError};
