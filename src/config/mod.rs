// ABOUTME: Configuration module root for the MCP OAuth gateway
// ABOUTME: Re-exports the environment-driven server configuration types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-only configuration

/// Server configuration loaded from environment variables
pub mod environment;

pub use environment::{OAuthServerConfig, ServerConfig, UpstreamConfig};
