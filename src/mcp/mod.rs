// ABOUTME: MCP-facing collaborators of the gateway
// ABOUTME: Upstream auth probing of remote MCP servers and the shared resource container
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Upstream authorization probing of remote MCP servers
pub mod prober;
/// Shared server resources
pub mod resources;
