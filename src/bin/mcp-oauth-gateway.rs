// ABOUTME: Gateway server binary serving the OAuth 2.0 surface over HTTP
// ABOUTME: Loads environment configuration, wires resources, runs the upstream sweeper and axum
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # MCP OAuth Gateway Binary
//!
//! Starts the gateway with in-memory storage and vault backends.

use anyhow::Result;
use clap::Parser;
use mcp_oauth_gateway::{
    config::ServerConfig,
    logging,
    mcp::{prober::HttpMcpProber, resources::ServerResources},
    oauth2_client::oauth_http_client,
    oauth2_server::OAuth2Routes,
    storage::MemoryStore,
    vault::MemoryVault,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mcp-oauth-gateway")]
#[command(about = "MCP OAuth Gateway - OAuth 2.0 authorization server for MCP tool servers")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override bind address
    #[arg(long)]
    host: Option<String>,

    /// Override the public base URL (token issuer)
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(base_url) = args.base_url {
        config.base_url = base_url.trim_end_matches('/').to_owned();
        config.validate()?;
    }

    logging::init_from_env()?;
    info!("Starting MCP OAuth Gateway");

    let http = oauth_http_client()?;
    let resources = Arc::new(ServerResources::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryVault::new()),
        Arc::new(HttpMcpProber::new(http.clone())),
        http,
    )?);

    let kid = resources.jwks_manager.active_key().await?.kid;
    info!(kid = %kid, "Token signing key ready");

    let sweeper = resources.spawn_sweeper(resources.config.upstream.sweep_interval);

    let addr = format!("{}:{}", resources.config.host, resources.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        base_url = %resources.config.base_url,
        "Gateway listening"
    );

    let app = OAuth2Routes::routes(resources);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.shutdown().await;
    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
