//! recall-mcp server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use recall_client::AppContext;
use recall_core::AppConfig;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    if config.require_api_key().is_err() {
        tracing::warn!("RECALL_API_KEY is not set; endpoint calls will likely be rejected");
    }

    let ctx = AppContext::from_config(config)
        .await
        .context("failed to initialize recall context")?;

    tracing::info!("Starting recall-mcp server on stdio transport");

    let handler = handler::RecallServer::new(Arc::new(ctx));
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
