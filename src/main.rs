//! kubeops-mcp server entry point.

use anyhow::{Context, Result};
use kubeops_mcp::config::load_config;
use kubeops_mcp::kubectl::KubectlClient;
use kubeops_mcp::server::{run, ServerContext};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // stdout carries the protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!(
        "starting kubeops-mcp server (built: {})",
        env!("BUILD_TIMESTAMP")
    );

    let config = load_config().context("Failed to load kubeops-config.json")?;
    let ctx = ServerContext::new(config, Arc::new(KubectlClient::new()));

    let rt = Runtime::new()?;
    rt.block_on(run(ctx))?;

    info!("server shutdown complete");
    Ok(())
}
