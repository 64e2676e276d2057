use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mosaic_core::{
    build_federation,
    mcp_server::{JsonRpcHandler, McpServer},
    transport::StdioTransport,
    FederationConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the JSON-RPC stream
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Mosaic MCP Server");

    let config_path = FederationConfig::default_path();
    let config = FederationConfig::load(&config_path)?;
    info!(
        path = %config_path.display(),
        providers = config.providers.len(),
        ranking = ?config.ranking.strategy,
        "configuration loaded"
    );

    let federator = Arc::new(build_federation(&config).await?);

    // Initial discovery feeds the ranking index; searches do not wait for it
    let discovery = federator.clone();
    tokio::spawn(async move {
        match discovery.discover_all().await {
            Ok(fan_out) => info!(
                entities = fan_out.entities.len(),
                failed = fan_out.failures.len(),
                "initial discovery finished"
            ),
            Err(e) => warn!("Initial discovery failed: {}", e),
        }
    });

    let transport = StdioTransport::new(JsonRpcHandler::new(McpServer::new(federator.clone())));

    info!("MCP Server ready, listening on stdio");

    tokio::select! {
        result = transport.run() => {
            if let Err(e) = result {
                error!("Transport error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    if let Err(e) = federator.shutdown().await {
        error!("Shutdown reported errors: {}", e);
    }

    Ok(())
}
