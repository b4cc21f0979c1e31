//! Multi-user WebSocket Chat Node - Entry Point
//!
//! Loads configuration, starts the node actor and its transport, then runs
//! until interrupted.

use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_node::{Config, Node};

/// Node name used when the host name cannot be determined
const FALLBACK_NODE_NAME: &str = "chat-node";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_node=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_node=info")),
        )
        .init();

    let mut config = Config::from_env()?;
    if config.node_name.is_none() {
        config.node_name = Some(hostname());
    }

    let node = Node::spawn(config);
    if let Err(e) = node.start().await {
        error!("Failed to start node: {}", e);
        node.shutdown().await;
        return Err(e.into());
    }
    info!("Node {} running, press Ctrl-C to stop", node.address().id());

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping node");

    if let Err(e) = node.stop().await {
        error!("Node did not stop cleanly: {}", e);
    }
    node.shutdown().await;

    info!("Bye");
    Ok(())
}

fn hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| FALLBACK_NODE_NAME.to_string())
}
