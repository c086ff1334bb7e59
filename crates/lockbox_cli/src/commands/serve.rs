//! Serve command implementation.

use lockbox_server::{ServerConfig, VaultServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Runs the sync server until Ctrl-C.
pub async fn run(
    addr: SocketAddr,
    deadline_secs: u64,
    secret: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        ServerConfig::new(addr).with_stream_deadline(Duration::from_secs(deadline_secs));
    if let Some(secret) = secret {
        config = config.with_auth_secret(secret.into_bytes());
    }

    let server = Arc::new(VaultServer::new(config));
    let listener = TcpListener::bind(addr).await?;
    println!("Lockbox server listening on {}", listener.local_addr()?);

    let serving = tokio::spawn(lockbox_server::serve(Arc::clone(&server), listener));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    server.shutdown().await;
    serving.await??;

    println!("Server stopped.");
    Ok(())
}
