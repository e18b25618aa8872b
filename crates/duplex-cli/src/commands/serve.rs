use std::net::SocketAddr;

use anyhow::bail;
use duplex_core::{ProtocolVersion, uppercase_handler};
use duplex_http::DuplexServer;
use tokio::sync::watch;
use tracing::info;

/// `duplex serve`: host the uppercase processor until Ctrl-C.
pub async fn serve(addr: SocketAddr, version: ProtocolVersion) -> anyhow::Result<()> {
    if !version.supports_independent_streams() {
        bail!("{version} cannot carry full-duplex exchanges");
    }

    let server = DuplexServer::bind(addr, version, uppercase_handler()).await?;
    let local = server.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serving = tokio::spawn(server.serve(shutdown_rx));
    println!("serving {version} on {local} (Ctrl-C to stop)");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    serving.await??;
    Ok(())
}
