use std::net::SocketAddr;
use std::sync::Arc;

use duplex_http::HyperTransport;
use duplex_verify::Harness;
use tracing::info;

use super::ScenarioArgs;

/// `duplex probe`: run a scenario against a remote `duplex serve`.
///
/// The server's event log stays in its process, so properties that need
/// it are reported as not evaluated.
pub async fn probe(addr: SocketAddr, args: &ScenarioArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    let mut harness = Harness::new(Arc::new(HyperTransport::tcp(addr)));

    info!(%addr, version = %config.version, "probing");
    let outcome = harness.run(&config).await?;
    let label = addr.to_string();
    super::print_outcome(&label, &config, &outcome, &args.format)?;
    super::check(&outcome, false)
}
