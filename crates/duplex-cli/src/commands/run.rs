use std::sync::Arc;

use duplex_core::SequenceCounter;
use duplex_http::HyperTransport;
use duplex_verify::{Harness, ServerReports};
use tracing::info;

use super::{ScenarioArgs, TransportKind};

/// `duplex run`: drive one scenario against an in-process processor.
pub async fn run(args: &ScenarioArgs, transport: TransportKind) -> anyhow::Result<()> {
    let config = args.load()?;
    let (mut harness, label) = match transport {
        TransportKind::Loopback => (Harness::loopback(), "loopback"),
        TransportKind::Http => {
            let counter = SequenceCounter::new();
            let (handler, reports) = ServerReports::uppercase(counter.clone());
            let harness = Harness::new(Arc::new(HyperTransport::in_memory(handler)))
                .with_server_reports(counter, reports);
            (harness, "hyper (in-memory)")
        }
    };

    info!(version = %config.version, chunks = config.chunks, transport = label, "running scenario");
    let outcome = harness.run(&config).await?;
    super::print_outcome(label, &config, &outcome, &args.format)?;

    // Only rendezvous channels end to end make the ordering deterministic.
    super::check(&outcome, transport == TransportKind::Loopback)
}
