//! duplex: drive and verify full-duplex exchanges.
//!
//! # Usage
//!
//! ```text
//! duplex run --transport loopback --http-version 1.1
//! duplex run --config scenarios/mid-stream-fault.toml --format json
//! duplex serve --addr 127.0.0.1:8480 --http-version 2
//! duplex probe --addr 127.0.0.1:8480 --http-version 2
//! ```

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use duplex_core::ProtocolVersion;

mod commands;

use commands::{ScenarioArgs, TransportKind};

#[derive(Parser)]
#[command(
    name = "duplex",
    about = "Full-duplex exchange harness",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scenario in-process and verify its ordering.
    Run {
        #[command(flatten)]
        scenario: ScenarioArgs,
        /// Transport carrying the exchange.
        #[arg(short, long, value_enum, default_value = "loopback")]
        transport: TransportKind,
    },
    /// Serve the uppercase processor over TCP until Ctrl-C.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:8480")]
        addr: SocketAddr,
        /// Protocol version to serve: 1.1 or 2.
        #[arg(long = "http-version", default_value = "1.1")]
        http_version: ProtocolVersion,
    },
    /// Run a scenario against a remote `duplex serve`.
    Probe {
        /// Server address.
        #[arg(long)]
        addr: SocketAddr,
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,duplex=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scenario,
            transport,
        } => commands::run::run(&scenario, transport).await,
        Command::Serve { addr, http_version } => commands::serve::serve(addr, http_version).await,
        Command::Probe { addr, scenario } => commands::probe::probe(addr, &scenario).await,
    }
}
