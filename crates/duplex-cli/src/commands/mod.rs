pub mod probe;
pub mod run;
pub mod serve;

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use duplex_core::ProtocolVersion;
use duplex_verify::{ExchangeOutcome, OrderingReport, ScenarioConfig};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// In-process channels; ordering is deterministic.
    Loopback,
    /// hyper over an in-memory pipe.
    Http,
}

/// Scenario selection shared by `run` and `probe`.
#[derive(Debug, Args)]
pub struct ScenarioArgs {
    /// Scenario file (TOML). Flags override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Protocol version: 1.0, 1.1 or 2.
    #[arg(long = "http-version")]
    pub http_version: Option<ProtocolVersion>,

    /// Number of request chunks.
    #[arg(long)]
    pub chunks: Option<usize>,

    /// Bytes per request chunk.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Maximum bytes per response read.
    #[arg(long)]
    pub read_size: Option<usize>,

    /// Abort the request stream after this many chunks.
    #[arg(long)]
    pub fail_after: Option<usize>,

    /// Cancel the exchange after this many milliseconds.
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Issue the call without requesting full-duplex mode.
    #[arg(long)]
    pub half_duplex: bool,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

impl ScenarioArgs {
    pub fn load(&self) -> anyhow::Result<ScenarioConfig> {
        let mut config = match &self.config {
            Some(path) => ScenarioConfig::from_file(path)?,
            None => ScenarioConfig::default(),
        };
        if let Some(version) = self.http_version {
            config.version = version;
        }
        if let Some(chunks) = self.chunks {
            config.chunks = chunks;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(read_size) = self.read_size {
            config.read_size = read_size;
        }
        if self.fail_after.is_some() {
            config.fail_after = self.fail_after;
        }
        if self.deadline_ms.is_some() {
            config.deadline_ms = self.deadline_ms;
        }
        if self.half_duplex {
            config.full_duplex = false;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Print an outcome in the requested format.
pub fn print_outcome(
    label: &str,
    config: &ScenarioConfig,
    outcome: &ExchangeOutcome,
    format: &str,
) -> anyhow::Result<()> {
    let ordering = outcome.ordering();
    match format {
        "json" => {
            let server = outcome.server.as_ref().map(|report| {
                json!({
                    "status": report.status,
                    "state": report.state,
                    "error": report.error.as_ref().map(ToString::to_string),
                    "bytes_read": report.bytes_read,
                    "bytes_written": report.bytes_written,
                    "chunks_read": report.chunks_read,
                    "chunks_written": report.chunks_written,
                })
            });
            let value = json!({
                "transport": label,
                "version": config.version,
                "status": outcome.status,
                "response_status": outcome.response_status,
                "response_bytes": outcome.response_body.len(),
                "response_chunks": outcome.response_chunks,
                "transform_holds": outcome.transform_holds(config),
                "send_error": outcome.send_error.as_ref().map(ToString::to_string),
                "receive_error": outcome.receive_error.as_ref().map(ToString::to_string),
                "server": server,
                "ordering": ordering,
                "timeline": outcome.timeline,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => println!("{}", format_text(label, config, outcome, &ordering)),
    }
    Ok(())
}

fn format_text(
    label: &str,
    config: &ScenarioConfig,
    outcome: &ExchangeOutcome,
    ordering: &OrderingReport,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("exchange   {} via {label}\n", config.version));
    out.push_str(&format!(
        "status     {:?} ({})\n",
        outcome.status, outcome.response_status
    ));
    out.push_str(&format!(
        "response   {} bytes in {} chunks, transform {}\n",
        outcome.response_body.len(),
        outcome.response_chunks,
        if outcome.transform_holds(config) { "holds" } else { "BROKEN" },
    ));
    if let Some(err) = &outcome.send_error {
        out.push_str(&format!("send       {err}\n"));
    }
    if let Some(err) = &outcome.receive_error {
        out.push_str(&format!("receive    {err}\n"));
    }
    if let Some(report) = &outcome.server {
        out.push_str(&format!(
            "server     {:?}, read {} bytes, wrote {} bytes\n",
            report.state, report.bytes_read, report.bytes_written
        ));
    }

    out.push_str(&format!("\ntimeline ({} events)\n", outcome.timeline.len()));
    for event in outcome.timeline.events() {
        out.push_str(&format!(
            "  #{:<4} {:<7} {:<14} {}\n",
            event.seq, event.actor.to_string(), event.action.to_string(), event.bytes
        ));
    }

    out.push_str("\nordering\n");
    for check in &ordering.checks {
        out.push_str(&format!("  {:<34} {}\n", check.property.to_string(), check.verdict));
    }
    out
}

/// Fail when the exchange did not succeed, or when `enforce_ordering` is
/// set and a property was violated.
pub fn check(outcome: &ExchangeOutcome, enforce_ordering: bool) -> anyhow::Result<()> {
    let ordering = outcome.ordering();
    if enforce_ordering {
        ordering.ensure()?;
    } else if !ordering.is_clean() {
        tracing::warn!("ordering violated on a buffering transport");
    }
    if outcome.status != duplex_core::ExchangeStatus::Success {
        anyhow::bail!("exchange ended with status {:?}", outcome.status);
    }
    Ok(())
}
