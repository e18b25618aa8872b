//! Scenario configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use bytes::Bytes;
use duplex_core::{MAX_CHUNK_SIZE, ProtocolVersion};
use serde::{Deserialize, Serialize};

/// One duplex exchange to drive, loadable from TOML.
///
/// ```toml
/// version = "2"
/// chunks = 10
/// chunk_size = 1000
/// pattern = "helloworld"
/// fail_after = 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub version: ProtocolVersion,
    /// Request full-duplex mode for the exchange.
    pub full_duplex: bool,
    /// Number of request chunks the send task writes.
    pub chunks: usize,
    pub chunk_size: usize,
    /// Byte pattern repeated to fill each chunk.
    pub pattern: String,
    /// Maximum bytes per response read.
    pub read_size: usize,
    /// Abort the request stream with a read error after this many chunks.
    pub fail_after: Option<usize>,
    pub deadline_ms: Option<u64>,
    /// Yield to the scheduler after each completed write.
    pub yield_between_writes: bool,
    pub path: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::Http11,
            full_duplex: true,
            chunks: 10,
            chunk_size: MAX_CHUNK_SIZE,
            pattern: "helloworld".to_string(),
            read_size: MAX_CHUNK_SIZE,
            fail_after: None,
            deadline_ms: None,
            yield_between_writes: true,
            path: "/duplex".to_string(),
        }
    }
}

impl ScenarioConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let config: ScenarioConfig = toml::from_str(&content)
            .with_context(|| format!("parsing scenario {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunks == 0 {
            bail!("chunks must be at least 1");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.read_size == 0 {
            bail!("read_size must be at least 1");
        }
        if self.pattern.is_empty() {
            bail!("pattern must not be empty");
        }
        if let Some(n) = self.fail_after {
            if n >= self.chunks {
                bail!("fail_after ({n}) must be less than chunks ({})", self.chunks);
            }
        }
        if !self.path.starts_with('/') {
            bail!("path must start with '/': {}", self.path);
        }
        Ok(())
    }

    /// One request chunk: `pattern` repeated and cut to `chunk_size` bytes.
    pub fn chunk(&self) -> Bytes {
        self.pattern
            .bytes()
            .cycle()
            .take(self.chunk_size)
            .collect::<Vec<u8>>()
            .into()
    }

    /// The full request body the send task produces when nothing fails.
    pub fn request_body(&self) -> Vec<u8> {
        self.chunk().repeat(self.chunks)
    }

    /// The uppercase processor's response to [`request_body`](Self::request_body).
    pub fn expected_response(&self) -> Vec<u8> {
        self.request_body().to_ascii_uppercase()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}
