//! Exchanges and the duplex mode controller.
//!
//! An [`Exchange`] is one request/response interaction. By default an
//! HTTP/1.1 receiver is phase-sequential: once it starts writing the
//! response body, further reads of the request body fail with
//! [`DuplexError::ReadAfterResponse`]. [`Exchange::enable_full_duplex`]
//! lifts that restriction, provided the transport reported the protocol
//! version as capable. Incapable versions fail fast with
//! [`DuplexError::Capability`] instead of silently degrading, which would
//! deadlock a receiver waiting for the full request against a sender
//! waiting for the response.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::channel::{BodyReceiver, BodySender};
use crate::error::{DuplexError, DuplexResult};
use crate::protocol::ProtocolVersion;
use crate::transport::{RequestHead, ResponseHead};

/// Lifecycle status of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangeStatus {
    Open,
    Success,
    /// The exchange never carried traffic (capability mismatch, call failure).
    Failed,
    /// A fatal error or cancellation ended the exchange mid-stream.
    Aborted,
}

impl ExchangeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExchangeStatus::Open)
    }
}

/// One logical request/response interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    version: ProtocolVersion,
    duplex_capable: bool,
    full_duplex: bool,
    status: ExchangeStatus,
}

impl Exchange {
    /// Create an exchange.
    ///
    /// `duplex_capable` is the transport's answer to "does this version
    /// support independently progressing streams". HTTP/2 exchanges start
    /// in full duplex when capable.
    pub fn new(version: ProtocolVersion, duplex_capable: bool) -> Self {
        Self {
            version,
            duplex_capable,
            full_duplex: duplex_capable && version.duplex_by_default(),
            status: ExchangeStatus::Open,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn is_duplex_capable(&self) -> bool {
        self.duplex_capable
    }

    pub fn is_full_duplex(&self) -> bool {
        self.full_duplex
    }

    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    /// Permit reading the request while the response is being written.
    ///
    /// No-op if already enabled.
    pub fn enable_full_duplex(&mut self) -> DuplexResult<()> {
        if self.full_duplex {
            return Ok(());
        }
        if !self.duplex_capable {
            return Err(DuplexError::Capability {
                version: self.version,
            });
        }
        self.full_duplex = true;
        debug!(version = %self.version, "full duplex enabled");
        Ok(())
    }

    /// Record the terminal status. The first terminal status wins.
    pub fn complete(&mut self, status: ExchangeStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }
}

type HeadSender = oneshot::Sender<DuplexResult<ResponseHead>>;

/// The receiving endpoint's handle on one exchange.
///
/// Owns the request stream consumer and the response stream producer.
/// Created by a transport and handed to its handler.
#[derive(Debug)]
pub struct ServerExchange {
    exchange: Exchange,
    head: RequestHead,
    request: BodyReceiver,
    response: BodySender,
    head_tx: Option<HeadSender>,
    body_started: bool,
}

impl ServerExchange {
    pub fn new(
        exchange: Exchange,
        head: RequestHead,
        request: BodyReceiver,
        response: BodySender,
        head_tx: oneshot::Sender<DuplexResult<ResponseHead>>,
    ) -> Self {
        Self {
            exchange,
            head,
            request,
            response,
            head_tx: Some(head_tx),
            body_started: false,
        }
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn request_head(&self) -> &RequestHead {
        &self.head
    }

    /// Enable duplex mode. Must happen before the first response body write.
    pub fn enable_full_duplex(&mut self) -> DuplexResult<()> {
        if self.body_started && !self.exchange.is_full_duplex() {
            return Err(DuplexError::ResponseStarted);
        }
        self.exchange.enable_full_duplex()
    }

    pub fn head_sent(&self) -> bool {
        self.head_tx.is_none()
    }

    /// Commit the response status. The caller's `issue` returns once this
    /// lands. A second call is ignored.
    pub fn send_head(&mut self, status: u16) -> DuplexResult<()> {
        let Some(tx) = self.head_tx.take() else {
            warn!(status, "superfluous send_head ignored");
            return Ok(());
        };
        tx.send(Ok(ResponseHead { status })).map_err(|_| {
            DuplexError::Transport("caller went away before the response head".into())
        })?;
        debug!(status, version = %self.exchange.version(), "response head sent");
        Ok(())
    }

    /// Read up to `max_len` bytes of the request body; `Ok(None)` at its end.
    pub async fn read(&mut self, max_len: usize) -> DuplexResult<Option<Bytes>> {
        if self.body_started && !self.exchange.is_full_duplex() {
            return Err(DuplexError::ReadAfterResponse);
        }
        self.request.read(max_len).await
    }

    /// Write a response body chunk, committing status 200 first if no head
    /// was sent yet.
    pub async fn write(&mut self, chunk: Bytes) -> DuplexResult<usize> {
        if !self.head_sent() {
            self.send_head(200)?;
        }
        self.body_started = true;
        self.response.write(chunk).await
    }

    /// Close the response stream and mark the exchange successful.
    pub fn finish(mut self) -> Exchange {
        if !self.head_sent() {
            if let Err(err) = self.send_head(200) {
                debug!(error = %err, "response head dropped on finish");
            }
        }
        self.response.close();
        self.exchange.complete(ExchangeStatus::Success);
        self.exchange
    }

    /// Abort the exchange.
    ///
    /// Before the head is sent the caller's `issue` fails with `err` and the
    /// exchange ends `Failed`, having carried no response. Afterwards the
    /// response stream is reset so the caller observes a premature closure
    /// after the bytes already delivered, and the exchange ends `Aborted`.
    pub fn abort(mut self, err: DuplexError) -> Exchange {
        let status = match self.head_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(err.clone()));
                ExchangeStatus::Failed
            }
            None => {
                self.response.abort(DuplexError::Reset(err.to_string()));
                ExchangeStatus::Aborted
            }
        };
        warn!(error = %err, version = %self.exchange.version(), ?status, "exchange aborted");
        self.exchange.complete(status);
        self.exchange
    }
}
