//! Transport seam between the initiator and the receiving endpoint.
//!
//! A transport answers one capability question
//! ([`Transport::supports_duplex`]) and carries one call
//! ([`Transport::issue`]): it delivers the request stream to a [`Handler`]
//! on the receiving side and returns as soon as the handler commits a
//! response head, without waiting for the request stream to end.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cancel::CancelSignal;
use crate::channel::BodyReceiver;
use crate::error::DuplexResult;
use crate::exchange::ServerExchange;
use crate::protocol::ProtocolVersion;

/// Boxed `Send` future alias used at the transport seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receiving-side callback, invoked once per exchange.
pub type Handler = Arc<dyn Fn(ServerExchange) -> BoxFuture<'static, ()> + Send + Sync>;

/// Describes the call the initiator is making.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub version: ProtocolVersion,
    /// The initiator needs the response to overlap the request body.
    pub full_duplex: bool,
    pub method: String,
    pub path: String,
}

impl RequestHead {
    /// A `POST` to `path` that does not require full duplex.
    pub fn post(version: ProtocolVersion, path: impl Into<String>) -> Self {
        Self {
            version,
            full_duplex: false,
            method: "POST".to_string(),
            path: path.into(),
        }
    }

    pub fn with_full_duplex(mut self, full_duplex: bool) -> Self {
        self.full_duplex = full_duplex;
        self
    }
}

/// Response status committed by the receiving endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
}

/// What the initiator gets back from [`Transport::issue`].
#[derive(Debug)]
pub struct CallResponse {
    pub status: u16,
    pub version: ProtocolVersion,
    /// Consumer of the response stream; readable while the request is
    /// still being written.
    pub body: BodyReceiver,
}

/// A connection provider able to carry duplex exchanges.
pub trait Transport: Send + Sync {
    /// Whether `version` supports independently progressing request and
    /// response streams on this transport.
    fn supports_duplex(&self, version: ProtocolVersion) -> bool;

    /// Issue a call, streaming `body` as the request.
    ///
    /// Returns once the response head is available. Fails with
    /// `Capability` before any traffic if `head.full_duplex` is set on an
    /// incapable version, and with `Cancelled` if `cancel` fires first.
    fn issue<'a>(
        &'a self,
        head: RequestHead,
        body: BodyReceiver,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, DuplexResult<CallResponse>>;
}
