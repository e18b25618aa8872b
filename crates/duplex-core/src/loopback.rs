//! In-process transport.
//!
//! Hands the request stream straight to a [`Handler`] running on its own
//! task, with zero-buffer channels in both directions. Every byte crossing
//! the seam is a rendezvous between the two endpoints, which keeps the
//! causal order of client and server actions observable.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;
use tracing::{Instrument, debug, info_span};

use crate::cancel::CancelSignal;
use crate::channel::{self, BodyReceiver};
use crate::error::{DuplexError, DuplexResult};
use crate::exchange::{Exchange, ServerExchange};
use crate::protocol::ProtocolVersion;
use crate::transport::{BoxFuture, CallResponse, Handler, RequestHead, Transport};

pub struct LoopbackTransport {
    handler: Handler,
    next_id: AtomicU64,
}

impl LoopbackTransport {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(
        &self,
        head: RequestHead,
        body: BodyReceiver,
        cancel: CancelSignal,
    ) -> DuplexResult<CallResponse> {
        let version = head.version;
        let capable = self.supports_duplex(version);
        if head.full_duplex && !capable {
            return Err(DuplexError::Capability { version });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = channel::open(cancel.clone());
        let (head_tx, head_rx) = oneshot::channel();
        let server = ServerExchange::new(
            Exchange::new(version, capable),
            head,
            body,
            response_tx,
            head_tx,
        );

        let span = info_span!("exchange", id, %version);
        tokio::spawn((self.handler)(server).instrument(span));
        debug!(id, "exchange dispatched");

        let response = tokio::select! {
            head = head_rx => head.map_err(|_| {
                DuplexError::Transport("handler dropped the exchange without a response".into())
            })??,
            _ = cancel.cancelled() => return Err(DuplexError::Cancelled),
        };

        Ok(CallResponse {
            status: response.status,
            version,
            body: response_rx,
        })
    }
}

impl Transport for LoopbackTransport {
    fn supports_duplex(&self, version: ProtocolVersion) -> bool {
        version.supports_independent_streams()
    }

    fn issue<'a>(
        &'a self,
        head: RequestHead,
        body: BodyReceiver,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, DuplexResult<CallResponse>> {
        Box::pin(self.call(head, body, cancel))
    }
}
