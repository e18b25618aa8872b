//! Exchange processor: the receiving endpoint's read/transform/write loop.
//!
//! ```text
//! Idle ──enable duplex, send head──▶ Responding ──end of input──▶ Draining ──close──▶ Done
//!                                        │
//!                                        └──read/write error──▶ Aborted
//! ```
//!
//! Each input chunk is transformed and written out before the next read,
//! so output becomes visible to the initiator chunk by chunk while it is
//! still sending input. Errors are fatal and never retried.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::MAX_CHUNK_SIZE;
use crate::error::{DuplexError, DuplexResult};
use crate::events::{Action, EventRecord, EventRecorder};
use crate::exchange::{ExchangeStatus, ServerExchange};
use crate::transport::{BoxFuture, Handler};

/// Deterministic per-chunk transform.
pub trait Transform: Send {
    fn apply(&mut self, chunk: Bytes) -> Bytes;
}

/// ASCII uppercase, the reference transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uppercase;

impl Transform for Uppercase {
    fn apply(&mut self, chunk: Bytes) -> Bytes {
        Bytes::from(chunk.to_ascii_uppercase())
    }
}

impl<F> Transform for F
where
    F: FnMut(Bytes) -> Bytes + Send,
{
    fn apply(&mut self, chunk: Bytes) -> Bytes {
        self(chunk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessorState {
    Idle,
    Responding,
    Draining,
    Done,
    Aborted,
}

/// Summary of one processed exchange.
#[derive(Debug, Clone)]
pub struct ProcessorReport {
    pub status: ExchangeStatus,
    pub state: ProcessorState,
    pub error: Option<DuplexError>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub chunks_read: usize,
    pub chunks_written: usize,
    /// Server-side events, empty unless a recorder was attached.
    pub events: Vec<EventRecord>,
}

/// Runs one exchange through a [`Transform`].
pub struct ExchangeProcessor<T> {
    transform: T,
    chunk_size: usize,
    enable_duplex: bool,
    state: ProcessorState,
    recorder: Option<EventRecorder>,
    bytes_read: u64,
    bytes_written: u64,
    chunks_read: usize,
    chunks_written: usize,
}

impl<T: Transform> ExchangeProcessor<T> {
    pub fn new(transform: T) -> Self {
        Self {
            transform,
            chunk_size: MAX_CHUNK_SIZE,
            enable_duplex: true,
            state: ProcessorState::Idle,
            recorder: None,
            bytes_read: 0,
            bytes_written: 0,
            chunks_read: 0,
            chunks_written: 0,
        }
    }

    /// Maximum bytes per input read.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be > 0");
        self.chunk_size = chunk_size;
        self
    }

    /// Record server-side events into `recorder`.
    pub fn recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Leave the exchange phase-sequential instead of enabling duplex mode.
    pub fn half_duplex(mut self) -> Self {
        self.enable_duplex = false;
        self
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Process the exchange to completion.
    pub async fn run(mut self, mut server: ServerExchange) -> ProcessorReport {
        let version = server.exchange().version();
        let outcome = self.respond(&mut server).await;

        let exchange = match &outcome {
            Ok(()) => {
                self.transition(ProcessorState::Draining);
                let exchange = server.finish();
                self.transition(ProcessorState::Done);
                info!(
                    %version,
                    bytes_read = self.bytes_read,
                    bytes_written = self.bytes_written,
                    "exchange processed"
                );
                exchange
            }
            Err(err) => {
                self.transition(ProcessorState::Aborted);
                server.abort(err.clone())
            }
        };

        ProcessorReport {
            status: exchange.status(),
            state: self.state,
            error: outcome.err(),
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            chunks_read: self.chunks_read,
            chunks_written: self.chunks_written,
            events: self.recorder.map(EventRecorder::into_events).unwrap_or_default(),
        }
    }

    async fn respond(&mut self, server: &mut ServerExchange) -> DuplexResult<()> {
        if self.enable_duplex {
            server.enable_full_duplex()?;
        }
        server.send_head(200)?;
        self.transition(ProcessorState::Responding);

        loop {
            self.record(Action::ReadIssued, 0);
            let chunk = match server.read(self.chunk_size).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    self.record(Action::EndOfStream, 0);
                    return Ok(());
                }
                Err(err) => {
                    self.record(Action::ReadFailed, 0);
                    warn!(error = %err, chunks = self.chunks_read, "input read failed");
                    return Err(err);
                }
            };
            self.chunks_read += 1;
            self.bytes_read += chunk.len() as u64;
            self.record(Action::ReadDone, chunk.len());

            let output = self.transform.apply(chunk);
            self.record(Action::WriteIssued, output.len());
            match server.write(output).await {
                Ok(n) => {
                    self.chunks_written += 1;
                    self.bytes_written += n as u64;
                    self.record(Action::WriteDone, n);
                }
                Err(err) => {
                    self.record(Action::WriteFailed, 0);
                    warn!(error = %err, chunks = self.chunks_written, "output write failed");
                    return Err(err);
                }
            }
        }
    }

    fn transition(&mut self, next: ProcessorState) {
        debug!(from = ?self.state, to = ?next, "processor state");
        self.state = next;
    }

    fn record(&mut self, action: Action, bytes: usize) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(action, bytes);
        }
    }
}

/// Build a transport [`Handler`] that runs a fresh processor per exchange.
///
/// When `reports` is given, each exchange's [`ProcessorReport`] is sent on
/// it after the processor finishes.
pub fn handler<T, F>(factory: F, reports: Option<mpsc::UnboundedSender<ProcessorReport>>) -> Handler
where
    T: Transform + 'static,
    F: Fn() -> ExchangeProcessor<T> + Send + Sync + 'static,
{
    Arc::new(move |server: ServerExchange| -> BoxFuture<'static, ()> {
        let processor = factory();
        let reports = reports.clone();
        Box::pin(async move {
            let report = processor.run(server).await;
            if let Some(tx) = reports {
                let _ = tx.send(report);
            }
        })
    })
}

/// Handler running the uppercase processor with default settings.
pub fn uppercase_handler() -> Handler {
    handler(|| ExchangeProcessor::new(Uppercase), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use crate::channel::{self, BodyReceiver, BodySender};
    use crate::events::{Actor, SequenceCounter, Timeline};
    use crate::exchange::Exchange;
    use crate::protocol::ProtocolVersion;
    use crate::transport::{RequestHead, ResponseHead};
    use tokio::sync::oneshot;

    fn server(
        version: ProtocolVersion,
    ) -> (
        ServerExchange,
        BodySender,
        BodyReceiver,
        oneshot::Receiver<DuplexResult<ResponseHead>>,
    ) {
        let (request_tx, request_rx) = channel::open(CancelSignal::never());
        let (response_tx, response_rx) = channel::open(CancelSignal::never());
        let (head_tx, head_rx) = oneshot::channel();
        let exchange = Exchange::new(version, version.supports_independent_streams());
        let server = ServerExchange::new(
            exchange,
            RequestHead::post(version, "/"),
            request_rx,
            response_tx,
            head_tx,
        );
        (server, request_tx, response_rx, head_rx)
    }

    #[test]
    fn uppercase_transform() {
        let mut t = Uppercase;
        assert_eq!(t.apply(Bytes::from_static(b"helloWorld 42")), "HELLOWORLD 42");
    }

    #[test]
    fn closures_are_transforms() {
        let mut reverse = |chunk: Bytes| Bytes::from(chunk.iter().rev().copied().collect::<Vec<_>>());
        assert_eq!(reverse.apply(Bytes::from_static(b"abc")), "cba");
    }

    #[tokio::test]
    async fn echoes_uppercased_chunks_while_input_continues() {
        let (server, mut request_tx, mut response_rx, head_rx) = server(ProtocolVersion::Http11);
        let counter = SequenceCounter::new();
        let processor = ExchangeProcessor::new(Uppercase)
            .recorder(EventRecorder::new(counter.clone(), Actor::Server));
        let task = tokio::spawn(processor.run(server));

        let mut client = EventRecorder::new(counter, Actor::Client);
        assert_eq!(head_rx.await.unwrap(), Ok(ResponseHead { status: 200 }));

        let mut echoed = Vec::new();
        for word in ["alpha", "beta", "gamma"] {
            request_tx.write(word).await.unwrap();
            client.record(Action::WriteDone, word.len());
            let chunk = response_rx.read(MAX_CHUNK_SIZE).await.unwrap().unwrap();
            client.record(Action::ReadDone, chunk.len());
            echoed.push(chunk);
        }
        request_tx.close();
        assert_eq!(response_rx.read(MAX_CHUNK_SIZE).await, Ok(None));

        let report = task.await.unwrap();
        assert_eq!(echoed, vec!["ALPHA", "BETA", "GAMMA"]);
        assert_eq!(report.status, ExchangeStatus::Success);
        assert_eq!(report.state, ProcessorState::Done);
        assert_eq!(report.chunks_read, 3);
        assert_eq!(report.bytes_written, 14);
        assert!(report.error.is_none());

        // The second request chunk was written only after the first
        // response chunk had been read.
        let timeline = Timeline::merge([report.events, client.into_events()]);
        let first_response = timeline.first(Actor::Client, Action::ReadDone).unwrap();
        let last_request = timeline.last(Actor::Client, Action::WriteDone).unwrap();
        assert!(first_response < last_request);
        assert!(timeline.has_unique_sequence());
    }

    #[tokio::test]
    async fn read_error_aborts_without_further_writes() {
        let (server, mut request_tx, mut response_rx, head_rx) = server(ProtocolVersion::Http11);
        let counter = SequenceCounter::new();
        let processor = ExchangeProcessor::new(Uppercase)
            .recorder(EventRecorder::new(counter, Actor::Server));
        let task = tokio::spawn(processor.run(server));

        head_rx.await.unwrap().unwrap();
        request_tx.write("ok").await.unwrap();
        assert_eq!(response_rx.read(MAX_CHUNK_SIZE).await.unwrap().unwrap(), "OK");
        request_tx.abort(DuplexError::Read("injected".into()));

        let err = response_rx.read(MAX_CHUNK_SIZE).await.unwrap_err();
        assert!(matches!(err, DuplexError::Reset(_)));

        let report = task.await.unwrap();
        assert_eq!(report.status, ExchangeStatus::Aborted);
        assert_eq!(report.state, ProcessorState::Aborted);
        assert_eq!(report.error, Some(DuplexError::Read("injected".into())));

        let timeline = Timeline::merge([report.events]);
        let failed = timeline.first(Actor::Server, Action::ReadFailed).unwrap();
        assert!(
            timeline
                .after(Actor::Server, failed)
                .all(|e| e.action != Action::WriteIssued && e.action != Action::WriteDone)
        );
    }

    #[tokio::test]
    async fn write_error_stops_reading() {
        let (server, mut request_tx, response_rx, head_rx) = server(ProtocolVersion::Http2);
        let task = tokio::spawn(ExchangeProcessor::new(Uppercase).run(server));

        head_rx.await.unwrap().unwrap();
        drop(response_rx);
        request_tx.write("lost").await.unwrap();

        let report = task.await.unwrap();
        assert_eq!(report.error, Some(DuplexError::StreamClosed));
        assert_eq!(report.chunks_read, 1);
        assert_eq!(report.chunks_written, 0);
        assert!(request_tx.write("more").await.is_err());
    }

    #[tokio::test]
    async fn capability_mismatch_fails_the_call() {
        let (server, _request_tx, _response_rx, head_rx) = server(ProtocolVersion::Http10);
        let report = ExchangeProcessor::new(Uppercase).run(server).await;

        assert_eq!(report.status, ExchangeStatus::Failed);
        assert_eq!(report.state, ProcessorState::Aborted);
        assert_eq!(
            head_rx.await.unwrap(),
            Err(DuplexError::Capability {
                version: ProtocolVersion::Http10
            })
        );
    }

    #[tokio::test]
    async fn half_duplex_processor_cannot_keep_reading() {
        let (server, mut request_tx, mut response_rx, head_rx) = server(ProtocolVersion::Http11);
        let task = tokio::spawn(ExchangeProcessor::new(Uppercase).half_duplex().run(server));

        head_rx.await.unwrap().unwrap();
        request_tx.write("first").await.unwrap();
        assert_eq!(response_rx.read(MAX_CHUNK_SIZE).await.unwrap().unwrap(), "FIRST");

        let report = task.await.unwrap();
        assert_eq!(report.error, Some(DuplexError::ReadAfterResponse));
        assert_eq!(request_tx.write("second").await, Err(DuplexError::StreamClosed));
    }

    #[tokio::test]
    async fn handler_forwards_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = handler(|| ExchangeProcessor::new(Uppercase).chunk_size(2), Some(tx));

        let (server, mut request_tx, mut response_rx, head_rx) = server(ProtocolVersion::Http2);
        let task = tokio::spawn(handler(server));

        head_rx.await.unwrap().unwrap();
        let writer = tokio::spawn(async move {
            request_tx.write("abcd").await.unwrap();
            request_tx.close();
        });

        let mut body = Vec::new();
        while let Some(chunk) = response_rx.read(MAX_CHUNK_SIZE).await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        writer.await.unwrap();
        task.await.unwrap();

        assert_eq!(body, b"ABCD");
        let report = rx.recv().await.unwrap();
        assert_eq!(report.chunks_read, 2);
        assert_eq!(report.status, ExchangeStatus::Success);
    }
}
