//! Initiator tasks and the exchange harness.
//!
//! The initiator runs as two concurrent tasks. The send task writes the
//! request body chunk by chunk and closes it; the issue-and-receive task
//! issues the call and reads the response until end-of-stream. Both stamp
//! their actions on one [`SequenceCounter`], shared with the processor when
//! it runs in-process, so the merged [`Timeline`] shows how the two
//! streams overlapped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use duplex_core::{cancel, channel};
use duplex_core::{
    Action, Actor, BodySender, DuplexError, DuplexResult, EventRecord, EventRecorder, Exchange,
    ExchangeProcessor, ExchangeStatus, Handler, LoopbackTransport, ProcessorReport, RequestHead,
    SequenceCounter, ServerExchange, Timeline, Transport, Uppercase,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ordering::OrderingReport;
use crate::scenario::ScenarioConfig;

/// Upper bound on waiting for a processor report once the exchange ended.
const REPORT_WAIT: Duration = Duration::from_secs(5);

/// Processor reports flowing back from an in-process receiving endpoint.
pub struct ServerReports {
    rx: mpsc::UnboundedReceiver<ProcessorReport>,
    dispatched: Arc<AtomicU64>,
    consumed: u64,
}

impl ServerReports {
    /// An uppercase-processor handler that records server events on
    /// `counter`, paired with the reports it produces.
    pub fn uppercase(counter: SequenceCounter) -> (Handler, ServerReports) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = duplex_core::handler(
            move || {
                ExchangeProcessor::new(Uppercase)
                    .recorder(EventRecorder::new(counter.clone(), Actor::Server))
            },
            Some(tx),
        );

        let dispatched = Arc::new(AtomicU64::new(0));
        let seen = dispatched.clone();
        let handler: Handler = Arc::new(move |server: ServerExchange| {
            seen.fetch_add(1, Ordering::SeqCst);
            inner(server)
        });

        let reports = ServerReports {
            rx,
            dispatched,
            consumed: 0,
        };
        (handler, reports)
    }

    /// The report of the most recently dispatched exchange.
    ///
    /// Reports of earlier exchanges whose calls failed are skipped.
    async fn latest(&mut self) -> Option<ProcessorReport> {
        let target = self.dispatched.load(Ordering::SeqCst);
        let mut latest = None;
        while self.consumed < target {
            match tokio::time::timeout(REPORT_WAIT, self.rx.recv()).await {
                Ok(Some(report)) => {
                    self.consumed += 1;
                    latest = Some(report);
                }
                Ok(None) => return latest,
                Err(_) => {
                    warn!(pending = target - self.consumed, "processor report not received");
                    return latest;
                }
            }
        }
        latest
    }
}

/// Everything observed while driving one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub status: ExchangeStatus,
    pub response_status: u16,
    pub response_body: Vec<u8>,
    pub response_chunks: usize,
    /// Error reported by the send task, distinct from the event log.
    pub send_error: Option<DuplexError>,
    /// Error that ended the response stream early.
    pub receive_error: Option<DuplexError>,
    /// The processor's report, when it ran in-process.
    pub server: Option<ProcessorReport>,
    pub timeline: Timeline,
}

impl ExchangeOutcome {
    pub fn ordering(&self) -> OrderingReport {
        OrderingReport::evaluate(&self.timeline)
    }

    /// The response is the uppercased request: all of it on success, a
    /// prefix of it when the exchange aborted mid-stream.
    pub fn transform_holds(&self, config: &ScenarioConfig) -> bool {
        let expected = config.expected_response();
        match self.status {
            ExchangeStatus::Success => self.response_body == expected,
            _ => expected.starts_with(&self.response_body),
        }
    }
}

/// Drives scenarios against a [`Transport`].
pub struct Harness {
    transport: Arc<dyn Transport>,
    counter: SequenceCounter,
    reports: Option<ServerReports>,
}

impl Harness {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            counter: SequenceCounter::new(),
            reports: None,
        }
    }

    /// In-process loopback to the uppercase processor, with its events on
    /// the harness counter.
    pub fn loopback() -> Self {
        let counter = SequenceCounter::new();
        let (handler, reports) = ServerReports::uppercase(counter.clone());
        Self {
            transport: Arc::new(LoopbackTransport::new(handler)),
            counter,
            reports: Some(reports),
        }
    }

    /// Collect processor reports whose events were recorded on `counter`.
    pub fn with_server_reports(mut self, counter: SequenceCounter, reports: ServerReports) -> Self {
        self.counter = counter;
        self.reports = Some(reports);
        self
    }

    pub fn counter(&self) -> &SequenceCounter {
        &self.counter
    }

    /// Drive one exchange described by `config`.
    ///
    /// Fails when `config` does not validate, or when the call itself
    /// fails: a capability mismatch (before any channel exists), a transport
    /// error or cancellation before the response head. Failures after the
    /// call returned are reported in the outcome.
    pub async fn run(&mut self, config: &ScenarioConfig) -> DuplexResult<ExchangeOutcome> {
        config
            .validate()
            .map_err(|err| DuplexError::Config(err.to_string()))?;
        let version = config.version;
        let mut exchange = Exchange::new(version, self.transport.supports_duplex(version));
        if config.full_duplex {
            if let Err(err) = exchange.enable_full_duplex() {
                exchange.complete(ExchangeStatus::Failed);
                warn!(%version, error = %err, "duplex exchange rejected");
                return Err(err);
            }
        }

        let (cancel_handle, cancel) = cancel::pair(config.deadline());
        let (request_tx, request_rx) = channel::open(cancel.clone());
        let (error_tx, error_rx) = oneshot::channel();
        let sender = tokio::spawn(send_task(
            request_tx,
            SendPlan::from_config(config),
            EventRecorder::new(self.counter.clone(), Actor::Client),
            error_tx,
        ));

        let mut recorder = EventRecorder::new(self.counter.clone(), Actor::Client);
        let head = RequestHead::post(version, config.path.clone()).with_full_duplex(config.full_duplex);
        let call = match self.transport.issue(head, request_rx, cancel).await {
            Ok(call) => call,
            Err(err) => {
                cancel_handle.cancel();
                let _ = sender.await;
                exchange.complete(ExchangeStatus::Failed);
                warn!(%version, error = %err, "call failed");
                return Err(err);
            }
        };
        recorder.record(Action::CallReturned, 0);
        info!(%version, status = call.status, "call returned");

        let mut body = call.body;
        let mut response_body = Vec::new();
        let mut response_chunks = 0;
        let mut receive_error = None;
        loop {
            recorder.record(Action::ReadIssued, 0);
            match body.read(config.read_size).await {
                Ok(Some(chunk)) => {
                    recorder.record(Action::ReadDone, chunk.len());
                    response_chunks += 1;
                    response_body.extend_from_slice(&chunk);
                }
                Ok(None) => {
                    recorder.record(Action::EndOfStream, 0);
                    break;
                }
                Err(err) => {
                    recorder.record(Action::ReadFailed, 0);
                    debug!(error = %err, "response stream ended early");
                    receive_error = Some(err);
                    break;
                }
            }
        }
        drop(body);
        if receive_error.is_some() {
            cancel_handle.cancel();
        }

        let send_events = match sender.await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "send task did not complete");
                Vec::new()
            }
        };
        // Completion of the send task closes the error slot.
        let send_error = error_rx.await.ok();

        let server = match self.reports.as_mut() {
            Some(reports) => reports.latest().await,
            None => None,
        };

        let server_ok = server
            .as_ref()
            .is_none_or(|report| report.status == ExchangeStatus::Success);
        if send_error.is_none() && receive_error.is_none() && call.status == 200 && server_ok {
            exchange.complete(ExchangeStatus::Success);
        } else {
            exchange.complete(ExchangeStatus::Aborted);
        }

        let mut logs = vec![send_events, recorder.into_events()];
        if let Some(report) = &server {
            logs.push(report.events.clone());
        }
        let timeline = Timeline::merge(logs);

        info!(
            %version,
            status = ?exchange.status(),
            bytes = response_body.len(),
            chunks = response_chunks,
            events = timeline.len(),
            "exchange finished"
        );

        Ok(ExchangeOutcome {
            status: exchange.status(),
            response_status: call.status,
            response_body,
            response_chunks,
            send_error,
            receive_error,
            server,
            timeline,
        })
    }
}

struct SendPlan {
    chunk: Bytes,
    chunks: usize,
    fail_after: Option<usize>,
    yield_between_writes: bool,
}

impl SendPlan {
    fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            chunk: config.chunk(),
            chunks: config.chunks,
            fail_after: config.fail_after,
            yield_between_writes: config.yield_between_writes,
        }
    }
}

/// Write the request body, then close it.
///
/// A failed write is reported on `errors` and ends the task. With
/// `fail_after` set, the stream is aborted with a read error once that many
/// chunks have been delivered.
async fn send_task(
    mut tx: BodySender,
    plan: SendPlan,
    mut recorder: EventRecorder,
    errors: oneshot::Sender<DuplexError>,
) -> Vec<EventRecord> {
    for index in 0..plan.chunks {
        if plan.fail_after == Some(index) {
            tx.abort(DuplexError::Read(format!(
                "injected fault after {index} chunks"
            )));
            recorder.record(Action::StreamClosed, 0);
            return recorder.into_events();
        }

        recorder.record(Action::WriteIssued, plan.chunk.len());
        match tx.write(plan.chunk.clone()).await {
            Ok(n) => {
                recorder.record(Action::WriteDone, n);
            }
            Err(err) => {
                recorder.record(Action::WriteFailed, 0);
                debug!(index, error = %err, "request write failed");
                let _ = errors.send(err);
                return recorder.into_events();
            }
        }

        if plan.yield_between_writes {
            tokio::task::yield_now().await;
        }
    }

    tx.close();
    recorder.record(Action::StreamClosed, 0);
    recorder.into_events()
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_core::ProtocolVersion;

    #[tokio::test]
    async fn send_task_writes_then_closes() {
        let (tx, mut rx) = channel::open(duplex_core::CancelSignal::never());
        let (error_tx, error_rx) = oneshot::channel();
        let config = ScenarioConfig {
            chunks: 3,
            chunk_size: 4,
            ..Default::default()
        };
        let recorder = EventRecorder::new(SequenceCounter::new(), Actor::Client);
        let task = tokio::spawn(send_task(tx, SendPlan::from_config(&config), recorder, error_tx));

        let mut body = Vec::new();
        while let Some(chunk) = rx.read(1000).await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        let events = task.await.unwrap();

        assert_eq!(body, b"hellhellhell");
        assert!(error_rx.await.is_err());
        let timeline = Timeline::merge([events]);
        assert_eq!(timeline.count(Actor::Client, Action::WriteDone), 3);
        assert_eq!(
            timeline.events().last().map(|e| e.action),
            Some(Action::StreamClosed)
        );
    }

    #[tokio::test]
    async fn send_task_reports_write_errors() {
        let (tx, rx) = channel::open(duplex_core::CancelSignal::never());
        drop(rx);
        let (error_tx, error_rx) = oneshot::channel();
        let recorder = EventRecorder::new(SequenceCounter::new(), Actor::Client);
        let events = send_task(
            tx,
            SendPlan::from_config(&ScenarioConfig::default()),
            recorder,
            error_tx,
        )
        .await;

        assert_eq!(error_rx.await, Ok(DuplexError::StreamClosed));
        assert_eq!(events.last().map(|e| e.action), Some(Action::WriteFailed));
    }

    #[tokio::test]
    async fn invalid_scenario_is_rejected_before_traffic() {
        let mut harness = Harness::loopback();
        let config = ScenarioConfig {
            read_size: 0,
            ..Default::default()
        };

        let err = harness.run(&config).await.unwrap_err();
        match err {
            DuplexError::Config(msg) => assert!(msg.contains("read_size"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(harness.counter().current(), 0);
    }

    #[tokio::test]
    async fn stale_reports_are_skipped() {
        let mut harness = Harness::loopback();

        // Half-duplex HTTP/1.0 reaches the processor, which rejects it.
        let rejected = ScenarioConfig {
            version: ProtocolVersion::Http10,
            full_duplex: false,
            ..Default::default()
        };
        let err = harness.run(&rejected).await.unwrap_err();
        assert!(matches!(err, DuplexError::Capability { .. }));

        let outcome = harness.run(&ScenarioConfig::default()).await.unwrap();
        let server = outcome.server.unwrap();
        assert_eq!(server.status, ExchangeStatus::Success);
        assert_eq!(server.bytes_read, 10_000);
    }
}
