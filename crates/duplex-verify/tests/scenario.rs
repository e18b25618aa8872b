//! End-to-end scenarios over the loopback transport.

use std::sync::Arc;
use std::time::Duration;

use duplex_core::{
    Action, Actor, BoxFuture, DuplexError, ExchangeProcessor, ExchangeStatus, Handler,
    LoopbackTransport, ProcessorState, ProtocolVersion, ServerExchange, Uppercase,
};
use duplex_verify::{Harness, Property, ScenarioConfig, Verdict};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reference_scenario_overlaps_both_streams() {
    let config = ScenarioConfig::default();
    let mut harness = Harness::loopback();
    let outcome = harness.run(&config).await.unwrap();

    assert_eq!(outcome.status, ExchangeStatus::Success);
    assert_eq!(outcome.response_status, 200);
    assert_eq!(outcome.response_body.len(), 10_000);
    assert_eq!(outcome.response_body, config.expected_response());
    assert!(outcome.transform_holds(&config));
    assert!(outcome.send_error.is_none());
    assert!(outcome.receive_error.is_none());

    let ordering = outcome.ordering();
    assert!(ordering.all_hold(), "{ordering:?}");
    ordering.ensure().unwrap();

    let server = outcome.server.as_ref().unwrap();
    assert_eq!(server.state, ProcessorState::Done);
    assert_eq!(server.bytes_read, 10_000);
    assert_eq!(server.bytes_written, 10_000);

    let timeline = &outcome.timeline;
    assert!(timeline.has_unique_sequence());
    assert_eq!(timeline.count(Actor::Client, Action::WriteDone), 10);
    assert_eq!(timeline.count(Actor::Client, Action::EndOfStream), 1);
    assert_eq!(timeline.count(Actor::Server, Action::EndOfStream), 1);
}

#[tokio::test]
async fn http2_scenario_on_current_thread() {
    let config = ScenarioConfig {
        version: ProtocolVersion::Http2,
        ..Default::default()
    };
    let outcome = Harness::loopback().run(&config).await.unwrap();

    assert_eq!(outcome.status, ExchangeStatus::Success);
    assert!(outcome.transform_holds(&config));
    assert!(outcome.ordering().all_hold());
}

#[tokio::test]
async fn response_chunking_may_differ_from_request() {
    let config = ScenarioConfig {
        read_size: 300,
        yield_between_writes: false,
        ..Default::default()
    };
    let outcome = Harness::loopback().run(&config).await.unwrap();

    assert!(outcome.transform_holds(&config));
    assert_eq!(outcome.response_chunks, 40);
    assert!(outcome.ordering().is_clean());
}

#[tokio::test]
async fn incapable_version_rejected_before_traffic() {
    let config = ScenarioConfig {
        version: ProtocolVersion::Http10,
        ..Default::default()
    };
    let mut harness = Harness::loopback();
    let err = harness.run(&config).await.unwrap_err();

    assert_eq!(
        err,
        DuplexError::Capability {
            version: ProtocolVersion::Http10
        }
    );
    assert_eq!(harness.counter().current(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mid_stream_read_error_aborts_exchange() {
    let config = ScenarioConfig {
        fail_after: Some(4),
        ..Default::default()
    };
    let outcome = Harness::loopback().run(&config).await.unwrap();

    assert_eq!(outcome.status, ExchangeStatus::Aborted);
    assert!(matches!(outcome.receive_error, Some(DuplexError::Reset(_))));
    assert!(outcome.send_error.is_none());
    // Bytes delivered before the failure stay delivered.
    assert_eq!(outcome.response_body.len(), 4_000);
    assert!(outcome.transform_holds(&config));

    let server = outcome.server.as_ref().unwrap();
    assert_eq!(server.status, ExchangeStatus::Aborted);
    assert_eq!(server.state, ProcessorState::Aborted);
    assert_eq!(server.chunks_read, 4);
    assert!(matches!(server.error, Some(DuplexError::Read(_))));

    let timeline = &outcome.timeline;
    let failed = timeline.first(Actor::Server, Action::ReadFailed).unwrap();
    assert!(
        timeline
            .after(Actor::Server, failed)
            .all(|e| !matches!(e.action, Action::WriteIssued | Action::WriteDone))
    );
}

#[tokio::test]
async fn half_duplex_processor_breaks_the_exchange() {
    let handler = duplex_core::handler(|| ExchangeProcessor::new(Uppercase).half_duplex(), None);
    let mut harness = Harness::new(Arc::new(LoopbackTransport::new(handler)));
    let config = ScenarioConfig::default();
    let outcome = harness.run(&config).await.unwrap();

    assert_eq!(outcome.status, ExchangeStatus::Aborted);
    assert_eq!(outcome.response_body, config.chunk().to_ascii_uppercase());
    assert!(matches!(outcome.receive_error, Some(DuplexError::Reset(_))));
    assert!(outcome.send_error.is_some());
}

fn stalled_handler(send_head: bool) -> Handler {
    Arc::new(move |mut server: ServerExchange| -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if send_head {
                server.send_head(200).unwrap();
            }
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(server);
        })
    })
}

#[tokio::test(start_paused = true)]
async fn deadline_before_head_cancels_the_call() {
    let mut harness = Harness::new(Arc::new(LoopbackTransport::new(stalled_handler(false))));
    let config = ScenarioConfig {
        deadline_ms: Some(100),
        ..Default::default()
    };

    let err = harness.run(&config).await.unwrap_err();
    assert_eq!(err, DuplexError::Cancelled);
    assert!(err.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn deadline_mid_stream_unblocks_both_tasks() {
    let mut harness = Harness::new(Arc::new(LoopbackTransport::new(stalled_handler(true))));
    let config = ScenarioConfig {
        deadline_ms: Some(100),
        ..Default::default()
    };

    let outcome = harness.run(&config).await.unwrap();
    assert_eq!(outcome.status, ExchangeStatus::Aborted);
    assert_eq!(outcome.receive_error, Some(DuplexError::Cancelled));
    assert_eq!(outcome.send_error, Some(DuplexError::Cancelled));
    assert!(outcome.response_body.is_empty());

    // No server log: the server-side property cannot be judged.
    let ordering = outcome.ordering();
    assert_eq!(
        ordering.verdict(Property::ServerReadBeforeLastWrite),
        Verdict::NotEvaluated
    );
}

fn shipped_scenario(name: &str) -> ScenarioConfig {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../scenarios")
        .join(name);
    ScenarioConfig::from_file(&path).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shipped_scenarios_behave_as_described() {
    let reference = shipped_scenario("reference.toml");
    assert_eq!(reference, ScenarioConfig::default());
    let outcome = Harness::loopback().run(&reference).await.unwrap();
    assert_eq!(outcome.status, ExchangeStatus::Success);
    assert!(outcome.ordering().all_hold());

    let fault = shipped_scenario("mid-stream-fault.toml");
    assert_eq!(fault.version, ProtocolVersion::Http2);
    assert_eq!(fault.fail_after, Some(4));
    let outcome = Harness::loopback().run(&fault).await.unwrap();
    assert_eq!(outcome.status, ExchangeStatus::Aborted);
    assert_eq!(outcome.response_body.len(), 4_000);
}
