//! End-to-end orchestrator tests over mock providers

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use callflow_relay::events::{ChannelSink, EndReason, EventSink, OrchestratorEvent};
use callflow_relay::providers::ProviderRegistry;
use callflow_relay::session::OutboundMessage;
use callflow_relay::workflow::{StaticWorkflowSource, WorkflowContext, WorkflowSource};
use callflow_relay::{Error, Orchestrator};

mod common;
use common::{
    MockEmbedder, MockLanguageModel, MockSynthesizer, MockTranscriber, loud_frame, shared,
    test_config,
};

const RECV_BUDGET: Duration = Duration::from_secs(60);

fn workflows() -> Arc<dyn WorkflowSource> {
    let context = WorkflowContext {
        instructions: "Be helpful and brief.".to_string(),
        ..WorkflowContext::default()
    };
    Arc::new(StaticWorkflowSource::new().with_context("wf-1", context))
}

fn orchestrator_with(
    registry: ProviderRegistry,
    events: Arc<dyn EventSink>,
) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::new(test_config(), Arc::new(registry), workflows(), events)
            .expect("orchestrator must build"),
    )
}

/// Registry with one healthy provider per stage
fn healthy_registry(transcript: &str) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register_transcriber("stt-a", shared(MockTranscriber::new(transcript)));
    registry.register_language_model("llm-a", shared(MockLanguageModel::new()));
    registry.register_synthesizer("tts-a", shared(MockSynthesizer::new()));
    registry
}

async fn recv_reply(rx: &mut mpsc::Receiver<OutboundMessage>) -> OutboundMessage {
    timeout(RECV_BUDGET, rx.recv())
        .await
        .expect("reply within budget")
        .expect("channel open")
}

#[tokio::test(start_paused = true)]
async fn boundary_crossing_produces_one_response() {
    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(healthy_registry("what are your hours"), events);
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    // Two frames satisfy bytes and count but not span; no response yet.
    for _ in 0..2 {
        orchestrator
            .process_inbound_audio("s1", loud_frame())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert!(out_rx.try_recv().is_err());

    // Third frame pushes the span past threshold.
    orchestrator
        .process_inbound_audio("s1", loud_frame())
        .await
        .unwrap();

    let reply = recv_reply(&mut out_rx).await;
    assert_eq!(reply.session_id, "s1");
    assert_eq!(reply.text, "You said: what are your hours");
    assert_eq!(reply.voice_tag, "alloy");
    assert!(reply.audio.is_some());

    let metrics = orchestrator
        .stop_session("s1", EndReason::Stopped)
        .await
        .unwrap();
    assert_eq!(metrics.samples, 1);
    assert_eq!(metrics.errors, 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_dtmf_is_served_from_cache() {
    let llm = shared(MockLanguageModel::new());
    let mut registry = ProviderRegistry::new();
    registry.register_language_model("llm-a", llm.clone());
    registry.register_synthesizer("tts-a", shared(MockSynthesizer::new()));

    let (sink, mut event_rx) = ChannelSink::new();
    let orchestrator = orchestrator_with(registry, Arc::new(sink));
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    orchestrator.process_dtmf("s1", '1').await.unwrap();
    let first = recv_reply(&mut out_rx).await;
    assert_eq!(first.text, "You said: one");

    orchestrator.process_dtmf("s1", '1').await.unwrap();
    let second = recv_reply(&mut out_rx).await;
    assert_eq!(second.text, first.text);

    // Second reply came from the cache, not the model.
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    let mut cache_hits = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        if let OrchestratorEvent::AudioProcessed { cache_hit, .. } = event {
            cache_hits.push(cache_hit);
        }
    }
    assert_eq!(cache_hits, vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn close_paraphrase_is_served_semantically() {
    let llm = shared(MockLanguageModel::new());
    let mut registry = ProviderRegistry::new();
    registry.register_language_model("llm-a", llm.clone());
    registry.register_synthesizer("tts-a", shared(MockSynthesizer::new()));
    registry.set_embedder(shared(
        MockEmbedder::new(vec![0.0, 1.0, 0.0])
            .with_vector("one", vec![1.0, 0.0, 0.0])
            .with_vector("two", vec![0.98, 0.02, 0.0]),
    ));

    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(registry, events);
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    orchestrator.process_dtmf("s1", '1').await.unwrap();
    let first = recv_reply(&mut out_rx).await;
    assert_eq!(first.text, "You said: one");

    // "two" embeds close enough to "one" to clear the 0.85 threshold.
    orchestrator.process_dtmf("s1", '2').await.unwrap();
    let second = recv_reply(&mut out_rx).await;
    assert_eq!(second.text, first.text);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn exact_repeat_skips_the_embedder() {
    let embedder = shared(MockEmbedder::new(vec![0.0, 1.0, 0.0]));
    let mut registry = ProviderRegistry::new();
    registry.register_language_model("llm-a", shared(MockLanguageModel::new()));
    registry.register_synthesizer("tts-a", shared(MockSynthesizer::new()));
    registry.set_embedder(embedder.clone());

    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(registry, events);
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    orchestrator.process_dtmf("s1", '1').await.unwrap();
    let first = recv_reply(&mut out_rx).await;
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    // The exact fingerprint answers before the embedder is consulted.
    orchestrator.process_dtmf("s1", '1').await.unwrap();
    let second = recv_reply(&mut out_rx).await;
    assert_eq!(second.text, first.text);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_buffer_flushes_after_fallback_window() {
    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(healthy_registry("yes"), events);
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    // A single frame never crosses the boundary on its own.
    orchestrator
        .process_inbound_audio("s1", loud_frame())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert!(out_rx.try_recv().is_err());

    // The three-second window elapses and the partial utterance flushes.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let reply = recv_reply(&mut out_rx).await;
    assert_eq!(reply.text, "You said: yes");
}

#[tokio::test(start_paused = true)]
async fn chunks_during_execution_wait_for_the_next_run() {
    let llm = shared(MockLanguageModel::with_delay(Duration::from_secs(1)));
    let mut registry = ProviderRegistry::new();
    registry.register_transcriber("stt-a", shared(MockTranscriber::new("hello")));
    registry.register_language_model("llm-a", llm.clone());
    registry.register_synthesizer("tts-a", shared(MockSynthesizer::new()));

    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(registry, events);
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    // Six frames, 400ms apart: the first three reach a boundary and
    // start a slow run; the rest accumulate while it is in flight.
    for _ in 0..6 {
        orchestrator
            .process_inbound_audio("s1", loud_frame())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    let first = recv_reply(&mut out_rx).await;
    let second = recv_reply(&mut out_rx).await;
    assert_eq!(first.text, "You said: hello");
    assert_eq!(second.text, "You said: hello");

    // Exactly two executions: never one per frame, never overlapped.
    assert_eq!(llm.calls.load(Ordering::SeqCst), 2);

    let metrics = orchestrator
        .stop_session("s1", EndReason::Stopped)
        .await
        .unwrap();
    assert_eq!(metrics.samples, 2);
}

#[tokio::test(start_paused = true)]
async fn silent_caller_is_reengaged_then_dismissed() {
    let (sink, mut event_rx) = ChannelSink::new();
    let orchestrator = orchestrator_with(healthy_registry("hi"), Arc::new(sink));
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(15_100)).await;
    let prompt = recv_reply(&mut out_rx).await;
    assert_eq!(prompt.text, "Are you still there?");
    assert_eq!(orchestrator.sessions().len().await, 1);

    tokio::time::sleep(Duration::from_millis(15_100)).await;
    let farewell = recv_reply(&mut out_rx).await;
    assert_eq!(farewell.text, "Goodbye for now.");

    // Give the driver a beat to finish teardown.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orchestrator.sessions().len().await, 0);

    let mut ended_reason = None;
    while let Ok(event) = event_rx.try_recv() {
        if let OrchestratorEvent::SessionEnded { reason, .. } = event {
            ended_reason = Some(reason);
        }
    }
    assert_eq!(ended_reason, Some(EndReason::SilenceTimeout));
}

#[tokio::test(start_paused = true)]
async fn unusable_flushed_audio_asks_for_a_repeat() {
    // Transcription succeeds but yields nothing.
    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(healthy_registry(""), events);
    let (out_tx, mut out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();
    orchestrator
        .process_inbound_audio("s1", loud_frame())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3100)).await;
    let reply = recv_reply(&mut out_rx).await;
    assert!(reply.text.contains("didn't catch that"));

    let metrics = orchestrator
        .stop_session("s1", EndReason::Stopped)
        .await
        .unwrap();
    assert_eq!(metrics.errors, 1);
    assert_eq!(metrics.samples, 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_and_stopped_sessions_are_rejected() {
    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(healthy_registry("hi"), events);
    let (out_tx, _out_rx) = mpsc::channel(8);

    let err = orchestrator
        .process_inbound_audio("ghost", loud_frame())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();
    orchestrator
        .stop_session("s1", EndReason::Stopped)
        .await
        .unwrap();

    let err = orchestrator
        .stop_session("s1", EndReason::Stopped)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn duplicate_session_ids_fail_to_start() {
    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(healthy_registry("hi"), events);
    let (out_tx, _out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx.clone())
        .await
        .unwrap();
    let err = orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test(start_paused = true)]
async fn invalid_dtmf_digit_is_malformed() {
    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);
    let orchestrator = orchestrator_with(healthy_registry("hi"), events);
    let (out_tx, _out_rx) = mpsc::channel(8);

    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();
    let err = orchestrator.process_dtmf("s1", 'x').await.unwrap_err();
    assert!(matches!(err, Error::Malformed(_)));
}

#[tokio::test]
async fn orchestrator_requires_a_language_model() {
    let mut registry = ProviderRegistry::new();
    registry.register_synthesizer("tts-a", shared(MockSynthesizer::new()));
    let events: Arc<dyn EventSink> = Arc::new(callflow_relay::events::TracingSink);

    let result = Orchestrator::new(test_config(), Arc::new(registry), workflows(), events);
    assert!(matches!(result, Err(Error::Config(_))));
}
