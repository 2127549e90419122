//! Session orchestration
//!
//! The orchestrator owns the session registry and the shared pipeline,
//! and exposes the four operations the duplex channel maps onto: start a
//! session, feed it audio, feed it DTMF, stop it.
//!
//! Each session gets two tasks. The watchdog owns the silence and
//! fallback deadlines. The driver consumes [`SessionCommand`]s one at a
//! time, which is what guarantees at most one pipeline execution in
//! flight per session; chunks that arrive mid-execution accumulate in
//! the ingest buffer and the driver re-polls the boundary once the run
//! resolves.

pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::events::{EndReason, EventSink, OrchestratorEvent};
use crate::ingest::{AudioChunk, BoundaryDetector, BoundaryPolicy, Utterance, quality};
use crate::pipeline::cache::ResponseCache;
use crate::pipeline::{PipelineOutcome, ResponsePipeline};
use crate::providers::ProviderRegistry;
use crate::providers::failover::{FailoverManager, ProviderHealth};
use crate::session::registry::SessionRegistry;
use crate::session::{CallSession, OutboundMessage, SessionCommand, SessionState};
use crate::supervisor::{ActivitySignal, run_watchdog};
use crate::workflow::WorkflowSource;
use crate::{Error, Result};
use metrics::MetricsSnapshot;

/// Command queue depth per session driver
const COMMAND_BUFFER: usize = 32;

/// Signal queue depth per session watchdog
const SIGNAL_BUFFER: usize = 32;

/// Voice used when the workflow context names none
const DEFAULT_VOICE: &str = "alloy";

/// Spoken when a flushed partial utterance transcribes to nothing
const CLARIFICATION_PROMPT: &str = "Sorry, I didn't catch that. Could you say it again?";

/// Spoken when the pipeline fails outright
const APOLOGY_PROMPT: &str =
    "Sorry, I'm having trouble right now. Could you try that once more?";

/// Coordinates call sessions, their tasks, and the shared pipeline
pub struct Orchestrator {
    config: Config,
    sessions: Arc<SessionRegistry>,
    pipeline: Arc<ResponsePipeline>,
    failover: Arc<FailoverManager>,
    workflows: Arc<dyn WorkflowSource>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a config error when no language model is registered;
    /// nothing useful can run without generation.
    pub fn new(
        config: Config,
        providers: Arc<ProviderRegistry>,
        workflows: Arc<dyn WorkflowSource>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        if !providers.has_language_model() {
            return Err(Error::Config(
                "at least one language model backend required".to_string(),
            ));
        }

        let failover = Arc::new(FailoverManager::new(
            config.chains.clone(),
            config.failover,
        ));
        let cache = Arc::new(ResponseCache::new(
            config.cache.capacity,
            config.cache.similarity_threshold,
        ));
        let pipeline = Arc::new(ResponsePipeline::new(
            providers,
            Arc::clone(&failover),
            cache,
            config.pipeline.clone(),
        ));

        Ok(Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            pipeline,
            failover,
            workflows,
            events,
        })
    }

    /// The session registry
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The shared response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.pipeline.cache()
    }

    /// Health of every provider the failover manager has seen
    #[must_use]
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.failover.snapshot()
    }

    /// Start a session: load its workflow context, register it, and spawn
    /// its watchdog and driver.
    ///
    /// # Errors
    ///
    /// Returns an error for a duplicate session id or an unresolvable
    /// workflow reference.
    pub async fn start_session(
        &self,
        session_id: &str,
        language: &str,
        workflow_ref: &str,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Result<Arc<CallSession>> {
        let context = self.workflows.load(workflow_ref).await?;
        let voice = context.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);

        let policy = BoundaryPolicy {
            size_threshold_bytes: self.config.ingest.boundary_bytes,
            duration_threshold: self.config.ingest.boundary_span,
            count_threshold: self.config.ingest.boundary_chunks,
        };
        let detector = BoundaryDetector::new(policy, self.config.ingest.fallback_window);

        let session = Arc::new(CallSession::new(
            session_id,
            language,
            workflow_ref,
            &voice,
            context.flattened_instructions(),
            Vec::new(),
            detector,
            self.config.metrics.window,
            outbound,
            command_tx,
            signal_tx,
        ));

        self.sessions.register(Arc::clone(&session)).await?;

        let watchdog = tokio::spawn(run_watchdog(
            Arc::clone(&session),
            self.config.supervisor.clone(),
            signal_rx,
        ));
        let driver = tokio::spawn(drive_session(
            Arc::clone(&session),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.sessions),
            Arc::clone(&self.events),
            self.config.metrics.p95_target,
            command_rx,
        ));
        session.set_handles(watchdog, driver);
        session.set_state(SessionState::Active);

        if let Some(greeting) = context.greeting {
            session
                .send_command(SessionCommand::Speak {
                    text: greeting,
                    then_close: false,
                })
                .await?;
        }

        self.events.emit(&OrchestratorEvent::SessionStarted {
            session_id: session_id.to_string(),
            language: language.to_string(),
        });

        Ok(session)
    }

    /// Feed one inbound media frame to a session.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or closed sessions, or when the
    /// session's tasks have gone away.
    pub async fn process_inbound_audio(&self, session_id: &str, audio: Vec<u8>) -> Result<()> {
        let session = self
            .sessions
            .lookup(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if !session.is_open() {
            return Err(Error::SessionClosed(session_id.to_string()));
        }

        if audio.is_empty() {
            tracing::trace!(session_id, "ignoring empty media frame");
            return Ok(());
        }

        let chunk = quality::optimize(AudioChunk::new(audio, session.next_sequence()));
        let filled = session.append_chunk(chunk);

        session.signal(ActivitySignal::Inbound).await;
        if filled {
            if let Some(deadline) = session.fallback_deadline() {
                session
                    .signal(ActivitySignal::BufferFilled { deadline })
                    .await;
            }
        }

        // Boundary evaluation is skipped while a pipeline run is in
        // flight; the driver re-polls on completion.
        if let Some(utterance) = session.take_ready_utterance() {
            session.signal(ActivitySignal::BufferCleared).await;
            session
                .send_command(SessionCommand::Utterance(utterance))
                .await?;
        }

        Ok(())
    }

    /// Feed one DTMF keypress to a session.
    ///
    /// Keypresses bypass transcription as a synthetic one-word utterance.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or closed sessions, or a malformed
    /// digit.
    pub async fn process_dtmf(&self, session_id: &str, digit: char) -> Result<()> {
        let session = self
            .sessions
            .lookup(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if !session.is_open() {
            return Err(Error::SessionClosed(session_id.to_string()));
        }

        let word = dtmf_word(digit)
            .ok_or_else(|| Error::Malformed(format!("invalid dtmf digit '{digit}'")))?;

        session.signal(ActivitySignal::Inbound).await;
        session
            .send_command(SessionCommand::SyntheticUtterance {
                text: word.to_string(),
            })
            .await
    }

    /// Stop a session and return its final metrics.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is unknown.
    pub async fn stop_session(
        &self,
        session_id: &str,
        reason: EndReason,
    ) -> Result<MetricsSnapshot> {
        let session = self
            .sessions
            .lookup(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        Ok(teardown(&self.sessions, &self.events, &session, reason, true).await)
    }
}

/// Map a DTMF digit to its spoken word
fn dtmf_word(digit: char) -> Option<&'static str> {
    match digit {
        '0' => Some("zero"),
        '1' => Some("one"),
        '2' => Some("two"),
        '3' => Some("three"),
        '4' => Some("four"),
        '5' => Some("five"),
        '6' => Some("six"),
        '7' => Some("seven"),
        '8' => Some("eight"),
        '9' => Some("nine"),
        '*' => Some("star"),
        '#' => Some("pound"),
        _ => None,
    }
}

/// Remove a session, cancel its tasks, and emit the final event.
///
/// `abort_driver` is false when the driver itself is tearing down.
async fn teardown(
    sessions: &SessionRegistry,
    events: &Arc<dyn EventSink>,
    session: &Arc<CallSession>,
    reason: EndReason,
    abort_driver: bool,
) -> MetricsSnapshot {
    let _ = sessions.remove(&session.id).await;
    session.set_state(SessionState::Closed);

    let handles = session.take_handles();
    if let Some(watchdog) = handles.watchdog {
        watchdog.abort();
    }
    if abort_driver {
        if let Some(driver) = handles.driver {
            driver.abort();
        }
    }

    let snapshot = session.metrics_snapshot();
    events.emit(&OrchestratorEvent::SessionEnded {
        session_id: session.id.clone(),
        reason,
        metrics: snapshot.clone(),
    });
    snapshot
}

/// What a driver run consumes
enum DriverInput {
    Audio(Utterance),
    Text(String),
}

/// Per-session driver loop. Consuming commands one at a time is the
/// serialization point for pipeline executions.
async fn drive_session(
    session: Arc<CallSession>,
    pipeline: Arc<ResponsePipeline>,
    sessions: Arc<SessionRegistry>,
    events: Arc<dyn EventSink>,
    p95_target: Duration,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            SessionCommand::Utterance(utterance) => {
                run_one(&session, &pipeline, &events, p95_target, DriverInput::Audio(utterance))
                    .await;
                drain_ready(&session, &pipeline, &events, p95_target).await;
            }
            SessionCommand::SyntheticUtterance { text } => {
                run_one(&session, &pipeline, &events, p95_target, DriverInput::Text(text)).await;
                drain_ready(&session, &pipeline, &events, p95_target).await;
            }
            SessionCommand::Speak { text, then_close } => {
                if let Ok(outcome) = pipeline.speak(&session, &text).await {
                    send_reply(&session, outcome).await;
                }
                if then_close {
                    teardown(&sessions, &events, &session, EndReason::SilenceTimeout, false)
                        .await;
                    break;
                }
            }
        }
    }

    tracing::debug!(session_id = %session.id, "driver exiting");
}

/// Run chunks that reached a boundary while the previous execution was
/// in flight
async fn drain_ready(
    session: &Arc<CallSession>,
    pipeline: &Arc<ResponsePipeline>,
    events: &Arc<dyn EventSink>,
    p95_target: Duration,
) {
    while let Some(next) = session.take_ready_utterance() {
        session.signal(ActivitySignal::BufferCleared).await;
        run_one(session, pipeline, events, p95_target, DriverInput::Audio(next)).await;
    }
}

/// Execute one pipeline run and deliver its result
async fn run_one(
    session: &Arc<CallSession>,
    pipeline: &Arc<ResponsePipeline>,
    events: &Arc<dyn EventSink>,
    p95_target: Duration,
    input: DriverInput,
) {
    if !session.begin_pipeline() {
        // The driver is the only caller; overlap here is a logic bug.
        tracing::error!(session_id = %session.id, "pipeline already in flight");
        return;
    }

    let result = match input {
        DriverInput::Audio(utterance) => pipeline.run_audio(session, &utterance).await,
        DriverInput::Text(text) => pipeline.run_text(session, &text).await,
    };

    session.end_pipeline();
    session.signal(ActivitySignal::PipelineDone).await;

    match result {
        Ok(outcome) => {
            session.record_pipeline(outcome.latency, outcome.cache_hit);
            let latency_ms = u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX);
            let cache_hit = outcome.cache_hit;
            send_reply(session, outcome).await;

            events.emit(&OrchestratorEvent::AudioProcessed {
                session_id: session.id.clone(),
                latency_ms,
                cache_hit,
            });

            let snapshot = session.metrics_snapshot();
            let target_ms = u64::try_from(p95_target.as_millis()).unwrap_or(u64::MAX);
            if snapshot.p95_ms > target_ms {
                events.emit(&OrchestratorEvent::PerformanceAlert {
                    session_id: session.id.clone(),
                    p95_ms: snapshot.p95_ms,
                    target_ms,
                });
            }
        }
        Err(Error::Malformed(reason)) => {
            tracing::debug!(session_id = %session.id, reason, "unusable utterance");
            session.record_error();
            if let Ok(outcome) = pipeline.speak(session, CLARIFICATION_PROMPT).await {
                send_reply(session, outcome).await;
            }
        }
        Err(e) => {
            tracing::error!(session_id = %session.id, error = %e, "pipeline failed");
            session.record_error();
            if let Ok(outcome) = pipeline.speak(session, APOLOGY_PROMPT).await {
                send_reply(session, outcome).await;
            }
        }
    }
}

/// Send a pipeline outcome back on the duplex channel
async fn send_reply(session: &Arc<CallSession>, outcome: PipelineOutcome) {
    let message = OutboundMessage {
        session_id: session.id.clone(),
        text: outcome.text,
        voice_tag: session.voice_tag.clone(),
        audio: outcome.audio,
        timestamp: Utc::now(),
    };
    if let Err(e) = session.send_outbound(message).await {
        tracing::warn!(session_id = %session.id, error = %e, "failed to deliver reply");
    }
}
