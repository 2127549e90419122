//! Call-session state
//!
//! One [`CallSession`] per active phone call. All per-session state is
//! owned by the session and guarded by short, never-held-across-await
//! locks; cross-session state lives in the registry, cache, and provider
//! health table only.

pub mod registry;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ingest::{BoundaryDetector, Utterance};
use crate::orchestrator::metrics::{MetricsSnapshot, RollingMetrics};
use crate::supervisor::ActivitySignal;
use crate::{Error, Result};

/// Lifecycle state of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, workflow context loading
    Starting,
    /// Relaying audio
    Active,
    /// Farewell in flight, no longer accepting input
    Closing,
    /// Torn down; watchdog and driver are gone
    Closed,
}

impl SessionState {
    /// State name for logs and API responses
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The human on the phone
    Caller,
    /// The voice agent
    Agent,
}

impl TurnRole {
    /// Role name for prompts and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Agent => "agent",
        }
    }
}

/// One ordered turn of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Speaker
    pub role: TurnRole,
    /// Turn text
    pub text: String,
    /// Wall-clock time the turn was recorded
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped now
    #[must_use]
    pub fn new(role: TurnRole, text: &str) -> Self {
        Self {
            role,
            text: text.to_string(),
            at: Utc::now(),
        }
    }
}

/// Work items consumed by a session's driver task, in order.
///
/// The driver is the serialization point that guarantees at most one
/// pipeline execution in flight per session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Caller utterance for the full pipeline
    Utterance(Utterance),
    /// Synthetic caller text (DTMF mapping) entering at the cache-lookup
    /// stage, no transcription
    SyntheticUtterance {
        /// Text standing in for the caller's input
        text: String,
    },
    /// Agent-authored text (re-engagement, fallback prompt, farewell) to
    /// synthesize and send without generation
    Speak {
        /// Text to speak
        text: String,
        /// Tear the session down after dispatch
        then_close: bool,
    },
}

/// Outbound structured message emitted back on the duplex channel.
///
/// `audio` is present when synthesis runs in-process; text-only
/// deployments leave it empty and a collaborator renders audio.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Session this response belongs to
    pub session_id: String,
    /// Response text
    pub text: String,
    /// Voice identifier for external rendering
    pub voice_tag: String,
    /// Synthesized audio bytes, when synthesis runs in-process
    pub audio: Option<Vec<u8>>,
    /// Wall-clock emission time
    pub timestamp: DateTime<Utc>,
}

/// Watchdog and driver task handles, aborted on teardown
#[derive(Debug, Default)]
pub struct SessionHandles {
    /// Silence watchdog task
    pub watchdog: Option<JoinHandle<()>>,
    /// Pipeline driver task
    pub driver: Option<JoinHandle<()>>,
}

/// The complete lifecycle state of one active call's audio relay
pub struct CallSession {
    /// Session id from the carrier
    pub id: String,
    /// BCP 47 language tag
    pub language: String,
    /// Workflow reference this call runs under
    pub workflow_ref: String,
    /// Voice identifier for synthesis and outbound tagging
    pub voice_tag: String,
    /// Flattened instructions from the workflow loader
    pub instructions: String,

    state: Mutex<SessionState>,
    detector: Mutex<BoundaryDetector>,
    history: Mutex<Vec<ConversationTurn>>,
    metrics: Mutex<RollingMetrics>,
    last_activity: Mutex<Instant>,
    sequence: AtomicU64,
    in_flight: AtomicBool,
    outbound: mpsc::Sender<OutboundMessage>,
    commands: mpsc::Sender<SessionCommand>,
    signals: mpsc::Sender<ActivitySignal>,
    handles: Mutex<SessionHandles>,
}

impl CallSession {
    /// Create a session in the `Starting` state
    #[must_use]
    pub fn new(
        id: &str,
        language: &str,
        workflow_ref: &str,
        voice_tag: &str,
        instructions: String,
        seed_history: Vec<ConversationTurn>,
        detector: BoundaryDetector,
        metrics_window: usize,
        outbound: mpsc::Sender<OutboundMessage>,
        commands: mpsc::Sender<SessionCommand>,
        signals: mpsc::Sender<ActivitySignal>,
    ) -> Self {
        Self {
            id: id.to_string(),
            language: language.to_string(),
            workflow_ref: workflow_ref.to_string(),
            voice_tag: voice_tag.to_string(),
            instructions,
            state: Mutex::new(SessionState::Starting),
            detector: Mutex::new(detector),
            history: Mutex::new(seed_history),
            metrics: Mutex::new(RollingMetrics::new(metrics_window)),
            last_activity: Mutex::new(Instant::now()),
            sequence: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            outbound,
            commands,
            signals,
            handles: Mutex::new(SessionHandles::default()),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Transition to a new lifecycle state
    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    /// Whether the session still accepts caller input
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state(), SessionState::Starting | SessionState::Active)
    }

    /// Next chunk sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Record activity for idle accounting
    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Instant of the last recorded activity
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append a turn to the conversation history
    pub fn record_turn(&self, role: TurnRole, text: &str) {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(ConversationTurn::new(role, text));
    }

    /// The last `window` turns, oldest first
    #[must_use]
    pub fn recent_history(&self, window: usize) -> Vec<ConversationTurn> {
        let history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let start = history.len().saturating_sub(window);
        history[start..].to_vec()
    }

    /// Total recorded turns
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Append an audio chunk to the ingest buffer.
    ///
    /// Returns `true` when the buffer transitioned empty to non-empty.
    pub fn append_chunk(&self, chunk: crate::ingest::AudioChunk) -> bool {
        self.detector
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .append(chunk)
    }

    /// Take a complete utterance if the boundary holds and no pipeline is
    /// in flight. The buffer clears atomically with the decision.
    #[must_use]
    pub fn take_ready_utterance(&self) -> Option<Utterance> {
        if self.pipeline_in_flight() {
            return None;
        }
        self.detector
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take_utterance()
    }

    /// Take buffered audio as a partial utterance after the fallback
    /// window fires
    #[must_use]
    pub fn take_fallback_utterance(&self) -> Option<Utterance> {
        self.detector
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take_fallback()
    }

    /// Fallback deadline for the currently buffered audio
    #[must_use]
    pub fn fallback_deadline(&self) -> Option<Instant> {
        self.detector
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .fallback_deadline()
    }

    /// Whether the ingest buffer holds any chunks
    #[must_use]
    pub fn buffer_is_empty(&self) -> bool {
        self.detector
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .buffered_chunks()
            == 0
    }

    /// Mark a pipeline execution as started.
    ///
    /// Returns `false` if one is already in flight.
    pub fn begin_pipeline(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the in-flight pipeline execution as resolved
    pub fn end_pipeline(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    /// Whether a pipeline execution is currently in flight
    #[must_use]
    pub fn pipeline_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Record an end-to-end pipeline latency sample with its cache
    /// outcome
    pub fn record_pipeline(&self, latency: std::time::Duration, cache_hit: bool) {
        let mut metrics = self
            .metrics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        metrics.record_latency(latency);
        metrics.record_cache_lookup(cache_hit);
    }

    /// Record a pipeline error
    pub fn record_error(&self) {
        self.metrics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .record_error();
    }

    /// Snapshot of the session's rolling metrics
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .snapshot()
    }

    /// Send a message back on the duplex channel.
    ///
    /// # Errors
    ///
    /// Returns a channel error if the outbound side has gone away.
    pub async fn send_outbound(&self, message: OutboundMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| Error::Channel(format!("outbound channel closed for {}", self.id)))
    }

    /// Queue a command for the driver task.
    ///
    /// # Errors
    ///
    /// Returns a channel error if the driver has stopped.
    pub async fn send_command(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Channel(format!("driver stopped for {}", self.id)))
    }

    /// Report activity to the watchdog.
    ///
    /// A gone watchdog means teardown already ran; the signal is dropped.
    pub async fn signal(&self, signal: ActivitySignal) {
        let _ = self.signals.send(signal).await;
    }

    /// Store the watchdog and driver handles after spawn
    pub fn set_handles(&self, watchdog: JoinHandle<()>, driver: JoinHandle<()>) {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        handles.watchdog = Some(watchdog);
        handles.driver = Some(driver);
    }

    /// Take both task handles for teardown.
    ///
    /// Tearing down must cancel in-flight pipeline work and clear the
    /// watchdog; leaked timers are a correctness bug.
    #[must_use]
    pub fn take_handles(&self) -> SessionHandles {
        std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("language", &self.language)
            .field("workflow_ref", &self.workflow_ref)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{AudioChunk, BoundaryPolicy};
    use std::time::Duration;

    fn session() -> (CallSession, mpsc::Receiver<OutboundMessage>) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (sig_tx, _sig_rx) = mpsc::channel(8);
        let detector = BoundaryDetector::new(BoundaryPolicy::default(), Duration::from_secs(3));
        let s = CallSession::new(
            "s1",
            "en",
            "wf-1",
            "alloy",
            "Be helpful.".to_string(),
            Vec::new(),
            detector,
            100,
            out_tx,
            cmd_tx,
            sig_tx,
        );
        (s, out_rx)
    }

    #[test]
    fn starts_in_starting_state() {
        let (s, _rx) = session();
        assert_eq!(s.state(), SessionState::Starting);
        assert!(s.is_open());

        s.set_state(SessionState::Closed);
        assert!(!s.is_open());
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let (s, _rx) = session();
        assert_eq!(s.next_sequence(), 0);
        assert_eq!(s.next_sequence(), 1);
        assert_eq!(s.next_sequence(), 2);
    }

    #[test]
    fn in_flight_flag_is_exclusive() {
        let (s, _rx) = session();
        assert!(s.begin_pipeline());
        assert!(!s.begin_pipeline());
        assert!(s.pipeline_in_flight());

        s.end_pipeline();
        assert!(s.begin_pipeline());
    }

    #[test]
    fn ready_utterance_is_withheld_while_in_flight() {
        let (s, _rx) = session();
        let now = Instant::now();
        for i in 0..4u64 {
            s.append_chunk(AudioChunk {
                bytes: vec![0xAA; 800],
                received_at: now + Duration::from_millis(i * 400),
                sequence: i,
                confidence: 1.0,
            });
        }

        assert!(s.begin_pipeline());
        assert!(s.take_ready_utterance().is_none());

        s.end_pipeline();
        assert!(s.take_ready_utterance().is_some());
        assert!(s.buffer_is_empty());
    }

    #[test]
    fn history_window_is_bounded() {
        let (s, _rx) = session();
        for i in 0..10 {
            s.record_turn(TurnRole::Caller, &format!("turn {i}"));
        }
        let recent = s.recent_history(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text, "turn 7");
        assert_eq!(recent[2].text, "turn 9");
        assert_eq!(s.history_len(), 10);
    }
}
