//! Lifecycle event observation
//!
//! Collaborators observe session lifecycle through an explicit
//! [`EventSink`] handed to the orchestrator at construction. There is no
//! global event bus; everything flows through the sink reference.

use serde::Serialize;

use crate::orchestrator::metrics::MetricsSnapshot;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Explicit stop frame from the channel
    Stopped,
    /// The duplex channel disconnected
    ChannelClosed,
    /// The silence supervisor tore the session down
    SilenceTimeout,
}

impl EndReason {
    /// Reason name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::ChannelClosed => "channel_closed",
            Self::SilenceTimeout => "silence_timeout",
        }
    }
}

/// Session lifecycle events emitted by the orchestrator
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// A session registered and its tasks spawned
    SessionStarted {
        /// Session id
        session_id: String,
        /// Session language tag
        language: String,
    },
    /// One utterance completed the pipeline
    AudioProcessed {
        /// Session id
        session_id: String,
        /// End-to-end pipeline latency in milliseconds
        latency_ms: u64,
        /// Whether the reply came from the response cache
        cache_hit: bool,
    },
    /// Rolling p95 latency exceeded the configured target
    PerformanceAlert {
        /// Session id
        session_id: String,
        /// Observed p95 latency in milliseconds
        p95_ms: u64,
        /// Configured target in milliseconds
        target_ms: u64,
    },
    /// A session tore down
    SessionEnded {
        /// Session id
        session_id: String,
        /// Why it ended
        reason: EndReason,
        /// Final session metrics
        metrics: MetricsSnapshot,
    },
}

/// Observer of orchestrator lifecycle events.
///
/// `emit` runs on hot session paths, so implementations must not block.
pub trait EventSink: Send + Sync {
    /// Observe one event
    fn emit(&self, event: &OrchestratorEvent);
}

/// Sink that forwards events to structured logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::SessionStarted {
                session_id,
                language,
            } => {
                tracing::info!(session_id, language, "session started");
            }
            OrchestratorEvent::AudioProcessed {
                session_id,
                latency_ms,
                cache_hit,
            } => {
                tracing::debug!(session_id, latency_ms, cache_hit, "audio processed");
            }
            OrchestratorEvent::PerformanceAlert {
                session_id,
                p95_ms,
                target_ms,
            } => {
                tracing::warn!(session_id, p95_ms, target_ms, "p95 latency above target");
            }
            OrchestratorEvent::SessionEnded {
                session_id,
                reason,
                metrics,
            } => {
                tracing::info!(
                    session_id,
                    reason = reason.as_str(),
                    utterances = metrics.samples,
                    mean_ms = metrics.mean_ms,
                    p95_ms = metrics.p95_ms,
                    "session ended"
                );
            }
        }
    }
}

/// Sink that forwards events onto an unbounded channel, for tests and
/// external consumers
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<OrchestratorEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving half
    #[must_use]
    pub fn new() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<OrchestratorEvent>,
    ) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &OrchestratorEvent) {
        // Receiver gone means nobody is listening; drop silently.
        let _ = self.sender.send(event.clone());
    }
}
