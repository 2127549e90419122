//! Audio ingest and speech-boundary detection
//!
//! Accumulates inbound audio fragments per session and decides when the
//! caller has finished speaking. The boundary rule is deliberately a
//! heuristic over accumulated bytes, elapsed span, and chunk count; the
//! thresholds live in [`BoundaryPolicy`] so a real voice-activity detector
//! can replace them without touching callers.

pub mod quality;

use std::time::Duration;

use tokio::time::Instant;

/// One inbound audio fragment with its local receipt metadata.
///
/// Timestamps are taken from the local monotonic clock at receipt time.
/// Timestamps embedded in the payload are never trusted; carriers skew.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw payload bytes, opaque to the relay
    pub bytes: Vec<u8>,
    /// Local monotonic receipt time
    pub received_at: Instant,
    /// Per-session sequence number
    pub sequence: u64,
    /// Heuristic confidence score from [`quality`]
    pub confidence: f32,
}

impl AudioChunk {
    /// Create a chunk stamped with the current monotonic time
    #[must_use]
    pub fn new(bytes: Vec<u8>, sequence: u64) -> Self {
        let confidence = quality::confidence(&bytes);
        Self {
            bytes,
            received_at: Instant::now(),
            sequence,
            confidence,
        }
    }
}

/// Sensitivity knobs for the boundary heuristic.
///
/// A boundary fires only when all three thresholds hold. Lower values
/// reduce latency but raise the false-positive rate on background noise.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryPolicy {
    /// Minimum accumulated payload bytes
    pub size_threshold_bytes: usize,
    /// Minimum span between earliest and latest receipt in the buffer
    pub duration_threshold: Duration,
    /// Minimum number of non-empty chunks
    pub count_threshold: usize,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        Self {
            size_threshold_bytes: 1600,
            duration_threshold: Duration::from_millis(700),
            count_threshold: 2,
        }
    }
}

/// Detector state for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Buffer empty, waiting for the caller to speak
    WaitingForSpeech,
    /// Fragments buffered, thresholds not yet satisfied
    Accumulating,
    /// All three thresholds held; utterance was handed off
    BoundaryDetected,
    /// Fallback window elapsed without a boundary; buffer was flushed
    FallbackTriggered,
}

/// A contiguous span of audio fragments judged to be one spoken turn
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Chunks in receipt order
    pub chunks: Vec<AudioChunk>,
}

impl Utterance {
    /// Concatenated payload bytes in receipt order
    #[must_use]
    pub fn audio(&self) -> Vec<u8> {
        let total: usize = self.chunks.iter().map(|c| c.bytes.len()).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.bytes);
        }
        out
    }

    /// Total payload bytes
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.bytes.len()).sum()
    }

    /// Span between the earliest and latest receipt time
    #[must_use]
    pub fn span(&self) -> Duration {
        match (self.chunks.first(), self.chunks.last()) {
            (Some(first), Some(last)) => {
                last.received_at.duration_since(first.received_at)
            }
            _ => Duration::ZERO,
        }
    }

    /// Mean chunk confidence, 0.0 for an empty utterance
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn confidence(&self) -> f32 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.chunks.iter().map(|c| c.confidence).sum();
        sum / self.chunks.len() as f32
    }
}

/// Per-session boundary detector.
///
/// State machine: `WaitingForSpeech -> Accumulating -> BoundaryDetected ->
/// WaitingForSpeech`, with an alternate `FallbackTriggered` exit when the
/// fallback window elapses over a non-empty buffer.
#[derive(Debug)]
pub struct BoundaryDetector {
    policy: BoundaryPolicy,
    fallback_window: Duration,
    state: DetectorState,
    buffer: Vec<AudioChunk>,
    total_bytes: usize,
}

impl BoundaryDetector {
    /// Create a detector with the given thresholds and fallback window
    #[must_use]
    pub const fn new(policy: BoundaryPolicy, fallback_window: Duration) -> Self {
        Self {
            policy,
            fallback_window,
            state: DetectorState::WaitingForSpeech,
            buffer: Vec::new(),
            total_bytes: 0,
        }
    }

    /// Append a chunk to the buffer.
    ///
    /// Zero-length chunks are ignored. Returns `true` when the buffer
    /// transitioned from empty to non-empty, which is the signal to arm
    /// the fallback timer.
    pub fn append(&mut self, chunk: AudioChunk) -> bool {
        if chunk.bytes.is_empty() {
            tracing::trace!(sequence = chunk.sequence, "ignoring zero-length chunk");
            return false;
        }

        let was_empty = self.buffer.is_empty();
        self.total_bytes += chunk.bytes.len();
        self.buffer.push(chunk);
        self.state = DetectorState::Accumulating;

        tracing::trace!(
            buffered_bytes = self.total_bytes,
            buffered_chunks = self.buffer.len(),
            "chunk buffered"
        );

        was_empty
    }

    /// Whether all three boundary thresholds hold for the current buffer
    #[must_use]
    pub fn boundary_ready(&self) -> bool {
        self.total_bytes >= self.policy.size_threshold_bytes
            && self.span() >= self.policy.duration_threshold
            && self.buffer.len() >= self.policy.count_threshold
    }

    /// Take the buffered utterance if the boundary thresholds hold.
    ///
    /// The buffer is cleared atomically with the boundary decision.
    pub fn take_utterance(&mut self) -> Option<Utterance> {
        if !self.boundary_ready() {
            return None;
        }

        self.state = DetectorState::BoundaryDetected;
        let chunks = std::mem::take(&mut self.buffer);
        self.total_bytes = 0;
        self.state = DetectorState::WaitingForSpeech;

        tracing::debug!(chunks = chunks.len(), "boundary detected");
        Some(Utterance { chunks })
    }

    /// Deadline at which the fallback fires for the current buffer,
    /// `None` while the buffer is empty
    #[must_use]
    pub fn fallback_deadline(&self) -> Option<Instant> {
        self.buffer
            .first()
            .map(|first| first.received_at + self.fallback_window)
    }

    /// Take whatever is buffered as a partial utterance after a fallback
    /// firing, bypassing the boundary thresholds. Returns `None` when the
    /// buffer is empty.
    pub fn take_fallback(&mut self) -> Option<Utterance> {
        if self.buffer.is_empty() {
            return None;
        }

        self.state = DetectorState::FallbackTriggered;
        let chunks = std::mem::take(&mut self.buffer);
        self.total_bytes = 0;
        self.state = DetectorState::WaitingForSpeech;

        tracing::debug!(chunks = chunks.len(), "fallback fired, flushing partial utterance");
        Some(Utterance { chunks })
    }

    /// Current detector state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Number of buffered chunks
    #[must_use]
    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }

    /// Total buffered payload bytes
    #[must_use]
    pub const fn buffered_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Span between earliest and latest buffered receipt
    fn span(&self) -> Duration {
        match (self.buffer.first(), self.buffer.last()) {
            (Some(first), Some(last)) => {
                last.received_at.duration_since(first.received_at)
            }
            _ => Duration::ZERO,
        }
    }
}
