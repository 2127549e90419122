//! Audio quality passthrough stage
//!
//! Noise reduction and echo cancellation are passthroughs today: the relay
//! treats payloads as opaque bytes and real DSP belongs in a dedicated
//! stage. The `optimize(chunk) -> chunk` shape is kept so a real
//! implementation can be substituted without changing callers.

use super::AudioChunk;

/// Apply the audio-quality chain to one chunk.
///
/// Currently a passthrough: noise reduction and echo cancellation are
/// documented no-ops. Only the confidence score carries signal.
#[must_use]
pub fn optimize(chunk: AudioChunk) -> AudioChunk {
    let chunk = reduce_noise(chunk);
    cancel_echo(chunk)
}

/// Noise reduction placeholder. Returns the chunk unchanged.
#[must_use]
const fn reduce_noise(chunk: AudioChunk) -> AudioChunk {
    chunk
}

/// Echo cancellation placeholder. Returns the chunk unchanged.
#[must_use]
const fn cancel_echo(chunk: AudioChunk) -> AudioChunk {
    chunk
}

/// Heuristic confidence score in `0.0..=1.0` for one payload.
///
/// Measures mean absolute deviation of the raw bytes: a flat payload
/// (silence or dropped carrier frames) scores near zero, a varied payload
/// scores higher. This is a stand-in until a real signal-quality measure
/// exists.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn confidence(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }

    let mean = bytes.iter().map(|&b| f32::from(b)).sum::<f32>() / bytes.len() as f32;
    let deviation = bytes
        .iter()
        .map(|&b| (f32::from(b) - mean).abs())
        .sum::<f32>()
        / bytes.len() as f32;

    // Max possible mean deviation for u8 data is 127.5
    (deviation / 127.5).clamp(0.0, 1.0)
}
