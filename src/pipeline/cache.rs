//! Bounded response cache
//!
//! Caches full pipeline outputs keyed by a normalized fingerprint of the
//! caller's text. Lookups try an exact fingerprint match first, then a
//! semantic pass over stored embeddings. Either kind of hit promotes the
//! entry to most-recently-used; insertion past capacity evicts the least
//! recently used entry.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Cache key: SHA-256 over normalized utterance text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an utterance.
    ///
    /// Normalization lowercases and collapses whitespace runs so trivial
    /// formatting differences still hit exactly.
    #[must_use]
    pub fn of(text: &str) -> Self {
        let normalized = text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let digest = Sha256::digest(normalized.as_bytes());
        Self(hex::encode(digest))
    }

    /// Hex digest string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One cached pipeline output
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Reply text
    pub text: String,
    /// Synthesized reply audio, when synthesis ran
    pub audio: Option<Vec<u8>>,
    /// Embedding of the prompt that produced this entry
    pub embedding: Option<Vec<f32>>,
    /// Times this entry has been served
    pub hits: u64,
}

/// How a lookup matched
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheHit {
    /// Fingerprints matched exactly
    Exact,
    /// A stored embedding cleared the similarity threshold
    Semantic {
        /// Cosine similarity of the winning entry
        similarity: f32,
    },
}

/// LRU-bounded response cache with exact and semantic lookup
pub struct ResponseCache {
    entries: Mutex<lru::LruCache<Fingerprint, CacheEntry>>,
    similarity_threshold: f32,
}

impl ResponseCache {
    /// Create a cache
    #[must_use]
    pub fn new(capacity: usize, similarity_threshold: f32) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(lru::LruCache::new(capacity)),
            similarity_threshold,
        }
    }

    /// Look up a reply for an utterance.
    ///
    /// The exact pass wins over the semantic pass even when a semantically
    /// closer entry exists. Passing no embedding degrades the lookup to
    /// exact-only.
    pub fn lookup(&self, text: &str, embedding: Option<&[f32]>) -> Option<(CacheEntry, CacheHit)> {
        let fingerprint = Fingerprint::of(text);
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(entry) = entries.get_mut(&fingerprint) {
            entry.hits += 1;
            return Some((entry.clone(), CacheHit::Exact));
        }

        let query = embedding?;
        let mut best: Option<(Fingerprint, f32)> = None;
        for (key, entry) in entries.iter() {
            let Some(stored) = entry.embedding.as_deref() else {
                continue;
            };
            let similarity = cosine_similarity(query, stored);
            if similarity >= self.similarity_threshold
                && best.as_ref().is_none_or(|(_, s)| similarity > *s)
            {
                best = Some((key.clone(), similarity));
            }
        }

        let (key, similarity) = best?;
        // get_mut also promotes the winner to most-recently-used.
        let entry = entries.get_mut(&key)?;
        entry.hits += 1;
        Some((entry.clone(), CacheHit::Semantic { similarity }))
    }

    /// Store a pipeline output under the utterance that produced it
    pub fn store(&self, text: &str, reply: String, audio: Option<Vec<u8>>, embedding: Option<Vec<f32>>) {
        let entry = CacheEntry {
            text: reply,
            audio,
            embedding,
            hits: 0,
        };
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .put(Fingerprint::of(text), entry);
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}
