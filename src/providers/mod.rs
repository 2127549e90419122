//! Backend provider traits and registry
//!
//! Speech recognition, generation, synthesis, and embedding are external
//! backends consumed behind small async traits. Production implementations
//! live in the sibling modules; tests substitute mocks. Provider selection
//! and rotation is the job of [`failover::FailoverManager`].

pub mod deepgram;
pub mod elevenlabs;
pub mod failover;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::session::ConversationTurn;
use crate::Result;

/// Converts utterance audio to a transcript
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error on API failure.
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String>;
}

/// Inputs for one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Flattened system instructions, already language-annotated
    pub instructions: String,
    /// Bounded recent-history window, oldest first
    pub history: Vec<ConversationTurn>,
    /// The caller's transcribed utterance
    pub user_text: String,
    /// Session language tag
    pub language: String,
}

/// Produces a reply for a transcribed utterance
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a reply.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error on API failure.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Converts reply text to speakable audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize text to audio bytes.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error on API failure.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

/// Produces semantic embeddings for cache similarity matching
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error on API failure.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Registry of configured backends, keyed by provider id.
///
/// Ids here are what the failover chains refer to.
#[derive(Default)]
pub struct ProviderRegistry {
    transcribers: HashMap<String, Arc<dyn Transcriber>>,
    language_models: HashMap<String, Arc<dyn LanguageModel>>,
    synthesizers: HashMap<String, Arc<dyn SpeechSynthesizer>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transcription backend
    pub fn register_transcriber(&mut self, id: &str, backend: Arc<dyn Transcriber>) {
        self.transcribers.insert(id.to_string(), backend);
    }

    /// Register a language-model backend
    pub fn register_language_model(&mut self, id: &str, backend: Arc<dyn LanguageModel>) {
        self.language_models.insert(id.to_string(), backend);
    }

    /// Register a synthesis backend
    pub fn register_synthesizer(&mut self, id: &str, backend: Arc<dyn SpeechSynthesizer>) {
        self.synthesizers.insert(id.to_string(), backend);
    }

    /// Set the embedding backend used for semantic cache matching
    pub fn set_embedder(&mut self, backend: Arc<dyn Embedder>) {
        self.embedder = Some(backend);
    }

    /// Look up a transcription backend by id
    #[must_use]
    pub fn transcriber(&self, id: &str) -> Option<Arc<dyn Transcriber>> {
        self.transcribers.get(id).cloned()
    }

    /// Look up a language-model backend by id
    #[must_use]
    pub fn language_model(&self, id: &str) -> Option<Arc<dyn LanguageModel>> {
        self.language_models.get(id).cloned()
    }

    /// Look up a synthesis backend by id
    #[must_use]
    pub fn synthesizer(&self, id: &str) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.synthesizers.get(id).cloned()
    }

    /// The embedding backend, if one is configured
    #[must_use]
    pub fn embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.clone()
    }

    /// Whether at least one language-model backend exists.
    ///
    /// Generation is the one stage a session cannot run without.
    #[must_use]
    pub fn has_language_model(&self) -> bool {
        !self.language_models.is_empty()
    }

    /// Whether any transcription backend exists
    #[must_use]
    pub fn has_transcriber(&self) -> bool {
        !self.transcribers.is_empty()
    }

    /// Whether any synthesis backend exists
    #[must_use]
    pub fn has_synthesizer(&self) -> bool {
        !self.synthesizers.is_empty()
    }
}
