//! Shared test utilities

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use callflow_relay::Config;
use callflow_relay::config::{
    ApiKeys, CacheConfig, IngestConfig, MetricsConfig, PipelineConfig, SupervisorConfig,
};
use callflow_relay::providers::failover::{
    FailoverPolicy, ProviderChain, ProviderChains, ProviderEntry,
};
use callflow_relay::providers::{
    Embedder, GenerationRequest, LanguageModel, SpeechSynthesizer, Transcriber,
};
use callflow_relay::{Error, Result};

/// Build a config with the default tuning and a two-deep failover chain
/// per stage
#[must_use]
pub fn test_config() -> Config {
    Config {
        port: 0,
        ingest: IngestConfig {
            boundary_bytes: 1600,
            boundary_span: Duration::from_millis(700),
            boundary_chunks: 2,
            fallback_window: Duration::from_secs(3),
        },
        supervisor: SupervisorConfig {
            silence_budget: Duration::from_secs(15),
            max_silent_periods: 2,
            reengagement_prompt: "Are you still there?".to_string(),
            farewell: "Goodbye for now.".to_string(),
        },
        pipeline: PipelineConfig {
            transcription_budget: Duration::from_secs(5),
            generation_budget: Duration::from_secs(8),
            synthesis_budget: Duration::from_secs(5),
            history_window: 8,
        },
        cache: CacheConfig {
            capacity: 64,
            similarity_threshold: 0.85,
        },
        metrics: MetricsConfig {
            window: 100,
            p95_target: Duration::from_millis(2500),
        },
        chains: ProviderChains {
            default: ProviderChain {
                transcription: vec![ProviderEntry::new("stt-a"), ProviderEntry::new("stt-b")],
                generation: vec![ProviderEntry::new("llm-a"), ProviderEntry::new("llm-b")],
                synthesis: vec![ProviderEntry::new("tts-a")],
            },
            languages: HashMap::new(),
        },
        failover: FailoverPolicy::default(),
        workflow_url: None,
        api_keys: ApiKeys::default(),
        data_dir: std::env::temp_dir(),
    }
}

/// Transcriber returning a fixed transcript, with optional up-front
/// failures and latency
pub struct MockTranscriber {
    transcript: String,
    fail_first: AtomicU32,
    delay: Duration,
    pub calls: AtomicU32,
}

impl MockTranscriber {
    #[must_use]
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            fail_first: AtomicU32::new(0),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls, then succeed
    #[must_use]
    pub fn failing_first(transcript: &str, n: u32) -> Self {
        let mock = Self::new(transcript);
        mock.fail_first.store(n, Ordering::SeqCst);
        mock
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if take_failure(&self.fail_first) {
            return Err(Error::Provider {
                provider: "mock-stt".to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(self.transcript.clone())
    }
}

/// Language model echoing the caller text, with optional failures and
/// latency
pub struct MockLanguageModel {
    fail_first: AtomicU32,
    always_fail: bool,
    delay: Duration,
    pub calls: AtomicU32,
}

impl MockLanguageModel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_first: AtomicU32::new(0),
            always_fail: false,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls, then succeed
    #[must_use]
    pub fn failing_first(n: u32) -> Self {
        let model = Self::new();
        model.fail_first.store(n, Ordering::SeqCst);
        model
    }

    /// Fail every call
    #[must_use]
    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new()
        }
    }

    /// Delay every call by `delay` before answering
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if self.always_fail || take_failure(&self.fail_first) {
            return Err(Error::Provider {
                provider: "mock-llm".to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(format!("You said: {}", request.user_text))
    }
}

/// Synthesizer turning text into its UTF-8 bytes
pub struct MockSynthesizer {
    pub calls: AtomicU32,
}

impl MockSynthesizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.as_bytes().to_vec())
    }
}

/// Embedder serving vectors from a fixed table
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    pub calls: AtomicU32,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// An 800-byte audio frame with non-silent content
#[must_use]
pub fn loud_frame() -> Vec<u8> {
    vec![0xAA; 800]
}

/// Arc helper so registries read cleanly at call sites
#[must_use]
pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
