//! Response pipeline
//!
//! One utterance flows through up to six stages: transcription, cache
//! lookup, language adaptation, generation, post-processing, and
//! synthesis. A cache hit short-circuits everything after the lookup.
//! Each remote stage runs under a latency budget and walks the session
//! language's failover chain until a provider answers.

pub mod cache;
pub mod language;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::ingest::Utterance;
use crate::providers::failover::{FailoverManager, ProviderKind};
use crate::providers::{GenerationRequest, ProviderRegistry};
use crate::session::{CallSession, TurnRole};
use crate::{Error, Result};
use cache::ResponseCache;

/// Result of one pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Final reply text
    pub text: String,
    /// Synthesized reply audio, when a synthesizer is configured
    pub audio: Option<Vec<u8>>,
    /// Whether the reply came from the response cache
    pub cache_hit: bool,
    /// End-to-end execution latency
    pub latency: Duration,
}

/// Executes the response pipeline for call sessions
pub struct ResponsePipeline {
    registry: Arc<ProviderRegistry>,
    failover: Arc<FailoverManager>,
    cache: Arc<ResponseCache>,
    config: PipelineConfig,
}

impl ResponsePipeline {
    /// Create a pipeline
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        failover: Arc<FailoverManager>,
        cache: Arc<ResponseCache>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            failover,
            cache,
            config,
        }
    }

    /// The shared response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Run the full pipeline on a caller utterance.
    ///
    /// # Errors
    ///
    /// Returns an error when transcription yields nothing usable or when
    /// every generation provider fails within budget.
    pub async fn run_audio(
        &self,
        session: &CallSession,
        utterance: &Utterance,
    ) -> Result<PipelineOutcome> {
        let started = Instant::now();
        tracing::debug!(
            session_id = %session.id,
            audio_bytes = utterance.total_bytes(),
            confidence = utterance.confidence(),
            "starting transcription"
        );
        let transcript = self.transcribe(session, utterance).await?;

        if transcript.trim().is_empty() {
            return Err(Error::Malformed("empty transcript".to_string()));
        }

        self.run_text_inner(session, &transcript, started).await
    }

    /// Run the pipeline on caller text that needs no transcription, such
    /// as DTMF keypresses mapped to words.
    ///
    /// # Errors
    ///
    /// Returns an error when every generation provider fails within budget.
    pub async fn run_text(&self, session: &CallSession, text: &str) -> Result<PipelineOutcome> {
        self.run_text_inner(session, text, Instant::now()).await
    }

    /// Synthesize agent-authored text without generation or caching.
    ///
    /// Used for re-engagement prompts, clarifications, and farewells.
    ///
    /// # Errors
    ///
    /// Never fails on synthesis trouble; degrades to text-only.
    pub async fn speak(&self, session: &CallSession, text: &str) -> Result<PipelineOutcome> {
        let started = Instant::now();
        let audio = self.synthesize(session, text).await;
        session.record_turn(TurnRole::Agent, text);

        Ok(PipelineOutcome {
            text: text.to_string(),
            audio,
            cache_hit: false,
            latency: started.elapsed(),
        })
    }

    async fn run_text_inner(
        &self,
        session: &CallSession,
        user_text: &str,
        started: Instant,
    ) -> Result<PipelineOutcome> {
        // An exact fingerprint hit answers before the embedder is
        // consulted; only a miss pays the embedding round-trip for the
        // semantic pass. Embedding failures cost that pass, never the reply.
        let mut cached = self.cache.lookup(user_text, None);
        let mut embedding = None;
        if cached.is_none() {
            embedding = match self.registry.embedder() {
                Some(embedder) => match embedder.embed(user_text).await {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "embedding failed");
                        None
                    }
                },
                None => None,
            };
            if embedding.is_some() {
                cached = self.cache.lookup(user_text, embedding.as_deref());
            }
        }

        if let Some((entry, hit)) = cached {
            tracing::debug!(session_id = %session.id, hit = ?hit, "cache hit");
            session.record_turn(TurnRole::Caller, user_text);
            session.record_turn(TurnRole::Agent, &entry.text);

            return Ok(PipelineOutcome {
                text: entry.text,
                audio: entry.audio,
                cache_hit: true,
                latency: started.elapsed(),
            });
        }

        let instructions = language::annotate_instructions(&session.instructions, &session.language);
        let history = session.recent_history(self.config.history_window);
        let request = GenerationRequest {
            instructions,
            history,
            user_text: user_text.to_string(),
            language: session.language.clone(),
        };

        let raw = self.generate(session, &request).await?;
        let reply = language::post_process(&raw, &session.language);
        let audio = self.synthesize(session, &reply).await;

        self.cache
            .store(user_text, reply.clone(), audio.clone(), embedding);
        session.record_turn(TurnRole::Caller, user_text);
        session.record_turn(TurnRole::Agent, &reply);

        Ok(PipelineOutcome {
            text: reply,
            audio,
            cache_hit: false,
            latency: started.elapsed(),
        })
    }

    /// Transcribe an utterance, walking the transcription chain
    async fn transcribe(&self, session: &CallSession, utterance: &Utterance) -> Result<String> {
        let audio = utterance.audio();
        let candidates = self
            .failover
            .candidates(ProviderKind::Transcription, &session.language);

        for entry in candidates {
            let Some(backend) = self.registry.transcriber(&entry.id) else {
                tracing::warn!(provider = %entry.id, "transcriber in chain but not registered");
                continue;
            };

            let started = Instant::now();
            let attempt = tokio::time::timeout(
                self.config.transcription_budget,
                backend.transcribe(&audio, &session.language),
            )
            .await
            .map_err(|_| budget_overrun(ProviderKind::Transcription, self.config.transcription_budget));

            match attempt {
                Ok(Ok(transcript)) => {
                    self.failover
                        .report_success(&entry.id, entry.tier, started.elapsed());
                    return Ok(transcript);
                }
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!(provider = %entry.id, error = %e, "transcription failed");
                    self.failover.report_failure(&entry.id);
                }
            }
        }

        Err(Error::Provider {
            provider: ProviderKind::Transcription.as_str().to_string(),
            message: "no transcription provider answered".to_string(),
        })
    }

    /// Generate a reply, walking the generation chain
    async fn generate(&self, session: &CallSession, request: &GenerationRequest) -> Result<String> {
        let candidates = self
            .failover
            .candidates(ProviderKind::Generation, &session.language);

        for entry in candidates {
            let Some(backend) = self.registry.language_model(&entry.id) else {
                tracing::warn!(provider = %entry.id, "language model in chain but not registered");
                continue;
            };

            let started = Instant::now();
            let attempt =
                tokio::time::timeout(self.config.generation_budget, backend.generate(request))
                    .await
                    .map_err(|_| {
                        budget_overrun(ProviderKind::Generation, self.config.generation_budget)
                    });

            match attempt {
                Ok(Ok(reply)) => {
                    self.failover
                        .report_success(&entry.id, entry.tier, started.elapsed());
                    return Ok(reply);
                }
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!(provider = %entry.id, error = %e, "generation failed");
                    self.failover.report_failure(&entry.id);
                }
            }
        }

        Err(Error::Provider {
            provider: ProviderKind::Generation.as_str().to_string(),
            message: "no generation provider answered".to_string(),
        })
    }

    /// Synthesize reply audio, walking the synthesis chain.
    ///
    /// Synthesis is best-effort: exhausting the chain degrades the
    /// response to text-only rather than failing the pipeline.
    async fn synthesize(&self, session: &CallSession, text: &str) -> Option<Vec<u8>> {
        let candidates = self
            .failover
            .candidates(ProviderKind::Synthesis, &session.language);
        if candidates.is_empty() {
            return None;
        }

        for entry in candidates {
            let Some(backend) = self.registry.synthesizer(&entry.id) else {
                continue;
            };

            let started = Instant::now();
            let attempt = tokio::time::timeout(
                self.config.synthesis_budget,
                backend.synthesize(text, &session.voice_tag),
            )
            .await
            .map_err(|_| budget_overrun(ProviderKind::Synthesis, self.config.synthesis_budget));

            match attempt {
                Ok(Ok(audio)) => {
                    self.failover
                        .report_success(&entry.id, entry.tier, started.elapsed());
                    return Some(audio);
                }
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!(provider = %entry.id, error = %e, "synthesis failed");
                    self.failover.report_failure(&entry.id);
                }
            }
        }

        tracing::warn!(session_id = %session.id, "synthesis chain exhausted, sending text only");
        None
    }
}

fn budget_overrun(stage: ProviderKind, budget: Duration) -> Error {
    Error::Timeout {
        stage: stage.as_str(),
        budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
    }
}
