//! `OpenAI` backends: Whisper transcription, chat generation, speech
//! synthesis, and text embeddings

use async_trait::async_trait;

use crate::providers::{
    Embedder, GenerationRequest, LanguageModel, SpeechSynthesizer, Transcriber,
};
use crate::{Error, Result};

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes utterances with `OpenAI` Whisper
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    /// Create a Whisper transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), language, "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Provider {
                        provider: "whisper".to_string(),
                        message: e.to_string(),
                    })?,
            )
            .text("model", self.model.clone())
            .text("language", primary_subtag(language).to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Provider {
                provider: "whisper".to_string(),
                message: format!("Whisper API error {status}: {body}"),
            });
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Whisper response");
            e
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Generates replies with the `OpenAI` chat completions API
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Create a chat backend with the default model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, "gpt-4o-mini".to_string())
    }

    /// Create a chat backend with a custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn with_model(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for generation".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            // Spoken replies are short; a low cap keeps latency down.
            max_tokens: 256,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        #[derive(serde::Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            max_tokens: u32,
        }

        #[derive(serde::Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(serde::Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(serde::Deserialize)]
        struct ResponseMessage {
            content: String,
        }

        let mut messages = vec![Message {
            role: "system",
            content: &request.instructions,
        }];
        for turn in &request.history {
            messages.push(Message {
                role: match turn.role {
                    crate::session::TurnRole::Caller => "user",
                    crate::session::TurnRole::Agent => "assistant",
                },
                content: &turn.text,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.user_text,
        });

        tracing::debug!(
            model = %self.model,
            history_turns = request.history.len(),
            "starting chat generation"
        );

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Provider {
                provider: "openai-chat".to_string(),
                message: format!("chat API error {status}: {body}"),
            });
        }

        let result: ChatResponse = response.json().await?;
        let text = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Provider {
                provider: "openai-chat".to_string(),
                message: "empty choices in chat response".to_string(),
            })?;

        tracing::debug!(reply_chars = text.len(), "generation complete");
        Ok(text)
    }
}

/// Synthesizes speech with the `OpenAI` TTS API
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    speed: f32,
}

impl OpenAiSpeech {
    /// Create a synthesis backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, speed: f32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: "tts-1".to_string(),
            speed,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "openai-tts".to_string(),
                message: format!("OpenAI TTS error {status}: {body}"),
            });
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// Embeds text with `OpenAI`'s embedding API for semantic cache matching
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    /// Create an embedder
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for embeddings".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: "text-embedding-3-small".to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(serde::Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a str,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "openai-embed".to_string(),
                message: format!("embedding API error {status}: {body}"),
            });
        }

        let result: EmbeddingResponse = response.json().await?;
        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Provider {
                provider: "openai-embed".to_string(),
                message: "empty embedding response".to_string(),
            })
    }
}

/// Primary subtag of a BCP 47 language tag ("es-MX" yields "es")
fn primary_subtag(language: &str) -> &str {
    language.split('-').next().unwrap_or(language)
}
