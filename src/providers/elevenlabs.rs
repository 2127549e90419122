//! `ElevenLabs` speech synthesis backend

use async_trait::async_trait;

use crate::providers::SpeechSynthesizer;
use crate::{Error, Result};

/// Synthesizes speech with `ElevenLabs`.
///
/// The session's voice tag is used directly as the `ElevenLabs` voice id.
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ElevenLabsSynthesizer {
    /// Create a synthesizer with the default model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, "eleven_turbo_v2".to_string())
    }

    /// Create a synthesizer with a custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn with_model(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
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
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}");
        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "elevenlabs".to_string(),
                message: format!("ElevenLabs TTS error {status}: {body}"),
            });
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key() {
        assert!(matches!(
            ElevenLabsSynthesizer::new(String::new()),
            Err(Error::Config(_))
        ));
    }
}
