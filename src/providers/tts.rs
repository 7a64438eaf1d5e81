//! Text-to-speech (TTS) processing
//!
//! Both backends stream the response body, so the first audio bytes reach
//! the relay before synthesis of the whole reply has finished.

use async_trait::async_trait;
use futures::{StreamExt, future};
use serde::Serialize;

use super::{AudioStream, Synthesizer};
use crate::config::TtsConfig;
use crate::error::SynthesisError;
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum Backend {
    OpenAI,
    ElevenLabs,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    model: String,
    output_format: String,
    stability: f32,
    similarity_boost: f32,
    speed: f32,
    backend: Backend,
}

#[derive(Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speed: f32,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
}

impl TextToSpeech {
    /// Create a new TTS instance using ElevenLabs streaming synthesis
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, config: &TtsConfig) -> Result<Self> {
        Self::with_backend(api_key, config, Backend::ElevenLabs)
    }

    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, config: &TtsConfig) -> Result<Self> {
        Self::with_backend(api_key, config, Backend::OpenAI)
    }

    fn with_backend(api_key: String, config: &TtsConfig, backend: Backend) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(format!("{backend:?} API key required for TTS")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: config.voice.clone(),
            model: config.model.clone(),
            output_format: config.output_format.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            speed: config.speed,
            backend,
        })
    }

    fn elevenlabs_url(&self) -> String {
        format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}/stream?output_format={}",
            self.voice, self.output_format
        )
    }

    async fn open(&self, text: &str) -> std::result::Result<reqwest::Response, SynthesisError> {
        let request = match self.backend {
            Backend::ElevenLabs => self
                .client
                .post(self.elevenlabs_url())
                .header("xi-api-key", &self.api_key)
                .json(&ElevenLabsRequest {
                    text,
                    model_id: &self.model,
                    voice_settings: VoiceSettings {
                        stability: self.stability,
                        similarity_boost: self.similarity_boost,
                        speed: self.speed,
                    },
                }),
            Backend::OpenAI => self
                .client
                .post(OPENAI_SPEECH_URL)
                .bearer_auth(&self.api_key)
                .json(&OpenAIRequest {
                    model: &self.model,
                    input: text,
                    voice: &self.voice,
                    speed: self.speed,
                    response_format: "mp3",
                }),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(backend = ?self.backend, status = %status, body = %body, "TTS API error");
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> std::result::Result<AudioStream, SynthesisError> {
        tracing::debug!(backend = ?self.backend, chars = text.len(), "opening TTS stream");

        let response = self.open(text).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SynthesisError::Interrupted(e.to_string())))
            .filter(|chunk| future::ready(!matches!(chunk, Ok(c) if c.is_empty())));

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tts_config() -> TtsConfig {
        TtsConfig {
            voice: "1qEiC6qsybMkmnNdVMbK".to_string(),
            ..TtsConfig::default()
        }
    }

    #[test]
    fn elevenlabs_url_carries_voice_and_format() {
        let tts = TextToSpeech::new_elevenlabs("k".to_string(), &tts_config()).unwrap();
        assert_eq!(
            tts.elevenlabs_url(),
            "https://api.elevenlabs.io/v1/text-to-speech/1qEiC6qsybMkmnNdVMbK/stream?output_format=mp3_22050_32"
        );
    }

    #[test]
    fn elevenlabs_body_includes_voice_settings() {
        let body = serde_json::to_value(ElevenLabsRequest {
            text: "hi",
            model_id: "eleven_multilingual_v2",
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
                speed: 1.0,
            },
        })
        .unwrap();
        assert_eq!(body["voice_settings"]["similarity_boost"], 0.75);
        assert_eq!(body["model_id"], "eleven_multilingual_v2");
    }

    #[test]
    fn empty_key_is_config_error() {
        assert!(TextToSpeech::new_openai(String::new(), &tts_config()).is_err());
    }
}
