//! Speech-to-text (STT) processing

use async_trait::async_trait;

use super::{AudioClip, AudioFormat, Transcriber};
use crate::error::TranscriptionError;
use crate::{Error, Result};

const ELEVENLABS_STT_URL: &str = "https://api.elevenlabs.io/v1/speech-to-text";
const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Transcription response body (both engines answer with `text`)
#[derive(serde::Deserialize)]
struct TranscriptResponse {
    text: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum Backend {
    ElevenLabs,
    Whisper,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    backend: Backend,
}

impl SpeechToText {
    /// Create a new STT instance using ElevenLabs Scribe
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, model: String) -> Result<Self> {
        Self::with_backend(api_key, model, Backend::ElevenLabs)
    }

    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        Self::with_backend(api_key, model, Backend::Whisper)
    }

    fn with_backend(api_key: String, model: String, backend: Backend) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(format!("{backend:?} API key required for STT")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            backend,
        })
    }

    /// Whether the engine accepts this container
    const fn accepts(format: &AudioFormat) -> bool {
        !matches!(format, AudioFormat::Other(_))
    }

    fn form(&self, clip: &AudioClip) -> std::result::Result<reqwest::multipart::Form, TranscriptionError> {
        let part = reqwest::multipart::Part::bytes(clip.data.clone())
            .file_name(format!("audio.{}", clip.format.extension()))
            .mime_str(clip.format.mime_type())?;

        let form = reqwest::multipart::Form::new().part("file", part);
        Ok(match self.backend {
            Backend::ElevenLabs => form
                .text("model_id", self.model.clone())
                .text("tag_audio_events", "false")
                .text("diarize", "false"),
            Backend::Whisper => form.text("model", self.model.clone()),
        })
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, clip: &AudioClip) -> std::result::Result<String, TranscriptionError> {
        if !Self::accepts(&clip.format) {
            return Err(TranscriptionError::UnsupportedFormat(
                clip.format.extension().to_string(),
            ));
        }

        tracing::debug!(
            backend = ?self.backend,
            audio_bytes = clip.data.len(),
            format = clip.format.extension(),
            "starting transcription"
        );

        let request = match self.backend {
            Backend::ElevenLabs => self
                .client
                .post(ELEVENLABS_STT_URL)
                .header("xi-api-key", &self.api_key),
            Backend::Whisper => self
                .client
                .post(WHISPER_URL)
                .header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = request
            .multipart(self.form(clip)?)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "STT request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "STT API error");
            return Err(TranscriptionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let result: TranscriptResponse = response.json().await?;
        let text = result.text.trim().to_string();
        if text.is_empty() {
            return Err(TranscriptionError::Empty);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_config_error() {
        assert!(matches!(
            SpeechToText::new_elevenlabs(String::new(), "scribe_v2".to_string()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn unknown_format_rejected_before_network() {
        let stt = SpeechToText::new_whisper("key".to_string(), "whisper-1".to_string()).unwrap();
        let clip = AudioClip {
            data: vec![1, 2, 3],
            format: AudioFormat::Other("flac".to_string()),
        };
        assert!(matches!(
            stt.transcribe(&clip).await,
            Err(TranscriptionError::UnsupportedFormat(f)) if f == "flac"
        ));
    }
}
