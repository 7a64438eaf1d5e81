//! External service adapters
//!
//! The relay depends only on the three capability traits below. Concrete
//! HTTP implementations:
//! - ElevenLabs / `OpenAI` Whisper for speech-to-text
//! - Any `OpenAI`-compatible chat endpoint (Groq by default) for completion
//! - ElevenLabs / `OpenAI` streaming speech for text-to-speech

mod llm;
mod stt;
mod tts;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub use llm::ChatCompletions;
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

use crate::config::{Config, SttProvider, TtsProvider};
use crate::conversation::ChatMessage;
use crate::error::{CompletionError, SynthesisError, TranscriptionError};
use crate::{Error, Result};

/// Lazily produced synthesized audio; finite, forward-only, consumed once
pub type AudioStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, SynthesisError>> + Send>>;

/// Container/codec of a recorded clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFormat {
    M4a,
    Wav,
    Mp3,
    Webm,
    Ogg,
    Other(String),
}

impl AudioFormat {
    /// Interpret the client's format hint; mobile recorders default to m4a
    #[must_use]
    pub fn from_hint(hint: Option<&str>) -> Self {
        let Some(hint) = hint else {
            return Self::M4a;
        };
        let lower = hint.trim().trim_start_matches('.').to_lowercase();
        let lower = lower.strip_prefix("audio/").unwrap_or(&lower);
        match lower {
            "" | "m4a" | "mp4" | "aac" | "x-m4a" => Self::M4a,
            "wav" | "wave" | "x-wav" => Self::Wav,
            "mp3" | "mpeg" => Self::Mp3,
            "webm" => Self::Webm,
            "ogg" | "opus" => Self::Ogg,
            other => Self::Other(other.to_string()),
        }
    }

    /// MIME type used for uploads
    #[must_use]
    pub fn mime_type(&self) -> &str {
        match self {
            Self::M4a => "audio/m4a",
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Webm => "audio/webm",
            Self::Ogg => "audio/ogg",
            Self::Other(_) => "application/octet-stream",
        }
    }

    /// File extension used for multipart file names
    #[must_use]
    pub fn extension(&self) -> &str {
        match self {
            Self::M4a => "m4a",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Webm => "webm",
            Self::Ogg => "ogg",
            Self::Other(ext) => ext,
        }
    }
}

/// One complete recorded clip
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

/// Speech-to-text capability
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a whole clip
    async fn transcribe(&self, clip: &AudioClip) -> std::result::Result<String, TranscriptionError>;
}

/// Language-model completion capability
#[async_trait]
pub trait Completer: Send + Sync {
    /// Produce one reply for the full ordered history
    async fn complete(&self, messages: &[ChatMessage]) -> std::result::Result<String, CompletionError>;
}

/// Text-to-speech capability
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Open a chunked audio stream for `text`
    ///
    /// The returned stream may still fail after yielding chunks.
    async fn synthesize(&self, text: &str) -> std::result::Result<AudioStream, SynthesisError>;
}

/// The three adapters a relay needs
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub completer: Arc<dyn Completer>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Providers {
    /// Bundle explicit adapter instances
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        completer: Arc<dyn Completer>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            completer,
            synthesizer,
        }
    }

    /// Build HTTP adapters from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a selected provider has no API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let keys = &config.api_keys;

        let transcriber: Arc<dyn Transcriber> = match config.stt.provider {
            SttProvider::ElevenLabs => Arc::new(SpeechToText::new_elevenlabs(
                require(keys.elevenlabs.as_deref(), "ELEVENLABS_API_KEY")?,
                config.stt.model.clone(),
            )?),
            SttProvider::Whisper => Arc::new(SpeechToText::new_whisper(
                require(keys.openai.as_deref(), "OPENAI_API_KEY")?,
                config.stt.model.clone(),
            )?),
        };

        let completer = Arc::new(ChatCompletions::new(
            config.llm.base_url.clone(),
            require(keys.llm.as_deref(), "GROQ_API_KEY")?,
            config.llm.model.clone(),
        )?);

        let synthesizer: Arc<dyn Synthesizer> = match config.tts.provider {
            TtsProvider::ElevenLabs => Arc::new(TextToSpeech::new_elevenlabs(
                require(keys.elevenlabs.as_deref(), "ELEVENLABS_API_KEY")?,
                &config.tts,
            )?),
            TtsProvider::OpenAI => Arc::new(TextToSpeech::new_openai(
                require(keys.openai.as_deref(), "OPENAI_API_KEY")?,
                &config.tts,
            )?),
        };

        Ok(Self::new(transcriber, completer, synthesizer))
    }
}

fn require(key: Option<&str>, var: &str) -> Result<String> {
    key.filter(|k| !k.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| Error::Config(format!("{var} is not set")))
}
