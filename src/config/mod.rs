//! Configuration management for the Aura relay and capture client
//!
//! Precedence is env > TOML file > built-in default.

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::client::ReconnectPolicy;
use crate::prompt::SYSTEM_PROMPT;
use crate::{Error, Result};

use file::AuraConfigFile;

/// Complete configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay listener
    pub server: ServerConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Speech-to-text adapter
    pub stt: SttConfig,

    /// Completion adapter
    pub llm: LlmConfig,

    /// Text-to-speech adapter
    pub tts: TtsConfig,

    /// Capture client
    pub client: ClientConfig,

    /// Behavioral directive seeded as the first message of every session
    pub system_prompt: String,
}

/// Relay listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on (from `AURA_PORT` or `PORT`)
    pub port: u16,

    /// Bounded outbound queue length per session
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            outbound_buffer: 32,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// ElevenLabs (STT and TTS)
    pub elevenlabs: Option<String>,

    /// `OpenAI` (Whisper or speech)
    pub openai: Option<String>,

    /// Key for the completion endpoint (`AURA_LLM_API_KEY`, else `GROQ_API_KEY`)
    pub llm: Option<String>,
}

/// Speech-to-text engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    #[default]
    ElevenLabs,
    Whisper,
}

impl SttProvider {
    fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            "whisper" | "openai" => Ok(Self::Whisper),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,

    /// Engine model (e.g. "`scribe_v2`", "whisper-1")
    pub model: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::ElevenLabs,
            model: "scribe_v2".to_string(),
        }
    }
}

/// Completion configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// `OpenAI`-compatible API root
    pub base_url: String,

    /// Model identifier
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "openai/gpt-oss-20b".to_string(),
        }
    }
}

/// Text-to-speech engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    #[default]
    ElevenLabs,
    OpenAI,
}

impl TtsProvider {
    fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAI),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,

    /// Voice identifier
    pub voice: String,

    /// Engine model
    pub model: String,

    /// ElevenLabs output format (codec, sample rate, bitrate)
    pub output_format: String,

    pub stability: f32,
    pub similarity_boost: f32,

    /// Speed multiplier
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::ElevenLabs,
            voice: "1qEiC6qsybMkmnNdVMbK".to_string(),
            model: "eleven_multilingual_v2".to_string(),
            output_format: "mp3_22050_32".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            speed: 1.0,
        }
    }
}

/// Capture client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay URL
    pub server_url: String,

    /// Reconnect behavior after an unexpected close
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5000".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading the TOML overlay from `path` when given
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn from_sources(fc: AuraConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env("AURA_HOST")
                .or(fc.server.host)
                .unwrap_or(server_defaults.host),
            port: env("AURA_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(server_defaults.port),
            outbound_buffer: fc
                .server
                .outbound_buffer
                .filter(|n| *n > 0)
                .unwrap_or(server_defaults.outbound_buffer),
        };

        let api_keys = ApiKeys {
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            llm: env("AURA_LLM_API_KEY")
                .or_else(|| env("GROQ_API_KEY"))
                .or(fc.api_keys.groq),
        };

        let stt_defaults = SttConfig::default();
        let stt_provider = env("AURA_STT_PROVIDER")
            .or(fc.stt.provider)
            .map(|p| SttProvider::parse(&p))
            .transpose()?
            .unwrap_or(stt_defaults.provider);
        let stt = SttConfig {
            provider: stt_provider,
            model: env("AURA_STT_MODEL").or(fc.stt.model).unwrap_or_else(|| {
                match stt_provider {
                    SttProvider::ElevenLabs => stt_defaults.model,
                    SttProvider::Whisper => "whisper-1".to_string(),
                }
            }),
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            base_url: env("AURA_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or(llm_defaults.base_url),
            model: env("AURA_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(llm_defaults.model),
        };

        let tts_defaults = TtsConfig::default();
        let tts_provider = env("AURA_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map(|p| TtsProvider::parse(&p))
            .transpose()?
            .unwrap_or(tts_defaults.provider);
        let (default_voice, default_model) = match tts_provider {
            TtsProvider::ElevenLabs => (tts_defaults.voice, tts_defaults.model),
            TtsProvider::OpenAI => ("alloy".to_string(), "tts-1".to_string()),
        };
        let tts = TtsConfig {
            provider: tts_provider,
            voice: env("AURA_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or(default_voice),
            model: env("AURA_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or(default_model),
            output_format: fc.tts.output_format.unwrap_or(tts_defaults.output_format),
            stability: fc.tts.stability.unwrap_or(tts_defaults.stability),
            similarity_boost: fc
                .tts
                .similarity_boost
                .unwrap_or(tts_defaults.similarity_boost),
            speed: fc.tts.speed.unwrap_or(tts_defaults.speed),
        };

        let reconnect_defaults = ReconnectPolicy::default();
        let client = ClientConfig {
            server_url: env("AURA_SERVER_URL")
                .or(fc.client.url)
                .unwrap_or_else(|| format!("ws://127.0.0.1:{}", server.port)),
            reconnect: ReconnectPolicy {
                base_delay: fc
                    .client
                    .reconnect_base_ms
                    .map_or(reconnect_defaults.base_delay, Duration::from_millis),
                max_delay: fc
                    .client
                    .reconnect_max_ms
                    .map_or(reconnect_defaults.max_delay, Duration::from_millis),
                max_attempts: fc
                    .client
                    .reconnect_attempts
                    .unwrap_or(reconnect_defaults.max_attempts),
            },
        };

        let system_prompt = fc
            .system_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string());

        Ok(Self {
            server,
            api_keys,
            stt,
            llm,
            tts,
            client,
            system_prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(AuraConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.stt.provider, SttProvider::ElevenLabs);
        assert_eq!(config.stt.model, "scribe_v2");
        assert_eq!(config.llm.model, "openai/gpt-oss-20b");
        assert_eq!(config.tts.output_format, "mp3_22050_32");
        assert_eq!(config.client.server_url, "ws://127.0.0.1:5000");
        assert_eq!(config.system_prompt, SYSTEM_PROMPT);
    }

    #[test]
    fn env_overrides_file() {
        let fc: AuraConfigFile = toml::from_str("[server]\nport = 6000\n").unwrap();
        let config = Config::from_sources(fc, env_from(&[("PORT", "7000")])).unwrap();
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn file_overrides_default() {
        let fc: AuraConfigFile = toml::from_str(
            "system_prompt = \"be terse\"\n[client]\nreconnect_attempts = 9\n",
        )
        .unwrap();
        let config = Config::from_sources(fc, env_from(&[])).unwrap();
        assert_eq!(config.system_prompt, "be terse");
        assert_eq!(config.client.reconnect.max_attempts, 9);
    }

    #[test]
    fn provider_switch_changes_model_defaults() {
        let config = Config::from_sources(
            AuraConfigFile::default(),
            env_from(&[("AURA_STT_PROVIDER", "whisper"), ("AURA_TTS_PROVIDER", "openai")]),
        )
        .unwrap();
        assert_eq!(config.stt.model, "whisper-1");
        assert_eq!(config.tts.voice, "alloy");
        assert_eq!(config.tts.model, "tts-1");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = Config::from_sources(
            AuraConfigFile::default(),
            env_from(&[("AURA_TTS_PROVIDER", "espeak")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
