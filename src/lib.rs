//! Aura Relay - real-time voice conversation relay
//!
//! A capture client records speech and ships each clip over a persistent
//! WebSocket. The relay transcribes it, runs the transcript through a
//! per-session language-model conversation and streams synthesized speech
//! back as binary frames.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Capture client                     │
//! │   push-to-talk  │  playback buffer  │  reconnect     │
//! └────────────────────────┬─────────────────────────────┘
//!                          │ WebSocket (JSON + binary)
//! ┌────────────────────────▼─────────────────────────────┐
//! │                      Relay                            │
//! │   session loop  │  turn state  │  conversation store  │
//! └────────────────────────┬─────────────────────────────┘
//!                          │
//! ┌────────────────────────▼─────────────────────────────┐
//! │                     Adapters                          │
//! │   speech-to-text  │  completion  │  text-to-speech   │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod prompt;
pub mod protocol;
pub mod providers;
pub mod relay;
pub mod voice;

pub use api::ApiServer;
pub use config::Config;
pub use conversation::{ChatMessage, ConversationStore, MessageRole, SessionId};
pub use error::{Error, Result};
pub use protocol::{ClientEnvelope, InboundFrame, OutboundFrame, ServerEnvelope};
pub use providers::{AudioClip, AudioFormat, AudioStream, Completer, Providers, Synthesizer, Transcriber};
pub use relay::{Relay, Session, TurnState, TurnToken};
