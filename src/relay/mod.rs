//! Session relay
//!
//! Owns each client connection's lifecycle: ingests control envelopes,
//! drives the turn state machine, runs the three adapters in order and
//! streams the results back through a bounded outbound queue.
//!
//! ```text
//! socket ──▶ Session::run ──▶ TurnState
//!                 │
//!                 └─spawn─▶ Turn::run ── transcribe ─▶ complete ─▶ synthesize
//!                               │
//! socket ◀── writer task ◀── mpsc (bounded) ◀──────────────────────┘
//! ```

mod session;
mod state;
mod turn;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use session::{CONNECTED_MESSAGE, Session, WELCOME_MESSAGE};
pub use state::{AcceptClip, StartRecording, TokenMint, TurnState, TurnToken};
pub use turn::{COMPLETION_FAILED, INVALID_AUDIO, SpokenReply, TRANSCRIPTION_FAILED, TurnOutcome};

use crate::Result;
use crate::config::Config;
use crate::conversation::{ConversationStore, SessionId};
use crate::protocol::OutboundFrame;
use crate::providers::Providers;

/// Default bounded outbound queue length per session
pub const DEFAULT_OUTBOUND_BUFFER: usize = 32;

/// Shared relay dependencies, cloned into every session
#[derive(Clone)]
pub struct Relay {
    store: ConversationStore,
    providers: Providers,
    system_prompt: Arc<str>,
    outbound_buffer: usize,
}

impl Relay {
    /// Create a relay with a fresh in-memory store
    pub fn new(providers: Providers, system_prompt: impl Into<Arc<str>>) -> Self {
        Self {
            store: ConversationStore::new(),
            providers,
            system_prompt: system_prompt.into(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }

    /// Build the HTTP adapters and directive from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a selected provider has no API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let providers = Providers::from_config(config)?;
        Ok(Self::new(providers, config.system_prompt.as_str())
            .with_outbound_buffer(config.server.outbound_buffer))
    }

    /// Share an existing store
    #[must_use]
    pub fn with_store(mut self, store: ConversationStore) -> Self {
        self.store = store;
        self
    }

    /// Set the per-session outbound queue length (minimum 1)
    #[must_use]
    pub fn with_outbound_buffer(mut self, len: usize) -> Self {
        self.outbound_buffer = len.max(1);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    #[must_use]
    pub const fn providers(&self) -> &Providers {
        &self.providers
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Accept a new connection
    ///
    /// Mints a session id, seeds its log with the system directive and
    /// returns the session plus the receiving end of its outbound queue. The
    /// caller drains the receiver onto the socket with a single writer.
    pub async fn open_session(&self) -> (Session, mpsc::Receiver<OutboundFrame>) {
        let id = SessionId::new();
        self.store.open(id, &self.system_prompt).await;

        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        (Session::new(id, self.clone(), tx), rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::conversation::ChatMessage;
    use crate::error::{CompletionError, SynthesisError, TranscriptionError};
    use crate::providers::{AudioClip, AudioStream, Completer, Synthesizer, Transcriber};

    struct Unused;

    #[async_trait]
    impl Transcriber for Unused {
        async fn transcribe(&self, _clip: &AudioClip) -> std::result::Result<String, TranscriptionError> {
            Err(TranscriptionError::Empty)
        }
    }

    #[async_trait]
    impl Completer for Unused {
        async fn complete(&self, _messages: &[ChatMessage]) -> std::result::Result<String, CompletionError> {
            Err(CompletionError::MalformedResponse("unused".to_string()))
        }
    }

    #[async_trait]
    impl Synthesizer for Unused {
        async fn synthesize(&self, _text: &str) -> std::result::Result<AudioStream, SynthesisError> {
            Err(SynthesisError::Interrupted("unused".to_string()))
        }
    }

    fn relay() -> Relay {
        let unused = Arc::new(Unused);
        Relay::new(Providers::new(unused.clone(), unused.clone(), unused), "directive")
    }

    #[tokio::test]
    async fn open_session_seeds_directive_first() {
        let relay = relay();
        let (session, _rx) = relay.open_session().await;

        let log = relay.store().read(session.id()).await;
        assert_eq!(log, vec![ChatMessage::system("directive")]);
    }

    #[tokio::test]
    async fn sessions_get_distinct_ids() {
        let relay = relay();
        let (a, _) = relay.open_session().await;
        let (b, _) = relay.open_session().await;

        assert_ne!(a.id(), b.id());
        assert_eq!(relay.store().session_count().await, 2);
    }

    #[test]
    fn outbound_buffer_has_a_floor() {
        assert_eq!(relay().with_outbound_buffer(0).outbound_buffer, 1);
    }
}
