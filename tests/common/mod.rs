//! Shared test utilities: deterministic adapters and a socket harness
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use aura_relay::error::{CompletionError, SynthesisError, TranscriptionError};
use aura_relay::protocol::{self, ServerEnvelope};
use aura_relay::{
    ApiServer, AudioClip, AudioStream, ChatMessage, Completer, ConversationStore, Providers,
    Relay, Synthesizer, Transcriber,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TRANSCRIPT: &str = "what is the weather like";
pub const REPLY: &str = "Sunny and warm today.";
pub const DIRECTIVE: &str = "test directive";

/// Transcriber returning a fixed transcript, or failing on demand
pub struct FakeTranscriber {
    pub text: String,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn ok() -> Self {
        Self {
            text: TRANSCRIPT.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TranscriptionError::Api {
                status: 500,
                body: "engine down".to_string(),
            });
        }
        assert!(!clip.data.is_empty());
        Ok(self.text.clone())
    }
}

/// Completer with an optional one-shot failure and an optional gate
pub struct FakeCompleter {
    pub reply: String,
    pub fail_next: AtomicBool,
    pub calls: AtomicUsize,
    /// When set, replies wait until the gate is notified
    pub gate: Option<Arc<Notify>>,
    /// Notified when a call starts
    pub entered: Arc<Notify>,
}

impl FakeCompleter {
    pub fn ok() -> Self {
        Self {
            reply: REPLY.to_string(),
            fail_next: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn failing_once() -> Self {
        let completer = Self::ok();
        completer.fail_next.store(true, Ordering::SeqCst);
        completer
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::ok()
        }
    }
}

#[async_trait]
impl Completer for FakeCompleter {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CompletionError::Quota("rate limited".to_string()));
        }
        assert!(!messages.is_empty());
        Ok(self.reply.clone())
    }
}

/// Synthesizer yielding fixed chunks, optionally failing afterwards
pub struct FakeSynthesizer {
    pub chunks: Vec<Bytes>,
    pub fail_after: bool,
}

impl FakeSynthesizer {
    pub fn chunks(chunks: &[&'static [u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| Bytes::from_static(c)).collect(),
            fail_after: false,
        }
    }

    /// `count` distinct chunks: `chunk-000`, `chunk-001`, ...
    pub fn numbered(count: usize) -> Self {
        Self {
            chunks: (0..count)
                .map(|i| Bytes::from(format!("chunk-{i:03}")))
                .collect(),
            fail_after: false,
        }
    }

    pub fn failing_after(chunks: &[&'static [u8]]) -> Self {
        Self {
            fail_after: true,
            ..Self::chunks(chunks)
        }
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<AudioStream, SynthesisError> {
        let mut items: Vec<Result<Bytes, SynthesisError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if self.fail_after {
            items.push(Err(SynthesisError::Interrupted("connection reset".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Relay over a shared store so tests can inspect logs
pub fn relay(
    transcriber: Arc<FakeTranscriber>,
    completer: Arc<FakeCompleter>,
    synthesizer: Arc<FakeSynthesizer>,
) -> (Relay, ConversationStore) {
    let store = ConversationStore::new();
    let providers = Providers::new(transcriber, completer, synthesizer);
    let relay = Relay::new(providers, DIRECTIVE).with_store(store.clone());
    (relay, store)
}

/// Serve `relay` on an ephemeral loopback port
pub async fn spawn_relay(relay: Relay) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(ApiServer::new(relay, "127.0.0.1", addr.port()).serve(listener));
    addr
}

pub async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .expect("failed to connect to relay");
    ws
}

/// Any frame the relay sends
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Envelope(ServerEnvelope),
    Audio(Bytes),
}

pub async fn next_frame(ws: &mut Ws) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for relay")
            .expect("relay closed the socket")
            .expect("socket error");
        match msg {
            Message::Text(text) => {
                return Frame::Envelope(
                    protocol::decode_server(text.as_str()).expect("undecodable envelope"),
                );
            }
            Message::Binary(bytes) => return Frame::Audio(bytes),
            _ => {}
        }
    }
}

pub async fn next_envelope(ws: &mut Ws) -> ServerEnvelope {
    match next_frame(ws).await {
        Frame::Envelope(envelope) => envelope,
        Frame::Audio(bytes) => panic!("expected envelope, got {} audio bytes", bytes.len()),
    }
}

pub async fn send_text(ws: &mut Ws, text: &str) {
    ws.send(Message::Text(text.to_string().into()))
        .await
        .expect("failed to send");
}

/// Base64 `audio_complete` for a small fake clip
pub fn audio_complete() -> String {
    r#"{"type":"audio_complete","data":"UklGRiQAAABXQVZF","format":"m4a","timestamp":1700000000000}"#
        .to_string()
}

/// Connect and consume the unprompted `connected` envelope
pub async fn connect_ready(addr: SocketAddr) -> Ws {
    let mut ws = connect(addr).await;
    assert!(matches!(
        next_envelope(&mut ws).await,
        ServerEnvelope::Connected { .. }
    ));
    ws
}

/// Wait until the store holds exactly `n` sessions
pub async fn wait_for_sessions(store: &ConversationStore, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.session_count().await != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count never settled");
}
