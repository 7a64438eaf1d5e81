//! Capture-side streaming controller
//!
//! Counterpart of the relay on the recording device: push-to-talk
//! lifecycle, buffering of inbound audio, playback of each reply as a unit
//! and reconnect with backoff.

mod connection;
mod reconnect;

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tempfile::NamedTempFile;

pub use connection::{Command, TalkClient};
pub use reconnect::{ReconnectPolicy, Reconnector};

use crate::Result;
use crate::protocol::ServerEnvelope;
use crate::providers::AudioClip;

/// Socket lifecycle as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
        })
    }
}

/// Something the user should see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    State(ConnectionState),
    /// Relay greeting
    Ready(String),
    /// Recording acknowledged with its turn token
    Recording { token: i64 },
    /// Clip sent; waiting for the relay
    Sent { bytes: usize },
    Transcript(String),
    Reply(String),
    /// Reply audio started playing
    Playing { bytes: usize, latency: Option<Duration> },
    /// Relay aborted the turn
    TurnFailed { code: String, message: String },
    /// Waiting before reconnect attempt `attempt`
    Retrying { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted
    GaveUp { attempts: u32 },
}

/// Microphone access
pub trait Recorder {
    /// Begin capturing
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be started
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and return the whole clip
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be encoded
    fn stop(&mut self) -> Result<AudioClip>;
}

/// Speaker access
#[async_trait]
pub trait Player: Send {
    /// Play one reply file to completion
    async fn play(&mut self, path: &Path) -> Result<()>;
}

/// Accumulates binary chunks for one reply
#[derive(Debug, Default)]
pub struct PlaybackBuffer {
    chunks: Vec<Bytes>,
    receiving: bool,
}

impl PlaybackBuffer {
    /// `audio_start`: drop leftovers and begin a new reply
    pub fn start(&mut self) {
        if !self.chunks.is_empty() {
            tracing::debug!(chunks = self.chunks.len(), "discarding stale audio");
        }
        self.chunks.clear();
        self.receiving = true;
    }

    pub fn push(&mut self, chunk: Bytes) {
        if !self.receiving {
            tracing::debug!(bytes = chunk.len(), "audio chunk outside audio_start");
        }
        self.chunks.push(chunk);
    }

    /// `audio_end`: concatenate everything buffered, in arrival order
    pub fn finish(&mut self) -> Bytes {
        self.receiving = false;
        let total = self.chunks.iter().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }

    #[must_use]
    pub const fn is_receiving(&self) -> bool {
        self.receiving
    }
}

/// Round trip from recording stop to playback start
#[derive(Debug, Default)]
pub struct LatencyTracker {
    stopped_at: Option<Instant>,
}

impl LatencyTracker {
    pub fn recording_stopped(&mut self) {
        self.stopped_at = Some(Instant::now());
    }

    /// Playback began; returns the round trip if a stop was recorded
    pub fn playback_started(&mut self) -> Option<Duration> {
        self.stopped_at.take().map(|t| t.elapsed())
    }
}

/// What the connection loop should do after an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Notify(ClientEvent),
    /// Reply audio is complete; play it
    Play(Bytes),
    Nothing,
}

/// Envelope handling, independent of sockets and devices
#[derive(Debug, Default)]
pub struct Controller {
    playback: PlaybackBuffer,
    latency: LatencyTracker,
}

impl Controller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_envelope(&mut self, envelope: ServerEnvelope) -> Reaction {
        match envelope {
            ServerEnvelope::Connected { message } | ServerEnvelope::Welcome { message } => {
                Reaction::Notify(ClientEvent::Ready(message))
            }
            ServerEnvelope::RecordingStarted { session_id } => {
                Reaction::Notify(ClientEvent::Recording { token: session_id })
            }
            ServerEnvelope::Transcription { text } => Reaction::Notify(ClientEvent::Transcript(text)),
            ServerEnvelope::ResponseText { text } => Reaction::Notify(ClientEvent::Reply(text)),
            ServerEnvelope::AudioStart => {
                self.playback.start();
                Reaction::Nothing
            }
            ServerEnvelope::AudioEnd => Reaction::Play(self.playback.finish()),
            ServerEnvelope::Error { code, message } => {
                self.latency.stopped_at = None;
                Reaction::Notify(ClientEvent::TurnFailed { code, message })
            }
        }
    }

    pub fn on_audio(&mut self, chunk: Bytes) {
        self.playback.push(chunk);
    }

    pub fn recording_stopped(&mut self) {
        self.latency.recording_stopped();
    }

    pub fn playback_started(&mut self) -> Option<Duration> {
        self.latency.playback_started()
    }

    /// Connection dropped; a half-received reply is useless
    pub fn reset(&mut self) {
        self.playback = PlaybackBuffer::default();
        self.latency = LatencyTracker::default();
    }
}

/// Write a reply to a transient file that is removed when dropped
///
/// # Errors
///
/// Returns error if the file cannot be created or written
pub fn persist_reply(audio: &[u8]) -> Result<NamedTempFile> {
    use std::io::Write;

    let mut file = tempfile::Builder::new()
        .prefix("aura-reply-")
        .suffix(".mp3")
        .tempfile()?;
    file.write_all(audio)?;
    file.flush()?;
    Ok(file)
}
