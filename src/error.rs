//! Error types for the Aura relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Aura relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Inbound envelope could not be decoded or is not part of the protocol
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Speech-to-text adapter failed
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    /// Completion adapter failed
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// Text-to-speech adapter failed
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// Socket-level failure; terminal for the session
    #[error("transport error: {0}")]
    Transport(String),

    /// Client gave up reconnecting
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Malformed or unrecognized control envelope
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Text frame is not a JSON object with a `type` field
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// `type` field names a kind this side does not handle
    #[error("unrecognized envelope type: {0}")]
    UnknownKind(String),

    /// Binary frame where only text envelopes are accepted
    #[error("unexpected binary frame ({0} bytes)")]
    UnexpectedBinary(usize),
}

/// Speech-to-text failure
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Declared clip format is not accepted by the engine
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Inbound payload was not valid base64
    #[error("invalid audio payload: {0}")]
    InvalidPayload(String),

    /// Engine returned no text
    #[error("transcription was empty")]
    Empty,

    /// Network failure talking to the engine
    #[error("transcription request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Engine answered with a non-success status
    #[error("transcription API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// Language-model completion failure
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Provider rejected the call for rate or quota reasons
    #[error("completion quota exceeded: {0}")]
    Quota(String),

    /// Network failure talking to the provider
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("completion API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response did not contain a usable reply
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

/// Text-to-speech failure, possibly after some chunks were yielded
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Network failure opening or reading the audio stream
    #[error("synthesis request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Engine answered with a non-success status
    #[error("synthesis API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Stream broke off mid-reply
    #[error("synthesis stream interrupted: {0}")]
    Interrupted(String),
}
