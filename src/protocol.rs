//! Wire protocol shared by the relay and the capture client
//!
//! Control envelopes travel as JSON text frames tagged by a `type` field.
//! Synthesized audio travels as raw binary frames between `audio_start`
//! and `audio_end`.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Envelope sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Client hello
    Connection {
        #[serde(default)]
        message: Option<String>,
    },
    /// Push-to-talk pressed
    RecordingStart,
    /// Whole recorded clip, base64 encoded
    AudioComplete {
        data: String,
        /// Container/codec hint such as `m4a` or `wav`
        #[serde(default)]
        format: Option<String>,
        /// Client clock (ms) when recording stopped
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

impl ClientEnvelope {
    const KINDS: &'static [&'static str] = &["connection", "recording_start", "audio_complete"];
}

/// Envelope sent by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Sent unprompted right after the socket is accepted
    Connected { message: String },
    /// Reply to a client hello
    Welcome { message: String },
    /// Acknowledges `recording_start` with the freshly minted turn token
    RecordingStarted {
        #[serde(rename = "sessionId")]
        session_id: i64,
    },
    /// Speech-to-text result
    Transcription { text: String },
    /// Completion reply text
    ResponseText { text: String },
    /// Binary audio frames follow
    AudioStart,
    /// No more binary audio frames for this reply
    AudioEnd,
    /// Turn aborted before any audio was produced
    Error { code: String, message: String },
}

impl ServerEnvelope {
    const KINDS: &'static [&'static str] = &[
        "connected",
        "welcome",
        "recording_started",
        "transcription",
        "response_text",
        "audio_start",
        "audio_end",
        "error",
    ];

    /// Wire name of this envelope kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Welcome { .. } => "welcome",
            Self::RecordingStarted { .. } => "recording_started",
            Self::Transcription { .. } => "transcription",
            Self::ResponseText { .. } => "response_text",
            Self::AudioStart => "audio_start",
            Self::AudioEnd => "audio_end",
            Self::Error { .. } => "error",
        }
    }

    /// Build an error envelope
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// One frame queued for the client, in send order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// JSON text frame
    Envelope(ServerEnvelope),
    /// Raw synthesized audio
    Audio(Bytes),
}

/// One frame read from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
}

/// Decode a client envelope from a text frame
///
/// # Errors
///
/// Returns `ProtocolError::Malformed` for text that is not a tagged JSON
/// object or has bad fields, `ProtocolError::UnknownKind` for a `type` the
/// relay does not handle
pub fn decode_client(text: &str) -> Result<ClientEnvelope, ProtocolError> {
    decode(text, ClientEnvelope::KINDS)
}

/// Decode a relay envelope from a text frame
///
/// # Errors
///
/// Same conditions as [`decode_client`]
pub fn decode_server(text: &str) -> Result<ServerEnvelope, ProtocolError> {
    decode(text, ServerEnvelope::KINDS)
}

/// Encode an envelope as a JSON text frame
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode<T: Serialize>(envelope: &T) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

fn decode<T: DeserializeOwned>(text: &str, kinds: &[&str]) -> Result<T, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing `type` field".to_string()))?;

    if !kinds.contains(&kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_started_uses_camel_case_token() {
        let json = encode(&ServerEnvelope::RecordingStarted {
            session_id: 1_700_000_000_000,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"recording_started","sessionId":1700000000000}"#
        );
    }

    #[test]
    fn unit_envelopes_carry_only_type() {
        assert_eq!(encode(&ServerEnvelope::AudioStart).unwrap(), r#"{"type":"audio_start"}"#);
        assert_eq!(encode(&ServerEnvelope::AudioEnd).unwrap(), r#"{"type":"audio_end"}"#);
    }

    #[test]
    fn decodes_audio_complete() {
        let msg = decode_client(
            r#"{"type":"audio_complete","data":"AAEC","format":"m4a","timestamp":12}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientEnvelope::AudioComplete {
                data: "AAEC".to_string(),
                format: Some("m4a".to_string()),
                timestamp: Some(12),
            }
        );
    }

    #[test]
    fn decodes_hello_without_message() {
        let msg = decode_client(r#"{"type":"connection"}"#).unwrap();
        assert_eq!(msg, ClientEnvelope::Connection { message: None });
    }

    #[test]
    fn unknown_kind_is_distinguished_from_garbage() {
        assert!(matches!(
            decode_client(r#"{"type":"dance"}"#),
            Err(ProtocolError::UnknownKind(k)) if k == "dance"
        ));
        assert!(matches!(decode_client("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_client(r#"{"data":1}"#), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn audio_complete_without_data_is_malformed() {
        assert!(matches!(
            decode_client(r#"{"type":"audio_complete","format":"m4a"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn server_envelope_kind_matches_tag() {
        let env = ServerEnvelope::error("completion_failed", "quota");
        let json = encode(&env).unwrap();
        assert!(json.contains(&format!("\"type\":\"{}\"", env.kind())));
        assert_eq!(decode_server(&json).unwrap(), env);
    }
}
