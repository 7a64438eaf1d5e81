//! One conversation turn: transcribe, complete, synthesize
//!
//! A turn runs as its own task so the session reader keeps draining the
//! socket. Every frame it produces goes through the session's bounded
//! outbound queue, so a slow client suspends the turn at the next enqueue.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::state::TurnToken;
use crate::conversation::{ChatMessage, ConversationStore, SessionId};
use crate::error::TranscriptionError;
use crate::protocol::{OutboundFrame, ServerEnvelope};
use crate::providers::{AudioClip, AudioFormat, Providers};
use crate::{Error, Result};

/// Error code sent when the clip cannot be decoded or its format is rejected
pub const INVALID_AUDIO: &str = "invalid_audio";
/// Error code sent when the speech-to-text call fails or returns nothing
pub const TRANSCRIPTION_FAILED: &str = "transcription_failed";
/// Error code sent when the completion call fails
pub const COMPLETION_FAILED: &str = "completion_failed";

/// How a turn ended, for logging by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply text sent and its audio stream closed with `audio_end`
    Spoken(SpokenReply),
    /// Aborted before any reply was sent; an `error` envelope went out
    Aborted { code: &'static str },
}

/// Audio forwarded for one reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpokenReply {
    pub chunks: usize,
    pub bytes: usize,
    /// Synthesis failed to open or broke off mid-stream
    pub truncated: bool,
}

/// Everything a turn task needs, detached from the session
pub struct Turn {
    pub session_id: SessionId,
    pub token: Option<TurnToken>,
    pub store: ConversationStore,
    pub providers: Providers,
    pub outbound: mpsc::Sender<OutboundFrame>,
}

impl Turn {
    /// Run the pipeline for one clip
    ///
    /// Adapter failures are reported to the client and end the turn with
    /// `Ok`; only a closed outbound queue is an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the session's writer is gone
    pub async fn run(self, data: String, format: Option<String>) -> Result<TurnOutcome> {
        let clip = match decode_clip(&data, format.as_deref()) {
            Ok(clip) => clip,
            Err(e) => return self.abort(INVALID_AUDIO, &e.into()).await,
        };

        tracing::debug!(
            session_id = %self.session_id,
            bytes = clip.data.len(),
            format = clip.format.extension(),
            "transcribing clip"
        );

        let transcript = match self.providers.transcriber.transcribe(&clip).await {
            Ok(text) => text,
            Err(e) => {
                let code = match e {
                    TranscriptionError::UnsupportedFormat(_)
                    | TranscriptionError::InvalidPayload(_) => INVALID_AUDIO,
                    _ => TRANSCRIPTION_FAILED,
                };
                return self.abort(code, &e.into()).await;
            }
        };

        tracing::info!(session_id = %self.session_id, transcript = %transcript, "transcribed");
        self.store
            .append(self.session_id, ChatMessage::user(transcript.clone()))
            .await;

        let history = self.store.read(self.session_id).await;
        let reply = match self.providers.completer.complete(&history).await {
            Ok(reply) => reply,
            Err(e) => return self.abort(COMPLETION_FAILED, &e.into()).await,
        };

        tracing::info!(session_id = %self.session_id, reply = %reply, "completed");
        self.store
            .append(self.session_id, ChatMessage::assistant(reply.clone()))
            .await;

        self.send(ServerEnvelope::Transcription { text: transcript })
            .await?;
        self.send(ServerEnvelope::ResponseText {
            text: reply.clone(),
        })
        .await?;

        self.send(ServerEnvelope::AudioStart).await?;
        let spoken = self.speak(&reply).await?;
        self.send(ServerEnvelope::AudioEnd).await?;

        Ok(TurnOutcome::Spoken(spoken))
    }

    /// Forward synthesized chunks as they arrive
    ///
    /// A synthesis failure only cuts the audio short; the caller still closes
    /// the stream with `audio_end`.
    async fn speak(&self, text: &str) -> Result<SpokenReply> {
        let mut spoken = SpokenReply::default();

        let mut stream = match self.providers.synthesizer.synthesize(text).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "synthesis failed to start");
                spoken.truncated = true;
                return Ok(spoken);
            }
        };

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    spoken.chunks += 1;
                    spoken.bytes += bytes.len();
                    self.push(OutboundFrame::Audio(bytes)).await?;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        chunks = spoken.chunks,
                        error = %e,
                        "synthesis stream failed"
                    );
                    spoken.truncated = true;
                    break;
                }
            }
        }

        Ok(spoken)
    }

    async fn abort(&self, code: &'static str, error: &Error) -> Result<TurnOutcome> {
        tracing::warn!(
            session_id = %self.session_id,
            token = ?self.token.map(TurnToken::value),
            code,
            error = %error,
            "turn aborted"
        );
        self.send(ServerEnvelope::error(code, error.to_string()))
            .await?;
        Ok(TurnOutcome::Aborted { code })
    }

    async fn send(&self, envelope: ServerEnvelope) -> Result<()> {
        self.push(OutboundFrame::Envelope(envelope)).await
    }

    async fn push(&self, frame: OutboundFrame) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| Error::Transport("session writer closed".to_string()))
    }
}

/// Decode the base64 payload of an `audio_complete`
fn decode_clip(data: &str, format: Option<&str>) -> std::result::Result<AudioClip, TranscriptionError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| TranscriptionError::InvalidPayload(e.to_string()))?;

    if bytes.is_empty() {
        return Err(TranscriptionError::InvalidPayload("clip is empty".to_string()));
    }

    Ok(AudioClip {
        data: bytes,
        format: AudioFormat::from_hint(format),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::error::{CompletionError, SynthesisError};
    use crate::providers::{AudioStream, Completer, Synthesizer, Transcriber};

    struct Echo;

    #[async_trait]
    impl Transcriber for Echo {
        async fn transcribe(&self, clip: &AudioClip) -> std::result::Result<String, TranscriptionError> {
            Ok(String::from_utf8_lossy(&clip.data).into_owned())
        }
    }

    struct Shout;

    #[async_trait]
    impl Completer for Shout {
        async fn complete(&self, messages: &[ChatMessage]) -> std::result::Result<String, CompletionError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if last == "fail" {
                return Err(CompletionError::Quota("out of tokens".to_string()));
            }
            Ok(last.to_uppercase())
        }
    }

    struct Chunks(Vec<&'static [u8]>, bool);

    #[async_trait]
    impl Synthesizer for Chunks {
        async fn synthesize(&self, _text: &str) -> std::result::Result<AudioStream, SynthesisError> {
            let mut items: Vec<std::result::Result<Bytes, SynthesisError>> = self
                .0
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect();
            if self.1 {
                items.push(Err(SynthesisError::Interrupted("reset".to_string())));
            }
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn turn(synth: Chunks) -> (Turn, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(16);
        let turn = Turn {
            session_id: SessionId::new(),
            token: None,
            store: ConversationStore::new(),
            providers: Providers::new(Arc::new(Echo), Arc::new(Shout), Arc::new(synth)),
            outbound: tx,
        };
        (turn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn decode_rejects_bad_base64_and_empty_clips() {
        assert!(matches!(
            decode_clip("%%%", None),
            Err(TranscriptionError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_clip("", None),
            Err(TranscriptionError::InvalidPayload(_))
        ));
        let clip = decode_clip("aGk=", Some("wav")).unwrap();
        assert_eq!(clip.data, b"hi");
        assert_eq!(clip.format, AudioFormat::Wav);
    }

    #[tokio::test]
    async fn spoken_turn_emits_frames_in_order() {
        let (turn, mut rx) = turn(Chunks(vec![b"ab", b"cd"], false));
        let store = turn.store.clone();
        let id = turn.session_id;

        let outcome = turn.run(STANDARD.encode("hello"), None).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Spoken(SpokenReply {
                chunks: 2,
                bytes: 4,
                truncated: false
            })
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                OutboundFrame::Envelope(ServerEnvelope::Transcription {
                    text: "hello".to_string()
                }),
                OutboundFrame::Envelope(ServerEnvelope::ResponseText {
                    text: "HELLO".to_string()
                }),
                OutboundFrame::Envelope(ServerEnvelope::AudioStart),
                OutboundFrame::Audio(Bytes::from_static(b"ab")),
                OutboundFrame::Audio(Bytes::from_static(b"cd")),
                OutboundFrame::Envelope(ServerEnvelope::AudioEnd),
            ]
        );
        assert_eq!(
            store.read(id).await,
            vec![ChatMessage::user("hello"), ChatMessage::assistant("HELLO")]
        );
    }

    #[tokio::test]
    async fn completion_failure_keeps_user_message_only() {
        let (turn, mut rx) = turn(Chunks(vec![], false));
        let store = turn.store.clone();
        let id = turn.session_id;

        let outcome = turn.run(STANDARD.encode("fail"), None).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Aborted { code: COMPLETION_FAILED });
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [OutboundFrame::Envelope(ServerEnvelope::Error { code, .. })] if code == COMPLETION_FAILED
        ));
        assert_eq!(store.read(id).await, vec![ChatMessage::user("fail")]);
    }

    #[tokio::test]
    async fn broken_synthesis_still_closes_audio() {
        let (turn, mut rx) = turn(Chunks(vec![b"x", b"y"], true));

        let outcome = turn.run(STANDARD.encode("hi"), None).await.unwrap();

        assert!(matches!(
            outcome,
            TurnOutcome::Spoken(SpokenReply { chunks: 2, truncated: true, .. })
        ));
        let frames = drain(&mut rx);
        assert_eq!(frames.last(), Some(&OutboundFrame::Envelope(ServerEnvelope::AudioEnd)));
        assert_eq!(
            frames
                .iter()
                .filter(|f| matches!(f, OutboundFrame::Audio(_)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn undecodable_clip_is_invalid_audio() {
        let (turn, mut rx) = turn(Chunks(vec![], false));
        let store = turn.store.clone();
        let id = turn.session_id;

        let outcome = turn.run("not base64!".to_string(), None).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Aborted { code: INVALID_AUDIO });
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(store.read(id).await.is_empty());
    }

    #[tokio::test]
    async fn closed_writer_is_a_transport_error() {
        let (turn, rx) = turn(Chunks(vec![b"z"], false));
        drop(rx);

        let result = turn.run(STANDARD.encode("hi"), None).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
