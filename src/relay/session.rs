//! One client connection
//!
//! The session task reads inbound frames and drives the turn state machine.
//! Turns run on a spawned task and report back through a completion
//! channel, so envelopes arriving mid-turn are still read and rejected.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Relay;
use super::state::{AcceptClip, StartRecording, TokenMint, TurnState};
use super::turn::{Turn, TurnOutcome};
use crate::conversation::SessionId;
use crate::error::ProtocolError;
use crate::protocol::{self, ClientEnvelope, InboundFrame, OutboundFrame, ServerEnvelope};
use crate::{Error, Result};

/// Sent unprompted once the socket is accepted
pub const CONNECTED_MESSAGE: &str = "WebSocket server ready";
/// Reply to a client hello
pub const WELCOME_MESSAGE: &str = "Server ready";

/// Live state for one connected client
pub struct Session {
    id: SessionId,
    relay: Relay,
    state: TurnState,
    mint: TokenMint,
    outbound: mpsc::Sender<OutboundFrame>,
    turn: Option<JoinHandle<()>>,
}

impl Session {
    pub(super) fn new(id: SessionId, relay: Relay, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            relay,
            state: TurnState::Idle,
            mint: TokenMint::default(),
            outbound,
            turn: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Drive the session until the inbound stream ends or the transport fails
    ///
    /// On return the in-flight turn (if any) is aborted and the session's
    /// conversation log is cleared.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the session
    pub async fn run<S>(mut self, mut inbound: S) -> Result<()>
    where
        S: Stream<Item = Result<InboundFrame>> + Unpin,
    {
        tracing::info!(session_id = %self.id, "session opened");

        let result = self.drive(&mut inbound).await;
        if let Err(e) = &result {
            tracing::warn!(session_id = %self.id, error = %e, "session transport failed");
        }

        self.close().await;
        result
    }

    async fn drive<S>(&mut self, inbound: &mut S) -> Result<()>
    where
        S: Stream<Item = Result<InboundFrame>> + Unpin,
    {
        self.send(ServerEnvelope::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        })
        .await?;

        let (done_tx, mut done_rx) = mpsc::channel::<Result<TurnOutcome>>(1);

        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame, &done_tx).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                },
                Some(outcome) = done_rx.recv() => self.turn_finished(outcome)?,
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: InboundFrame,
        done: &mpsc::Sender<Result<TurnOutcome>>,
    ) -> Result<()> {
        let text = match frame {
            InboundFrame::Text(text) => text,
            InboundFrame::Binary(bytes) => {
                let e = ProtocolError::UnexpectedBinary(bytes.len());
                tracing::warn!(session_id = %self.id, error = %e, "ignoring inbound frame");
                return Ok(());
            }
        };

        match protocol::decode_client(&text) {
            Ok(envelope) => self.handle_envelope(envelope, done).await,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "ignoring inbound envelope");
                Ok(())
            }
        }
    }

    async fn handle_envelope(
        &mut self,
        envelope: ClientEnvelope,
        done: &mpsc::Sender<Result<TurnOutcome>>,
    ) -> Result<()> {
        match envelope {
            ClientEnvelope::Connection { message } => {
                tracing::info!(session_id = %self.id, client_message = ?message, "client hello");
                self.send(ServerEnvelope::Welcome {
                    message: WELCOME_MESSAGE.to_string(),
                })
                .await
            }
            ClientEnvelope::RecordingStart => {
                let token = self.mint.mint();
                match self.state.start_recording(token) {
                    StartRecording::Started => {
                        tracing::debug!(session_id = %self.id, %token, "recording started");
                    }
                    StartRecording::Restarted => {
                        tracing::warn!(session_id = %self.id, %token, "recording restarted before clip arrived");
                    }
                    StartRecording::DuringProcessing => {
                        tracing::warn!(session_id = %self.id, %token, "recording started while a turn is in flight");
                    }
                    StartRecording::Rejected => return Ok(()),
                }
                self.send(ServerEnvelope::RecordingStarted {
                    session_id: token.value(),
                })
                .await
            }
            ClientEnvelope::AudioComplete {
                data,
                format,
                timestamp,
            } => {
                match self.state.accept_clip() {
                    AcceptClip::Accepted { token } => {
                        tracing::debug!(
                            session_id = %self.id,
                            token = ?token.map(|t| t.value()),
                            client_timestamp = ?timestamp,
                            encoded_len = data.len(),
                            "clip accepted"
                        );
                        self.spawn_turn(token, data, format, done.clone());
                    }
                    AcceptClip::Busy => {
                        tracing::warn!(session_id = %self.id, "turn in flight, ignoring audio_complete");
                    }
                    AcceptClip::Closed => {}
                }
                Ok(())
            }
        }
    }

    fn spawn_turn(
        &mut self,
        token: Option<super::TurnToken>,
        data: String,
        format: Option<String>,
        done: mpsc::Sender<Result<TurnOutcome>>,
    ) {
        let turn = Turn {
            session_id: self.id,
            token,
            store: self.relay.store().clone(),
            providers: self.relay.providers().clone(),
            outbound: self.outbound.clone(),
        };

        self.turn = Some(tokio::spawn(async move {
            let outcome = turn.run(data, format).await;
            let _ = done.send(outcome).await;
        }));
    }

    fn turn_finished(&mut self, outcome: Result<TurnOutcome>) -> Result<()> {
        self.turn = None;
        self.state.finish_turn();

        match outcome? {
            TurnOutcome::Spoken(reply) => {
                tracing::info!(
                    session_id = %self.id,
                    chunks = reply.chunks,
                    bytes = reply.bytes,
                    truncated = reply.truncated,
                    "turn complete"
                );
            }
            TurnOutcome::Aborted { code } => {
                tracing::debug!(session_id = %self.id, code, "turn ended early");
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.state.close();
        if let Some(turn) = self.turn.take() {
            turn.abort();
            // Abort lands at the next yield; the turn may still append until then
            let _ = turn.await;
            tracing::debug!(session_id = %self.id, "aborted in-flight turn");
        }
        self.relay.store().clear(self.id).await;
        tracing::info!(session_id = %self.id, "session closed");
    }

    async fn send(&self, envelope: ServerEnvelope) -> Result<()> {
        self.outbound
            .send(OutboundFrame::Envelope(envelope))
            .await
            .map_err(|_| Error::Transport("session writer closed".to_string()))
    }
}
