//! Socket loop for the capture client

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use futures::{Sink, SinkExt, StreamExt};
use tempfile::NamedTempFile;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{
    ClientEvent, ConnectionState, Controller, Player, Reaction, Recorder, ReconnectPolicy,
    Reconnector, persist_reply,
};
use crate::protocol::{self, ClientEnvelope};
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hello text sent right after connecting
const HELLO: &str = "Hello from client";

/// User input driving push-to-talk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start recording
    Press,
    /// Stop recording and send the clip
    Release,
    /// Close the connection and exit
    Quit,
}

/// Why a connected session ended
enum Exit {
    Quit,
    Dropped,
}

/// Replies queued behind the one playing
const PLAYBACK_QUEUE: usize = 4;

/// Push-to-talk client with reconnect
///
/// Replies play on a dedicated task so the socket and user commands are
/// still serviced while audio is coming out of the speaker.
pub struct TalkClient<R> {
    url: String,
    policy: ReconnectPolicy,
    recorder: R,
    replies: mpsc::Sender<NamedTempFile>,
    controller: Controller,
    recording: bool,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<R: Recorder> TalkClient<R> {
    /// Build the client and start its playback task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<P: Player + 'static>(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        recorder: R,
        player: P,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            url: url.into(),
            policy,
            recorder,
            replies: spawn_player(player),
            controller: Controller::new(),
            recording: false,
            events,
        }
    }

    /// Connect and serve commands until `Quit` or reconnects run out
    ///
    /// # Errors
    ///
    /// Returns `Error::ReconnectExhausted` when every retry failed
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        let mut reconnector = Reconnector::new(self.policy.clone());

        loop {
            self.emit(ClientEvent::State(ConnectionState::Connecting));

            match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    reconnector.reset();
                    tracing::info!(url = %self.url, "connected to relay");
                    self.emit(ClientEvent::State(ConnectionState::Connected));

                    match self.session(socket, &mut commands).await {
                        Ok(Exit::Quit) => {
                            self.emit(ClientEvent::State(ConnectionState::Disconnected));
                            return Ok(());
                        }
                        Ok(Exit::Dropped) => tracing::warn!("relay closed the connection"),
                        Err(e) => tracing::warn!(error = %e, "connection failed"),
                    }
                }
                Err(e) => tracing::warn!(url = %self.url, error = %e, "connect failed"),
            }

            self.stop_recording_silently();
            self.controller.reset();
            self.emit(ClientEvent::State(ConnectionState::Disconnected));

            let Some(delay) = reconnector.next_delay() else {
                let attempts = reconnector.attempts();
                tracing::error!(attempts, "giving up on relay");
                self.emit(ClientEvent::GaveUp { attempts });
                return Err(Error::ReconnectExhausted(attempts));
            };

            self.emit(ClientEvent::Retrying {
                attempt: reconnector.attempts(),
                delay,
            });

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                cmd = commands.recv() => {
                    if matches!(cmd, None | Some(Command::Quit)) {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn session(&mut self, socket: Socket, commands: &mut mpsc::Receiver<Command>) -> Result<Exit> {
        let (mut sink, mut stream) = socket.split();

        send_envelope(
            &mut sink,
            &ClientEnvelope::Connection {
                message: Some(HELLO.to_string()),
            },
        )
        .await?;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Press) => self.press(&mut sink).await?,
                    Some(Command::Release) => self.release(&mut sink).await?,
                    Some(Command::Quit) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(Exit::Quit);
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.on_text(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => self.controller.on_audio(bytes),
                    Some(Ok(Message::Close(_))) | None => return Ok(Exit::Dropped),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(Error::Transport(e.to_string())),
                },
            }
        }
    }

    async fn press<S>(&mut self, sink: &mut S) -> Result<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        if self.recording {
            return Ok(());
        }
        if let Err(e) = self.recorder.start() {
            tracing::error!(error = %e, "failed to start recording");
            return Ok(());
        }
        self.recording = true;

        send_envelope(sink, &ClientEnvelope::RecordingStart).await
    }

    async fn release<S>(&mut self, sink: &mut S) -> Result<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        if !self.recording {
            return Ok(());
        }
        self.recording = false;

        let clip = match self.recorder.stop() {
            Ok(clip) => clip,
            Err(e) => {
                tracing::error!(error = %e, "failed to read recording");
                return Ok(());
            }
        };
        self.controller.recording_stopped();

        let bytes = clip.data.len();
        send_envelope(
            sink,
            &ClientEnvelope::AudioComplete {
                data: STANDARD.encode(&clip.data),
                format: Some(clip.format.extension().to_string()),
                timestamp: Some(Utc::now().timestamp_millis()),
            },
        )
        .await?;

        self.emit(ClientEvent::Sent { bytes });
        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        let envelope = match protocol::decode_server(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring relay envelope");
                return;
            }
        };

        match self.controller.on_envelope(envelope) {
            Reaction::Notify(event) => self.emit(event),
            Reaction::Play(audio) => self.play(&audio),
            Reaction::Nothing => {}
        }
    }

    fn play(&mut self, audio: &[u8]) {
        if audio.is_empty() {
            tracing::debug!("reply had no audio");
            return;
        }

        let file = match persist_reply(audio) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(error = %e, "failed to write reply audio");
                return;
            }
        };

        let latency = self.controller.playback_started();
        if let Some(latency) = latency {
            tracing::info!(latency_ms = latency.as_millis(), "round trip");
        }
        self.emit(ClientEvent::Playing {
            bytes: audio.len(),
            latency,
        });

        if let Err(e) = self.replies.try_send(file) {
            tracing::warn!(error = %e, "dropping reply, playback queue unavailable");
        }
    }

    fn stop_recording_silently(&mut self) {
        if self.recording {
            self.recording = false;
            let _ = self.recorder.stop();
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// Play queued replies one at a time; each file is removed once played
fn spawn_player<P: Player + 'static>(mut player: P) -> mpsc::Sender<NamedTempFile> {
    let (tx, mut rx) = mpsc::channel::<NamedTempFile>(PLAYBACK_QUEUE);
    tokio::spawn(async move {
        while let Some(file) = rx.recv().await {
            if let Err(e) = player.play(file.path()).await {
                tracing::error!(error = %e, "playback failed");
            }
        }
    });
    tx
}

async fn send_envelope<S>(sink: &mut S, envelope: &ClientEnvelope) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = protocol::encode(envelope)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::providers::{AudioClip, AudioFormat};

    struct NoMic;

    impl Recorder for NoMic {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<AudioClip> {
            Ok(AudioClip {
                data: vec![1, 2, 3],
                format: AudioFormat::Wav,
            })
        }
    }

    #[derive(Clone, Default)]
    struct Silent(Arc<Mutex<usize>>);

    #[async_trait]
    impl Player for Silent {
        async fn play(&mut self, _path: &Path) -> Result<()> {
            if let Ok(mut n) = self.0.lock() {
                *n += 1;
            }
            Ok(())
        }
    }

    struct BrokenMic;

    impl Recorder for BrokenMic {
        fn start(&mut self) -> Result<()> {
            Err(Error::Audio("no input device available".to_string()))
        }

        fn stop(&mut self) -> Result<AudioClip> {
            Err(Error::Audio("not recording".to_string()))
        }
    }

    fn client<R: Recorder>(recorder: R) -> TalkClient<R> {
        let (events_tx, _events) = mpsc::unbounded_channel();
        TalkClient::new(
            "ws://127.0.0.1:1",
            ReconnectPolicy::default(),
            recorder,
            Silent::default(),
            events_tx,
        )
    }

    #[tokio::test]
    async fn press_announces_recording_once_mic_is_live() {
        let (mut sink, sent) = futures::channel::mpsc::unbounded::<Message>();
        let mut client = client(NoMic);

        client.press(&mut sink).await.unwrap();
        client.press(&mut sink).await.unwrap();
        drop(sink);

        let frames: Vec<Message> = sent.collect().await;
        assert_eq!(frames.len(), 1);
        let Message::Text(text) = &frames[0] else {
            panic!("expected text frame");
        };
        assert_eq!(text.as_str(), r#"{"type":"recording_start"}"#);
        assert!(client.recording);
    }

    #[tokio::test]
    async fn failed_mic_sends_nothing() {
        let (mut sink, mut sent) = futures::channel::mpsc::unbounded::<Message>();
        let mut client = client(BrokenMic);

        client.press(&mut sink).await.unwrap();
        client.release(&mut sink).await.unwrap();
        drop(sink);

        assert!(sent.next().await.is_none());
        assert!(!client.recording);
    }

    #[tokio::test]
    async fn unreachable_relay_exhausts_retries() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 2,
        };
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (_commands_tx, commands) = mpsc::channel(1);

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("ws://127.0.0.1:{port}");
        let client = TalkClient::new(url, policy, NoMic, Silent::default(), events_tx);
        let result = client.run(commands).await;

        assert!(matches!(result, Err(Error::ReconnectExhausted(2))));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.last(), Some(&ClientEvent::GaveUp { attempts: 2 }));
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, ClientEvent::Retrying { .. }))
                .count(),
            2
        );
    }
}
