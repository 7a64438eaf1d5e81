use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use aura_relay::client::{ClientEvent, Command as TalkCommand, TalkClient};
use aura_relay::voice::{AudioCapture, AudioPlayback};
use aura_relay::{ApiServer, Config, Relay};

/// Aura - real-time voice conversation relay
#[derive(Parser)]
#[command(name = "aura", version, about)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(short, long, env = "AURA_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the relay server (default)
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Talk to a relay using push-to-talk on Enter
    Talk {
        /// Relay URL, e.g. ws://localhost:5000
        #[arg(long)]
        url: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,aura_relay=info",
        1 => "info,aura_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_from(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(config, port).await,
        Command::Talk { url } => talk(config, url).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);
    tracing::info!(
        port,
        stt = ?config.stt.provider,
        llm = %config.llm.model,
        tts = ?config.tts.provider,
        "starting aura relay"
    );

    let relay = Relay::from_config(&config)?;
    let server = ApiServer::new(relay, config.server.host.clone(), port);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

#[allow(clippy::future_not_send)]
async fn talk(config: Config, url: Option<String>) -> anyhow::Result<()> {
    let url = url.unwrap_or(config.client.server_url);
    let recorder = AudioCapture::new()?;
    let player = AudioPlayback::new()?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (commands_tx, commands) = mpsc::channel(8);

    println!("Press Enter to start talking, Enter again to send. Type q to quit.\n");

    // stdin is blocking; read it on its own thread
    std::thread::spawn(move || {
        let mut talking = false;
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            let command = if line.trim().eq_ignore_ascii_case("q") {
                TalkCommand::Quit
            } else if talking {
                TalkCommand::Release
            } else {
                TalkCommand::Press
            };
            talking = command == TalkCommand::Press;
            if commands_tx.blocking_send(command).is_err() || command == TalkCommand::Quit {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let client = TalkClient::new(url, config.client.reconnect, recorder, player, events_tx);
    client.run(commands).await?;
    Ok(())
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::State(state) => println!("[{state}]"),
        ClientEvent::Ready(message) => println!("relay: {message}"),
        ClientEvent::Recording { .. } => println!("Recording... press Enter to send"),
        ClientEvent::Sent { bytes } => println!("Sent {bytes} bytes, waiting for reply"),
        ClientEvent::Transcript(text) => println!("you:  {text}"),
        ClientEvent::Reply(text) => println!("aura: {text}"),
        ClientEvent::Playing { latency, .. } => {
            if let Some(latency) = latency {
                println!("(round trip {} ms)", latency.as_millis());
            }
        }
        ClientEvent::TurnFailed { code, message } => println!("turn failed ({code}): {message}"),
        ClientEvent::Retrying { attempt, delay } => {
            println!("Reconnecting in {:.1}s (attempt {attempt})", delay.as_secs_f32());
        }
        ClientEvent::GaveUp { attempts } => {
            println!("\x07Could not reach the relay after {attempts} attempts. Giving up.");
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", aura_relay::voice::SAMPLE_RATE);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If the meter moved, your mic is working.");
    println!("If RMS stayed near 0, check your default input device.");

    Ok(())
}

/// Root-mean-square energy of a block of samples
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Test speaker output
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;
    let sample_rate = playback.sample_rate();
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    playback.play_samples(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working.");

    Ok(())
}
