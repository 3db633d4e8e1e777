use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiosk_concierge::db::{self, CustomerRepo};
use kiosk_concierge::session::TurnKind;
use kiosk_concierge::store::CustomerStore;
use kiosk_concierge::turn::{ResponseService, TurnExecutor, TurnOutcome, TurnRequest, WebhookClient};
use kiosk_concierge::voice::{AudioCapture, AudioClip, AudioPlayback, energy};
use kiosk_concierge::{Config, Daemon};

/// Concierge - face-aware kiosk assistant orchestrator
#[derive(Parser)]
#[command(name = "concierge", version, about)]
struct Cli {
    /// Port for the HTTP API
    #[arg(long, env = "CONCIERGE_API_PORT")]
    port: Option<u16>,

    /// Disable the camera (speech-only kiosk)
    #[arg(long, env = "CONCIERGE_DISABLE_CAMERA")]
    disable_camera: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// List known customers
    Customers,
    /// Send one utterance to the response service and play the reply
    Ask {
        /// Text to send
        text: String,
        /// Print the reply without playing audio
        #[arg(long)]
        silent: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,kiosk_concierge=info",
        1 => "info,kiosk_concierge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    if cli.disable_camera {
        config.camera.enabled = false;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Customers => list_customers(&config),
            Command::Ask { text, silent } => ask(&config, text, silent).await,
        };
    }

    tracing::info!(
        port = config.api_server.port,
        camera = config.camera.enabled,
        speech = config.speech.enabled,
        language = %config.speech.language,
        "starting kiosk concierge"
    );
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;
    daemon.run().await?;

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let rms = energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (rms * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {rms:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (std::f32::consts::TAU * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    playback
        .play_to_end(AudioClip::new(samples, sample_rate))
        .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Print the customer table
fn list_customers(config: &Config) -> anyhow::Result<()> {
    let path = config.db_path();
    if !path.exists() {
        println!("No customer database at {}", path.display());
        return Ok(());
    }

    let repo = CustomerRepo::new(db::init(&path)?);
    let mut records = repo.load_all()?;
    records.sort_by_key(|r| std::cmp::Reverse(r.last_seen_at()));

    if records.is_empty() {
        println!("No customers recorded");
        return Ok(());
    }

    println!("{:<28} {:<26} TURNS", "ID", "LAST SEEN");
    for record in &records {
        println!(
            "{:<28} {:<26} {}",
            record.id(),
            record.last_seen_at().format("%Y-%m-%d %H:%M:%S UTC"),
            record.conversations().len()
        );
    }

    Ok(())
}

/// One-off round trip through the response service
async fn ask(config: &Config, text: String, silent: bool) -> anyhow::Result<()> {
    let url = config
        .response
        .webhook_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("CONCIERGE_WEBHOOK_URL is not set"))?;
    let service: Arc<dyn ResponseService> =
        Arc::new(WebhookClient::new(url, config.response.api_key.clone())?);
    let executor = TurnExecutor::new(service, config.response.timeout, config.texts.clone());

    let request = TurnRequest::for_turn(
        &TurnKind::Speech(text),
        None,
        false,
        &config.texts,
        0,
        Utc::now(),
    );

    match executor.execute(&request).await {
        TurnOutcome::Spoken { text, clip } => {
            println!("{text}");
            if !silent && !clip.is_empty() {
                AudioPlayback::new()?.play_to_end(clip).await?;
            }
        }
        TurnOutcome::Fallback { text } => {
            println!("{text}");
            anyhow::bail!("response service failed, fallback text shown");
        }
    }

    Ok(())
}
