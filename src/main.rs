use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wordy_voice::daemon;
use wordy_voice::db::WordRepo;
use wordy_voice::voice::{
    AudioPlayback, AudioSession, MicrophoneTap, PLAYBACK_SAMPLE_RATE, SAMPLE_RATE,
    calculate_energy, tone,
};
use wordy_voice::{Config, Daemon, DictionaryLookup, WordRecord, WordStore};

/// Wordy - a hands-free spoken dictionary
#[derive(Parser)]
#[command(name = "wordy", version, about)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "WORDY_CONFIG")]
    config: Option<PathBuf>,

    /// Port for the HTTP API (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Start with wake word mode off; conversations start from the API only
    #[arg(long)]
    no_wake_word: bool,

    /// Do not serve the HTTP API
    #[arg(long)]
    no_api: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak each argument in turn through the synthesis queue
    Say {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Look up a word without speaking
    Define {
        word: String,
        /// Do not add the word to history
        #[arg(long)]
        no_save: bool,
    },
    /// List looked-up words, newest first
    Words {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Mark a word as reviewed
    Review { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,wordy_voice=info",
        1 => "info,wordy_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Say { text } => say(cli.config.as_deref(), &text).await,
            Command::Define { word, no_save } => {
                define(cli.config.as_deref(), &word, !no_save).await
            }
            Command::Words { limit } => list_words(cli.config.as_deref(), limit),
            Command::Review { id } => review(cli.config.as_deref(), &id),
        };
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.no_wake_word {
        config.wake.enabled = false;
    }
    if cli.no_api {
        config.api_server.enabled = false;
    }
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    let phrase = config.wake.phrases.first().cloned().unwrap_or_default();
    let wake_enabled = config.wake.enabled;

    let daemon = Daemon::new(config)?;
    if wake_enabled {
        tracing::info!("wordy ready - say \"{phrase}\"");
    } else {
        tracing::info!("wordy ready (wake word off)");
    }

    daemon.run().await?;
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tap, mut chunks) = MicrophoneTap::open()?;
    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, chunks.recv()).await {
            samples.extend(chunk);
        }

        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    tap.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;
    let samples = tone(440.0, Duration::from_secs(2), 0.3);
    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    tokio::task::spawn_blocking(move || playback.play_blocking(samples, &AtomicBool::new(false)))
        .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Speak a sequence of texts and wait for it to finish
async fn say(config_path: Option<&std::path::Path>, texts: &[String]) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let queue = daemon::synthesis_queue(&config, AudioSession::new())?;

    queue
        .speak_sequence_and_wait(
            texts,
            config.conversation.speech_rate,
            config.conversation.sequence_pause,
        )
        .await?;

    Ok(())
}

/// Look up a word and print its definition
async fn define(
    config_path: Option<&std::path::Path>,
    word: &str,
    save: bool,
) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let dictionary = daemon::dictionary(&config)?;

    let definition = dictionary.lookup(word).await?;
    println!("{word}: {definition}");

    if save {
        let repo = Arc::new(WordRepo::new(daemon::open_database(&config)?));
        let record = WordRecord::new(word.trim().to_lowercase(), definition);
        tokio::task::spawn_blocking(move || repo.save(&record)).await??;
    }

    Ok(())
}

/// Print stored words
fn list_words(config_path: Option<&std::path::Path>, limit: usize) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let repo = WordRepo::new(daemon::open_database(&config)?);

    let words = repo.list(limit)?;
    if words.is_empty() {
        println!("No words yet.");
        return Ok(());
    }

    for record in words {
        println!(
            "{}  {:<20} reviewed {}x  {}",
            record.id, record.word, record.review_count, record.definition
        );
    }
    println!("\n{} total", repo.count()?);

    Ok(())
}

/// Record a review of a stored word
fn review(config_path: Option<&std::path::Path>, id: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let repo = WordRepo::new(daemon::open_database(&config)?);

    let record = repo.record_review(id)?;
    println!(
        "{}: reviewed {} time(s)",
        record.word, record.review_count
    );

    Ok(())
}
