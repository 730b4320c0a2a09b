use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use salin::voice::{
    AudioBuffer, CaptureStream, PlaybackScheduler, SpeakerOutput, rms, samples_to_wav,
};
use salin::{Assistant, Config, CpalDevices, LiveConnector, SessionStatus, Speaker};

/// Salin - voice-driven bilingual translation assistant
#[derive(Parser)]
#[command(name = "salin", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant until interrupted (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the captured audio as a WAV file
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,salin=info",
        1 => "info,salin=debug",
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
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_assistant().await,
        Command::TestMic { duration, save } => test_mic(duration, save).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Config => show_config(),
    }
}

/// Run a session, printing status changes and transcript entries
async fn run_assistant() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    if config.api_key.is_none() {
        anyhow::bail!(
            "no API key configured; set GEMINI_API_KEY or add api_key to the config file"
        );
    }

    let connector = Arc::new(LiveConnector::from_config(&config));
    let assistant = Assistant::new(config.clone(), connector, Arc::new(CpalDevices));
    let mut state_rx = assistant.subscribe();

    assistant.start().await?;
    tracing::info!(
        "salin ready - say \"{}\" to start translating",
        config.wake.wake_phrases.first().map_or("", String::as_str)
    );

    let mut last_status = SessionStatus::Idle;
    let mut last_awake = false;
    let mut printed = 0;

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break Ok(());
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }

                let state = state_rx.borrow_and_update().clone();

                if state.status != last_status || state.is_awake != last_awake {
                    println!("[{}]", state.status.label(state.is_awake));
                    last_status = state.status;
                    last_awake = state.is_awake;
                }

                for entry in state.history.iter().skip(printed) {
                    let who = match entry.speaker {
                        Speaker::User => "you",
                        Speaker::Model => "salin",
                    };
                    println!("{} {who:>5}: {}", entry.timestamp.format("%H:%M:%S"), entry.text);
                }
                printed = state.history.len();

                match state.status {
                    SessionStatus::Error => {
                        break Err(anyhow::anyhow!("session ended with an error"));
                    }
                    SessionStatus::Idle => {
                        tracing::info!("session closed");
                        break Ok(());
                    }
                    SessionStatus::Connecting | SessionStatus::Connected => {}
                }
            }
        }
    };

    assistant.stop().await;
    result
}

/// Test microphone input
async fn test_mic(duration: u64, save: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let sample_rate = salin::voice::CAPTURE_SAMPLE_RATE;
    let mut capture = CaptureStream::open_default(sample_rate, salin::voice::FRAME_SIZE).await?;

    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recorded = Vec::new();

    for i in 0..duration {
        let mut second = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);

        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, capture.next_frame()).await {
            second.extend(frame);
        }

        let energy = rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
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

        if save.is_some() {
            recorded.extend(second);
        }
    }

    drop(capture);

    if let Some(path) = save {
        let wav = samples_to_wav(&recorded, sample_rate)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave, scheduled as two back-to-back chunks
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear an unbroken 440Hz tone for 2 seconds\n");

    let sample_rate = salin::voice::PLAYBACK_SAMPLE_RATE;
    let (completions_tx, mut completions) = mpsc::unbounded_channel();
    let sink = SpeakerOutput::open_default(sample_rate, completions_tx).await?;
    let mut scheduler = PlaybackScheduler::new(Box::new(sink));

    // Generate 2 seconds of 440Hz sine wave, split in two chunks
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let (first, second) = samples.split_at(num_samples / 2);
    for chunk in [first, second] {
        let handle = scheduler.schedule(AudioBuffer::new(chunk.to_vec(), sample_rate, 1)?)?;
        println!(
            "Scheduled chunk {} at {:.3}s for {:.3}s",
            handle.id, handle.start_time, handle.duration
        );
    }

    let wait = Duration::from_secs_f64(scheduler.next_playback_time() + 1.0);
    let _ = tokio::time::timeout(wait, async {
        while scheduler.is_speaking() {
            match completions.recv().await {
                Some(id) => {
                    scheduler.complete(id);
                }
                None => break,
            }
        }
    })
    .await;

    scheduler.close();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Print the resolved configuration with the API key redacted
fn show_config() -> anyhow::Result<()> {
    let config = Config::load()?;

    let key = if config.api_key.is_some() { "[REDACTED]" } else { "(not set)" };

    println!(
        "config file:     {}",
        salin::config::file::config_file_path()
            .map_or("(none)".to_string(), |p| p.display().to_string())
    );
    println!("api key:         {key}");
    println!("endpoint:        {}", config.endpoint);
    println!("model:           {}", config.session.model);
    println!("voice:           {}", config.session.voice);
    println!("wake phrases:    {}", config.wake.wake_phrases.join(", "));
    println!("sleep phrases:   {}", config.wake.sleep_phrases.join(", "));
    println!(
        "audio:           capture {} Hz, playback {} Hz, frame {} samples",
        config.audio.capture_sample_rate, config.audio.playback_sample_rate, config.audio.frame_size
    );
    println!("\nsystem instruction:\n{}", config.session.system_instruction);

    Ok(())
}
