use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voice_pilot::camera::remove_if_present;
use voice_pilot::drone::{DroneLink, SimulatedDrone, TelloLink};
use voice_pilot::gemini::GeminiClient;
use voice_pilot::pilot::text_to_speech;
use voice_pilot::safety::OpenWeatherClient;
use voice_pilot::vision::{Captioner, DEFAULT_INSTRUCTION};
use voice_pilot::voice::AudioPlayback;
use voice_pilot::{
    ActuatorController, Collaborators, Config, Pilot, PilotContext, RunOptions, SafetyGate,
    SpeechFeedback,
};

/// Voice Pilot - fly a Tello drone by talking to it
#[derive(Parser)]
#[command(name = "voice-pilot", version, about)]
struct Cli {
    /// Use an in-process drone instead of the Tello
    #[arg(long, global = true, env = "PILOT_SIMULATE")]
    simulate: bool,

    /// Don't serve the camera viewer
    #[arg(long, global = true)]
    no_display: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fly by voice (the default)
    Run,
    /// Check whether the weather is safe for flying
    CheckWeather,
    /// Describe a JPEG image with the vision model
    Describe {
        /// Image to describe
        image: PathBuf,
        /// What to ask about the image
        #[arg(short, long)]
        instruction: Option<String>,
    },
    /// Speak text through the configured voice
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! Voice pilot is ready to fly.")]
        text: String,
    },
    /// Connect to the drone and report its battery
    Battery,
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_pilot=info",
        1 => "info,voice_pilot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => fly(config, cli.simulate, !cli.no_display).await,
        Command::CheckWeather => check_weather(&config).await,
        Command::Describe { image, instruction } => {
            describe(&config, &image, instruction.as_deref()).await
        }
        Command::Say { text } => say(&config, &text).await,
        Command::Battery => battery(&config, cli.simulate).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Fly by voice until interrupted
async fn fly(config: Config, simulate: bool, show_display: bool) -> anyhow::Result<()> {
    tracing::info!(simulate, show_display, "starting voice pilot");

    let collaborators = Collaborators::from_config(&config, simulate).await?;
    let context = PilotContext::assemble(config, collaborators)?;
    let options = RunOptions {
        // The simulated drone has no video feed
        capture_frames: !simulate,
        show_display,
    };

    let report = Pilot::new(context, options).run().await?;
    for failure in report.failures() {
        tracing::warn!(step = ?failure.step, result = ?failure.result, "teardown step failed");
    }

    Ok(())
}

/// Print the current flying conditions
async fn check_weather(config: &Config) -> anyhow::Result<()> {
    let (latitude, longitude) = config.require_location()?;
    let client = OpenWeatherClient::new(config.require_openweather_key()?, latitude, longitude)?;
    let verdict = SafetyGate::new(Arc::new(client)).check().await?;

    println!("{}", verdict.explanation);
    println!(
        "  {} (code {}), {:.1} °C, wind {:.1} m/s",
        verdict.description, verdict.condition_code, verdict.temperature, verdict.wind_speed
    );

    if !verdict.is_safe {
        anyhow::bail!("not safe to fly");
    }
    Ok(())
}

/// Caption an image file
async fn describe(config: &Config, image: &Path, instruction: Option<&str>) -> anyhow::Result<()> {
    let jpeg = tokio::fs::read(image).await?;
    let client = GeminiClient::new(config.require_google_key()?, config.vision_model.clone())?;

    let caption = client
        .caption(&jpeg, instruction.unwrap_or(DEFAULT_INSTRUCTION))
        .await?;
    println!("{caption}");
    Ok(())
}

/// Synthesize and play `text`
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.work_dir)?;

    let feedback = SpeechFeedback::new(
        Arc::new(text_to_speech(config)?),
        Arc::new(AudioPlayback::new()?),
        config.audio_path(),
    );
    let spoken = feedback.speak(text).await;
    remove_if_present(feedback.audio_path())?;

    spoken?;
    Ok(())
}

/// Report drone battery and flight state
async fn battery(config: &Config, simulate: bool) -> anyhow::Result<()> {
    let link: Arc<dyn DroneLink> = if simulate {
        Arc::new(SimulatedDrone::new())
    } else {
        Arc::new(TelloLink::bind(&config.tello_addr).await?)
    };

    let status = ActuatorController::new(link).connect().await?;
    println!("The drone is {status}.");
    Ok(())
}

/// Test speaker output with a sine wave
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
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    tokio::task::spawn_blocking(move || playback.play_samples_blocking(samples)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
