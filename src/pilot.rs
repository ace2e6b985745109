//! Wiring and the main run loop
//!
//! [`PilotContext`] is built once at startup from a [`Config`] and a set of
//! [`Collaborators`]. [`Pilot::run`] starts the background tasks, drives the
//! dialogue loop until interrupted, and hands teardown to the
//! [`ShutdownCoordinator`].

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::{mpsc, watch};

use crate::Result;
use crate::agent::{AgentBridge, ConversationSession, LanguageModel, persona};
use crate::camera::{DisplayState, FfmpegFrameSource, FrameStore, run_capture_loop, serve_display};
use crate::commands::{CommandExecutor, default_registry};
use crate::config::Config;
use crate::drone::{ActuatorController, DroneLink, SimulatedDrone, TelloLink};
use crate::gemini::GeminiClient;
use crate::safety::{OpenWeatherClient, SafetyGate, WeatherSource};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport, signalled};
use crate::vision::{Captioner, VisionQuery};
use crate::voice::{
    AudioPlayback, MicrophoneStream, RealtimeTranscriber, Speaker, SpeechFeedback, Synthesizer,
    TextToSpeech, UTTERANCE_QUEUE_DEPTH,
};

/// Microphone chunks buffered ahead of the websocket (100 ms each)
const AUDIO_QUEUE_DEPTH: usize = 64;

/// ElevenLabs voice used when that provider is configured
const ELEVENLABS_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// `OpenAI` voice used when that provider is configured
const OPENAI_VOICE: &str = "alloy";

/// External services the pilot talks to
pub struct Collaborators {
    pub link: Arc<dyn DroneLink>,
    pub model: Arc<dyn LanguageModel>,
    pub captioner: Arc<dyn Captioner>,
    pub weather: Arc<dyn WeatherSource>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub speaker: Arc<dyn Speaker>,
}

impl Collaborators {
    /// Build the real collaborators described by `config`
    ///
    /// With `simulate` the drone link is a [`SimulatedDrone`]; every other
    /// service is still real.
    ///
    /// # Errors
    ///
    /// Returns error if a required key is missing or a device cannot be opened
    pub async fn from_config(config: &Config, simulate: bool) -> Result<Self> {
        let link: Arc<dyn DroneLink> = if simulate {
            tracing::info!("using simulated drone");
            Arc::new(SimulatedDrone::new())
        } else {
            Arc::new(TelloLink::bind(&config.tello_addr).await?)
        };

        let google_key = config.require_google_key()?;
        let model = GeminiClient::new(google_key, config.llm_model.clone())?;
        let captioner = GeminiClient::new(config.require_google_key()?, config.vision_model.clone())?;

        let (latitude, longitude) = config.require_location()?;
        let weather = OpenWeatherClient::new(config.require_openweather_key()?, latitude, longitude)?;

        Ok(Self {
            link,
            model: Arc::new(model),
            captioner: Arc::new(captioner),
            weather: Arc::new(weather),
            synthesizer: Arc::new(text_to_speech(config)?),
            speaker: Arc::new(AudioPlayback::new()?),
        })
    }
}

/// Pick a speech provider: ElevenLabs, then `OpenAI`, then the keyless
/// Google voice
///
/// # Errors
///
/// Returns error if a configured provider rejects its key
pub fn text_to_speech(config: &Config) -> Result<TextToSpeech> {
    let tts = if let Some(key) = &config.elevenlabs_api_key {
        TextToSpeech::new_elevenlabs(
            key.expose_secret().to_owned().into(),
            ELEVENLABS_VOICE_ID.to_string(),
        )?
    } else if let Some(key) = &config.openai_api_key {
        TextToSpeech::new_openai(key.expose_secret().to_owned().into(), OPENAI_VOICE.to_string(), 1.0)?
    } else {
        TextToSpeech::new_google(config.tts_lang.clone())
    };

    tracing::debug!(provider = tts.provider_name(), "speech provider selected");
    Ok(tts)
}

/// Everything the run loop needs, built once at startup
pub struct PilotContext {
    pub config: Config,
    pub controller: Arc<ActuatorController>,
    pub frames: Arc<FrameStore>,
    pub safety: Arc<SafetyGate>,
    pub vision: Arc<VisionQuery>,
    pub bridge: AgentBridge,
    pub feedback: SpeechFeedback,
}

impl PilotContext {
    /// Assemble the components around `collaborators`
    ///
    /// # Errors
    ///
    /// Returns error if the work directory cannot be created or the command
    /// registry is invalid
    pub fn assemble(config: Config, collaborators: Collaborators) -> Result<Self> {
        std::fs::create_dir_all(&config.work_dir)?;

        let controller = Arc::new(ActuatorController::new(collaborators.link));
        let frames = Arc::new(FrameStore::new(config.snapshot_path()));
        let safety = Arc::new(SafetyGate::new(collaborators.weather));
        let vision = Arc::new(VisionQuery::new(Arc::clone(&frames), collaborators.captioner));

        let registry = default_registry(config.move_default_cm)?;
        let session = ConversationSession::new(persona(&config.operator_name, &registry.names()));
        let executor = CommandExecutor::new(
            Arc::clone(&controller),
            Arc::clone(&safety),
            Arc::clone(&vision),
        );
        let bridge = AgentBridge::new(collaborators.model, registry, executor, session);

        let feedback = SpeechFeedback::new(
            collaborators.synthesizer,
            collaborators.speaker,
            config.audio_path(),
        );

        tracing::debug!(
            session_id = %bridge.session().id(),
            work_dir = %config.work_dir.display(),
            "pilot assembled"
        );

        Ok(Self {
            config,
            controller,
            frames,
            safety,
            vision,
            bridge,
            feedback,
        })
    }

    /// A shutdown coordinator for this context's drone and artifacts
    #[must_use]
    pub fn coordinator(&self, signal: watch::Sender<bool>) -> ShutdownCoordinator {
        ShutdownCoordinator::new(
            Arc::clone(&self.controller),
            signal,
            self.config.snapshot_path(),
            self.config.audio_path(),
        )
    }
}

/// Which optional parts of the run to start
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Pull frames from the drone's video feed
    pub capture_frames: bool,
    /// Serve the camera viewer on localhost
    pub show_display: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            capture_frames: true,
            show_display: true,
        }
    }
}

/// Resolve each finalized utterance and speak the reply, one at a time
///
/// Returns the number of utterances handled once shutdown is signalled,
/// `interrupt` resolves, or the utterance channel closes. A reply is spoken
/// to completion before the next utterance is taken. Speech failures are
/// logged and the loop carries on.
pub async fn run_dialogue<F>(
    bridge: &mut AgentBridge,
    feedback: &SpeechFeedback,
    utterances: &mut mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
    interrupt: F,
) -> usize
where
    F: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    let mut handled = 0;

    loop {
        let utterance = tokio::select! {
            () = signalled(&mut shutdown) => break,
            () = &mut interrupt => {
                tracing::info!("interrupted");
                break;
            }
            utterance = utterances.recv() => match utterance {
                Some(utterance) => utterance,
                None => {
                    tracing::warn!("transcription ended");
                    break;
                }
            },
        };

        tracing::info!(utterance = %utterance, "heard");

        let turn = async {
            let reply = bridge.handle(&utterance).await;
            tracing::info!(reply = %reply.text, commands = reply.executed.len(), "replying");
            if let Err(e) = feedback.speak(&reply.text).await {
                tracing::error!(error = %e, "failed to speak reply");
            }
        };

        tokio::select! {
            () = turn => handled += 1,
            () = &mut interrupt => {
                tracing::info!("interrupted mid-turn");
                break;
            }
        }
    }

    handled
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// The voice pilot
pub struct Pilot {
    context: PilotContext,
    options: RunOptions,
}

impl Pilot {
    #[must_use]
    pub const fn new(context: PilotContext, options: RunOptions) -> Self {
        Self { context, options }
    }

    /// Fly by voice until interrupted, then tear everything down
    ///
    /// # Errors
    ///
    /// Returns error if the drone, the transcription key, or the microphone
    /// is unavailable at startup. Failures after startup end the run and
    /// are reported in the returned [`ShutdownReport`].
    pub async fn run(self) -> Result<ShutdownReport> {
        let Self {
            mut context,
            options,
        } = self;

        let transcriber = RealtimeTranscriber::new(context.config.require_assemblyai_key()?)
            .with_url(context.config.realtime_url.clone());

        let status = context.controller.connect().await?;
        tracing::info!(%status, "drone connected");

        let (signal, shutdown) = watch::channel(false);
        let mut coordinator = context.coordinator(signal);

        if options.capture_frames {
            coordinator.set_capture(tokio::spawn(run_capture_loop(
                FfmpegFrameSource::default(),
                Arc::clone(&context.frames),
                context.config.capture_interval,
                shutdown.clone(),
            )));
        }

        if options.show_display {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, context.config.display_port));
            let state = DisplayState {
                frames: Arc::clone(&context.frames),
                controller: Arc::clone(&context.controller),
            };
            let display_shutdown = shutdown.clone();
            coordinator.set_display(tokio::spawn(async move {
                if let Err(e) = serve_display(addr, state, display_shutdown).await {
                    tracing::error!(error = %e, "camera viewer failed");
                }
            }));
        }

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let (utterance_tx, mut utterance_rx) = mpsc::channel(UTTERANCE_QUEUE_DEPTH);

        let transcription_shutdown = shutdown.clone();
        coordinator.set_transcription(tokio::spawn(async move {
            if let Err(e) = transcriber
                .run(audio_rx, utterance_tx, transcription_shutdown)
                .await
            {
                tracing::error!(error = %e, "transcription failed");
            }
        }));

        let microphone = match MicrophoneStream::spawn(audio_tx, shutdown.clone()) {
            Ok(microphone) => microphone,
            Err(e) => {
                tracing::error!(error = %e, "microphone unavailable");
                let _ = coordinator.shutdown().await;
                return Err(e);
            }
        };

        tracing::info!(operator = %context.config.operator_name, "listening");

        let handled = run_dialogue(
            &mut context.bridge,
            &context.feedback,
            &mut utterance_rx,
            shutdown,
            ctrl_c(),
        )
        .await;
        tracing::info!(turns = handled, "dialogue ended");

        let report = coordinator.shutdown().await;

        if tokio::task::spawn_blocking(move || microphone.join())
            .await
            .is_err()
        {
            tracing::warn!("failed to join microphone thread");
        }

        Ok(report)
    }
}
