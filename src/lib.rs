//! Voice Pilot - fly a small quadcopter by talking to it
//!
//! This library provides the core of the voice pilot:
//! - Drone actuation with a guarded flight-state machine
//! - Camera frame capture, a live viewer, and scene description
//! - A fixed command vocabulary exposed to a function-calling model
//! - Realtime transcription in, synthesized speech out
//! - Pre-flight weather checks and ordered shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  utterances  ┌──────────────────┐  commands  ┌──────────────────┐
//! │  Microphone  │─────────────▶│   AgentBridge    │───────────▶│ActuatorController│
//! │ Transcriber  │              │ (Gemini + tools) │            │   (Tello / sim)  │
//! └──────────────┘              └────────┬─────────┘            └──────────────────┘
//!                                        │ reply                         ▲
//! ┌──────────────┐   snapshot   ┌────────▼─────────┐                     │
//! │ Frame capture│─────────────▶│  SpeechFeedback  │        ShutdownCoordinator
//! │  + viewer    │  FrameStore  │   (TTS + play)   │        (land, stop, clean up)
//! └──────────────┘              └──────────────────┘
//! ```

pub mod agent;
pub mod camera;
pub mod commands;
pub mod config;
pub mod drone;
pub mod error;
pub mod gemini;
pub mod pilot;
pub mod safety;
pub mod shutdown;
pub mod vision;
pub mod voice;

pub use agent::{AgentBridge, AgentReply, ConversationSession, LanguageModel};
pub use camera::{Frame, FrameStore};
pub use commands::{Command, CommandRegistry, CommandSpec, default_registry};
pub use config::Config;
pub use drone::{ActuatorController, FlightState};
pub use error::{Error, Result};
pub use pilot::{Collaborators, Pilot, PilotContext, RunOptions, run_dialogue};
pub use safety::{SafetyGate, SafetyVerdict};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use vision::VisionQuery;
pub use voice::SpeechFeedback;
