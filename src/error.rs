//! Error types for voice-pilot

use thiserror::Error;

use crate::drone::FlightState;

/// Result type alias for voice-pilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voice-pilot
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The drone rejected or failed to acknowledge a command
    #[error("drone error: {0}")]
    Actuator(String),

    /// Command issued in the wrong flight state
    #[error("cannot {command} while {state}")]
    FlightState {
        /// Command that was rejected
        command: String,
        /// State the drone was in
        state: FlightState,
    },

    /// Command name or arguments rejected by the registry
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Camera frame acquisition error
    #[error("camera error: {0}")]
    Camera(String),

    /// No frame has been published yet
    #[error("no camera frame available")]
    NoFrame,

    /// Weather lookup error
    #[error("weather error: {0}")]
    Weather(String),

    /// Vision API error
    #[error("vision error: {0}")]
    Vision(String),

    /// Language model error
    #[error("agent error: {0}")]
    Agent(String),

    /// Realtime transcription error
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
