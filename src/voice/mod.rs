//! Voice processing module
//!
//! Handles microphone capture, realtime transcription, speech synthesis,
//! and playback.

mod capture;
mod feedback;
mod playback;
mod resample;
mod transcriber;
mod tts;

pub use capture::{MicrophoneStream, SAMPLE_RATE, downmix, to_pcm16_le};
pub use feedback::{Speaker, SpeechFeedback};
pub use playback::{AudioPlayback, DecodedAudio, decode_mp3};
pub use resample::{StreamResampler, resample};
pub use transcriber::{
    DEFAULT_REALTIME_URL, RealtimeTranscriber, ServerMessage, TranscriptEvent, TranscriptKind,
    UTTERANCE_QUEUE_DEPTH, forward_utterance, parse_message,
};
pub use tts::{Synthesizer, TextToSpeech, split_for_tts};
