//! Spoken replies

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::Synthesizer;
use crate::Result;
use crate::camera::persist_atomically;

/// Something that plays an MP3 clip to completion
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Play `audio`, returning once it has finished
    async fn play(&self, audio: &[u8]) -> Result<()>;
}

/// Renders reply text to audio and plays it
pub struct SpeechFeedback {
    synthesizer: Arc<dyn Synthesizer>,
    speaker: Arc<dyn Speaker>,
    audio_path: PathBuf,
}

impl SpeechFeedback {
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        speaker: Arc<dyn Speaker>,
        audio_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            synthesizer,
            speaker,
            audio_path: audio_path.into(),
        }
    }

    /// Where the latest synthesized clip is kept
    #[must_use]
    pub fn audio_path(&self) -> &Path {
        &self.audio_path
    }

    /// Speak `text`, returning only after playback finishes
    ///
    /// Blank text is skipped. The clip replaces the previous one on disk.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis, the clip write, or playback fails
    pub async fn speak(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("nothing to say");
            return Ok(());
        }

        let audio = self.synthesizer.synthesize(text).await?;
        persist_atomically(self.audio_path.clone(), audio.clone()).await?;

        tracing::debug!(bytes = audio.len(), "speaking");
        self.speaker.play(&audio).await
    }
}
