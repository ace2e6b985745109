//! Describing what the camera sees

use std::sync::Arc;

use async_trait::async_trait;

use crate::camera::FrameStore;
use crate::{Error, Result};

/// Spoken when captioning fails for any reason
pub const FALLBACK_DESCRIPTION: &str = "I'm sorry, I can't see anything right now.";

/// Spoken when no frame has been captured yet
pub const NO_FRAME_DESCRIPTION: &str = "I don't have a camera frame yet.";

/// Instruction used when the caller gives none
pub const DEFAULT_INSTRUCTION: &str = "Describe what you see in this image in one or two sentences.";

/// Image captioning service
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Describe a JPEG image following `instruction`
    async fn caption(&self, jpeg: &[u8], instruction: &str) -> Result<String>;
}

/// Answers "what do you see" from the latest snapshot
pub struct VisionQuery {
    frames: Arc<FrameStore>,
    captioner: Arc<dyn Captioner>,
}

impl VisionQuery {
    #[must_use]
    pub fn new(frames: Arc<FrameStore>, captioner: Arc<dyn Captioner>) -> Self {
        Self { frames, captioner }
    }

    /// Caption the current snapshot
    ///
    /// Never fails: a missing frame yields [`NO_FRAME_DESCRIPTION`], any
    /// other problem yields [`FALLBACK_DESCRIPTION`].
    pub async fn describe(&self, instruction: &str) -> String {
        let jpeg = match self.frames.read_snapshot().await {
            Ok(jpeg) => jpeg,
            Err(Error::NoFrame) => {
                tracing::info!("vision query before first frame");
                return NO_FRAME_DESCRIPTION.to_string();
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read snapshot");
                return FALLBACK_DESCRIPTION.to_string();
            }
        };

        let instruction = if instruction.trim().is_empty() {
            DEFAULT_INSTRUCTION
        } else {
            instruction
        };

        match self.captioner.caption(&jpeg, instruction).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!(bytes = jpeg.len(), "frame captioned");
                text.trim().to_string()
            }
            Ok(_) => {
                tracing::warn!("captioner returned empty text");
                FALLBACK_DESCRIPTION.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "captioning failed");
                FALLBACK_DESCRIPTION.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::camera::Frame;

    #[derive(Default)]
    struct EchoCaptioner {
        seen: Mutex<Vec<(Vec<u8>, String)>>,
    }

    #[async_trait]
    impl Captioner for EchoCaptioner {
        async fn caption(&self, jpeg: &[u8], instruction: &str) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((jpeg.to_vec(), instruction.to_string()));
            Ok(" A red chair. ".to_string())
        }
    }

    struct BrokenCaptioner;

    #[async_trait]
    impl Captioner for BrokenCaptioner {
        async fn caption(&self, _jpeg: &[u8], _instruction: &str) -> Result<String> {
            Err(Error::Vision("quota exceeded".to_string()))
        }
    }

    fn frames() -> (tempfile::TempDir, Arc<FrameStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FrameStore::new(dir.path().join("snapshot.jpg")));
        (dir, store)
    }

    #[tokio::test]
    async fn no_frame_gives_defined_text() {
        let (_dir, frames) = frames();
        let captioner = Arc::new(EchoCaptioner::default());
        let vision = VisionQuery::new(frames, Arc::clone(&captioner) as Arc<dyn Captioner>);

        assert_eq!(vision.describe("look").await, NO_FRAME_DESCRIPTION);
        assert!(captioner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn captions_latest_snapshot() {
        let (_dir, frames) = frames();
        frames.publish(Frame::new(vec![1, 2, 3])).unwrap();
        let captioner = Arc::new(EchoCaptioner::default());
        let vision = VisionQuery::new(frames, Arc::clone(&captioner) as Arc<dyn Captioner>);

        assert_eq!(vision.describe("what is this").await, "A red chair.");
        let seen = captioner.seen.lock().unwrap();
        assert_eq!(seen[0].0, vec![1, 2, 3]);
        assert_eq!(seen[0].1, "what is this");
    }

    #[tokio::test]
    async fn blank_instruction_uses_default() {
        let (_dir, frames) = frames();
        frames.publish(Frame::new(vec![7])).unwrap();
        let captioner = Arc::new(EchoCaptioner::default());
        let vision = VisionQuery::new(frames, Arc::clone(&captioner) as Arc<dyn Captioner>);

        vision.describe("  ").await;
        assert_eq!(captioner.seen.lock().unwrap()[0].1, DEFAULT_INSTRUCTION);
    }

    #[tokio::test]
    async fn captioner_failure_gives_fallback() {
        let (_dir, frames) = frames();
        frames.publish(Frame::new(vec![1])).unwrap();
        let vision = VisionQuery::new(frames, Arc::new(BrokenCaptioner));

        assert_eq!(vision.describe("look").await, FALLBACK_DESCRIPTION);
    }
}
