//! Frame acquisition loop

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{FRAME_HEIGHT, FRAME_WIDTH, Frame, FrameStore};
use crate::shutdown::signalled;
use crate::{Error, Result};

/// Default UDP address the Tello streams H.264 video to
pub const DEFAULT_VIDEO_URL: &str = "udp://0.0.0.0:11111";

/// Upper bound on a single grab; a keyframe normally arrives well within this
const GRAB_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that yields camera frames
#[async_trait]
pub trait FrameSource: Send {
    /// Capture the next frame
    async fn grab(&mut self) -> Result<Frame>;
}

/// Grabs single JPEG frames from the drone's video feed with `ffmpeg`
///
/// Decoding H.264 is left to `ffmpeg`; each grab decodes up to the next
/// complete picture, scales it, and re-encodes it as JPEG on stdout.
pub struct FfmpegFrameSource {
    ffmpeg: String,
    video_url: String,
}

impl Default for FfmpegFrameSource {
    fn default() -> Self {
        Self::new(DEFAULT_VIDEO_URL)
    }
}

impl FfmpegFrameSource {
    /// Read from `video_url` with the `ffmpeg` on `PATH`
    #[must_use]
    pub fn new(video_url: impl Into<String>) -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            video_url: video_url.into(),
        }
    }

    /// Use a specific `ffmpeg` binary
    #[must_use]
    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    fn args(&self) -> Vec<String> {
        let scale = format!("scale={FRAME_WIDTH}:{FRAME_HEIGHT}");
        [
            "-loglevel",
            "error",
            "-fflags",
            "nobuffer",
            "-i",
            self.video_url.as_str(),
            "-frames:v",
            "1",
            "-vf",
            scale.as_str(),
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "pipe:1",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn grab(&mut self) -> Result<Frame> {
        let child = tokio::process::Command::new(&self.ffmpeg)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Camera(format!("failed to spawn {}: {e}", self.ffmpeg)))?;

        let output = tokio::time::timeout(GRAB_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::Camera(format!("no frame within {GRAB_TIMEOUT:?}")))?
            .map_err(|e| Error::Camera(format!("ffmpeg process error: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Camera(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(Error::Camera("ffmpeg produced no image".to_string()));
        }

        Ok(Frame::new(output.stdout))
    }
}

/// Publish a frame from `source` every `interval` until shutdown
///
/// Grab and snapshot failures are logged and the loop keeps going. The loop
/// never waits on readers of the store.
pub async fn run_capture_loop<S: FrameSource>(
    mut source: S,
    store: Arc<FrameStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(interval_ms = interval.as_millis(), "frame capture started");

    loop {
        tokio::select! {
            () = signalled(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        let grabbed = tokio::select! {
            () = signalled(&mut shutdown) => break,
            grabbed = source.grab() => grabbed,
        };

        match grabbed {
            Ok(frame) => {
                let target = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || target.publish(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "failed to write frame snapshot"),
                    Err(e) => tracing::warn!(error = %e, "frame publish task failed"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame grab failed");
            }
        }
    }

    tracing::info!("frame capture stopped");
}
