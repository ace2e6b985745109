//! Shutdown signalling and ordered teardown
//!
//! A single `watch<bool>` carries the stop request to every loop. Once the
//! loops are asked to stop, [`ShutdownCoordinator`] walks the teardown steps
//! in a fixed order and attempts every one of them, whatever fails earlier.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::camera::remove_if_present;
use crate::drone::ActuatorController;

/// How long a task gets to wind down before it is aborted
pub const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on the landing command during teardown
const LAND_TIMEOUT: Duration = Duration::from_secs(25);

/// Upper bound on the final stream-off command
const END_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve once shutdown has been requested (or the sender is gone)
pub async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A teardown step, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    Land,
    CloseTranscription,
    StopCapture,
    StopDisplay,
    RemoveSnapshot,
    RemoveAudio,
    EndStream,
}

impl std::fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Land => "land",
            Self::CloseTranscription => "close transcription",
            Self::StopCapture => "stop capture",
            Self::StopDisplay => "stop display",
            Self::RemoveSnapshot => "remove snapshot",
            Self::RemoveAudio => "remove audio",
            Self::EndStream => "end video stream",
        };
        f.write_str(name)
    }
}

/// Outcome of one teardown step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: ShutdownStep,
    /// Short description on success, error text on failure
    pub result: std::result::Result<String, String>,
}

/// What happened during teardown
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub steps: Vec<StepOutcome>,
}

impl ShutdownReport {
    /// Steps in the order they ran
    #[must_use]
    pub fn order(&self) -> Vec<ShutdownStep> {
        self.steps.iter().map(|s| s.step).collect()
    }

    /// Steps that failed
    #[must_use]
    pub fn failures(&self) -> Vec<&StepOutcome> {
        self.steps.iter().filter(|s| s.result.is_err()).collect()
    }

    /// Whether every step succeeded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.result.is_ok())
    }

    fn record(&mut self, step: ShutdownStep, result: std::result::Result<String, String>) {
        match &result {
            Ok(detail) => tracing::info!(%step, detail = %detail, "shutdown step done"),
            Err(error) => tracing::warn!(%step, error = %error, "shutdown step failed"),
        }
        self.steps.push(StepOutcome { step, result });
    }
}

/// Drives teardown of the drone, background tasks, and scratch files
pub struct ShutdownCoordinator {
    controller: Arc<ActuatorController>,
    signal: watch::Sender<bool>,
    snapshot_path: PathBuf,
    audio_path: PathBuf,
    transcription: Option<JoinHandle<()>>,
    capture: Option<JoinHandle<()>>,
    display: Option<JoinHandle<()>>,
    completed: bool,
}

impl ShutdownCoordinator {
    /// Create a coordinator for the given drone and artifact paths
    #[must_use]
    pub const fn new(
        controller: Arc<ActuatorController>,
        signal: watch::Sender<bool>,
        snapshot_path: PathBuf,
        audio_path: PathBuf,
    ) -> Self {
        Self {
            controller,
            signal,
            snapshot_path,
            audio_path,
            transcription: None,
            capture: None,
            display: None,
            completed: false,
        }
    }

    /// Track the transcription session task
    pub fn set_transcription(&mut self, handle: JoinHandle<()>) {
        self.transcription = Some(handle);
    }

    /// Track the frame capture task
    pub fn set_capture(&mut self, handle: JoinHandle<()>) {
        self.capture = Some(handle);
    }

    /// Track the display server task
    pub fn set_display(&mut self, handle: JoinHandle<()>) {
        self.display = Some(handle);
    }

    /// Whether teardown has already run
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Tear everything down
    ///
    /// Order: signal loops, land, close transcription, stop capture, stop
    /// display, remove snapshot, remove audio, end video stream. Each step is
    /// attempted regardless of earlier failures. Calling again after
    /// completion does nothing and returns an empty report.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.completed {
            tracing::debug!("shutdown already completed");
            return report;
        }
        self.completed = true;

        tracing::info!("shutting down");
        self.signal.send_replace(true);

        let landed = match tokio::time::timeout(LAND_TIMEOUT, self.controller.land_if_airborne())
            .await
        {
            Ok(Ok(true)) => Ok("landed".to_string()),
            Ok(Ok(false)) => Ok("already grounded".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no landing confirmation within {LAND_TIMEOUT:?}")),
        };
        report.record(ShutdownStep::Land, landed);

        report.record(
            ShutdownStep::CloseTranscription,
            stop_task(self.transcription.take()).await,
        );
        report.record(ShutdownStep::StopCapture, stop_task(self.capture.take()).await);
        report.record(ShutdownStep::StopDisplay, stop_task(self.display.take()).await);

        report.record(ShutdownStep::RemoveSnapshot, remove_artifact(&self.snapshot_path));
        report.record(ShutdownStep::RemoveAudio, remove_artifact(&self.audio_path));

        let ended = match tokio::time::timeout(END_TIMEOUT, self.controller.end()).await {
            Ok(Ok(())) => Ok("stream off".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no reply within {END_TIMEOUT:?}")),
        };
        report.record(ShutdownStep::EndStream, ended);

        if report.is_clean() {
            tracing::info!("shutdown complete");
        } else {
            tracing::warn!(failed = report.failures().len(), "shutdown completed with errors");
        }

        report
    }
}

async fn stop_task(handle: Option<JoinHandle<()>>) -> std::result::Result<String, String> {
    let Some(mut handle) = handle else {
        return Ok("not running".to_string());
    };

    match tokio::time::timeout(TASK_STOP_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => Ok("stopped".to_string()),
        Ok(Err(e)) => Err(format!("task failed: {e}")),
        Err(_) => {
            handle.abort();
            Err(format!("did not stop within {TASK_STOP_TIMEOUT:?}, aborted"))
        }
    }
}

fn remove_artifact(path: &std::path::Path) -> std::result::Result<String, String> {
    match remove_if_present(path) {
        Ok(true) => Ok(format!("removed {}", path.display())),
        Ok(false) => Ok("nothing to remove".to_string()),
        Err(e) => Err(format!("{}: {e}", path.display())),
    }
}
