//! Camera frames
//!
//! The capture loop publishes into a single-slot [`FrameStore`]; the live
//! display and vision queries read whatever frame is current. There is no
//! queue: a slow reader sees a stale frame, never a partial one.

mod capture;
mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

pub use capture::{FfmpegFrameSource, FrameSource, run_capture_loop};
pub use display::{DisplayState, display_router, serve_display};

use crate::{Error, Result};

/// Frame size handed to display and vision consumers
pub const FRAME_WIDTH: u32 = 700;

/// Frame size handed to display and vision consumers
pub const FRAME_HEIGHT: u32 = 500;

/// A JPEG-encoded camera frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG bytes
    pub jpeg: Vec<u8>,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
    /// Capture sequence number, assigned on publish
    pub sequence: u64,
}

impl Frame {
    /// Wrap JPEG bytes captured now
    #[must_use]
    pub fn new(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            captured_at: Utc::now(),
            sequence: 0,
        }
    }
}

/// Single-slot holder for the most recent frame
///
/// In memory the slot is a watch channel, so `publish` swaps an `Arc` and
/// readers always clone a complete frame. The durable snapshot on disk is
/// written to a temporary file in the same directory and renamed over the
/// previous one.
pub struct FrameStore {
    slot: watch::Sender<Option<Arc<Frame>>>,
    snapshot_path: PathBuf,
}

impl FrameStore {
    /// Create an empty store whose snapshot lives at `snapshot_path`
    #[must_use]
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot,
            snapshot_path: snapshot_path.into(),
        }
    }

    /// Path of the durable snapshot
    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Replace the current frame and its snapshot
    ///
    /// The in-memory slot is updated even if the snapshot write fails. The
    /// write blocks; async callers go through the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be written
    pub fn publish(&self, mut frame: Frame) -> Result<()> {
        frame.sequence = self
            .slot
            .borrow()
            .as_ref()
            .map_or(1, |previous| previous.sequence + 1);

        let frame = Arc::new(frame);
        let written = write_atomically(&self.snapshot_path, &frame.jpeg);
        self.slot.send_replace(Some(Arc::clone(&frame)));

        tracing::trace!(sequence = frame.sequence, bytes = frame.jpeg.len(), "frame published");
        written
    }

    /// The most recent frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFrame`] before the first publish
    pub fn latest(&self) -> Result<Arc<Frame>> {
        self.slot.borrow().clone().ok_or(Error::NoFrame)
    }

    /// Watch for new frames
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.slot.subscribe()
    }

    /// Read the durable snapshot
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFrame`] if no snapshot has been written
    pub async fn read_snapshot(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.snapshot_path).await {
            Ok(bytes) if bytes.is_empty() => Err(Error::NoFrame),
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NoFrame),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the snapshot, returning whether one existed
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn remove_snapshot(&self) -> Result<bool> {
        remove_if_present(&self.snapshot_path)
    }
}

/// Write `bytes` to `path` via a temporary sibling and a rename
///
/// # Errors
///
/// Returns error if the temporary file cannot be created or persisted
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// [`write_atomically`] on the blocking pool
///
/// # Errors
///
/// Returns error if the write fails or the blocking task panics
pub async fn persist_atomically(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("write task failed: {e}"))))?
}

/// Remove a file, treating "not found" as success
///
/// # Errors
///
/// Returns error for any failure other than the file being absent
pub fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FrameStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("snapshot.jpg"));
        (dir, store)
    }

    #[tokio::test]
    async fn latest_before_publish_is_no_frame() {
        let (_dir, store) = store();
        assert!(matches!(store.latest(), Err(Error::NoFrame)));
        assert!(matches!(store.read_snapshot().await, Err(Error::NoFrame)));
    }

    #[tokio::test]
    async fn publish_overwrites_previous_frame() {
        let (_dir, store) = store();
        store.publish(Frame::new(vec![1, 2, 3])).unwrap();
        store.publish(Frame::new(vec![4, 5])).unwrap();

        let latest = store.latest().unwrap();
        assert_eq!(latest.jpeg, vec![4, 5]);
        assert_eq!(latest.sequence, 2);
        assert_eq!(store.read_snapshot().await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn remove_snapshot_is_idempotent() {
        let (_dir, store) = store();
        store.publish(Frame::new(vec![9])).unwrap();

        assert!(store.remove_snapshot().unwrap());
        assert!(!store.remove_snapshot().unwrap());
        assert!(matches!(store.read_snapshot().await, Err(Error::NoFrame)));
    }

    #[tokio::test]
    async fn read_snapshot_sees_latest_write() {
        let (_dir, store) = store();
        assert!(matches!(store.read_snapshot().await, Err(Error::NoFrame)));

        persist_atomically(store.snapshot_path().to_path_buf(), vec![3, 1, 4])
            .await
            .unwrap();
        assert_eq!(store.read_snapshot().await.unwrap(), vec![3, 1, 4]);

        store.publish(Frame::new(vec![2, 7])).unwrap();
        assert_eq!(store.read_snapshot().await.unwrap(), vec![2, 7]);
    }

    #[test]
    fn readers_never_observe_partial_frames() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        // Every frame is a run of one repeated byte, so a torn read would mix values
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200u8 {
                    store.publish(Frame::new(vec![i; 4096])).unwrap();
                }
            })
        };

        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    if let Ok(frame) = store.latest() {
                        assert_eq!(frame.jpeg.len(), 4096);
                        assert!(frame.jpeg.iter().all(|b| *b == frame.jpeg[0]));
                    }
                    if let Ok(bytes) = std::fs::read(store.snapshot_path()) {
                        assert_eq!(bytes.len(), 4096);
                        assert!(bytes.iter().all(|b| *b == bytes[0]));
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
