//! Session recording: raw wire frames appended to a file, exactly as
//! received, terminators included.
//!
//! The writer runs on its own task behind a bounded queue so a slow disk can
//! never stall the tunnel's read loop. Enqueueing is non-blocking: when the
//! queue is full the frame is dropped with a warning, trading a gap in the
//! recording for liveness of the session. Writer failure stops the
//! recording only, never the session.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// Frames buffered between the tunnel reader and the disk writer.
const QUEUE_CAPACITY: usize = 256;

/// Handle to an active session recording.
pub struct Recording {
    tx: mpsc::Sender<Vec<u8>>,
    stop: watch::Sender<bool>,
}

impl Recording {
    /// Creates the recording file (and any missing parent directories) and
    /// starts the writer task.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the directory or file cannot
    /// be created.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = File::create(path).await?;
        debug!(path = %path.display(), "recording started");

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop, stopped) = watch::channel(false);
        tokio::spawn(run_writer(file, rx, stopped));

        Ok(Self { tx, stop })
    }

    /// Enqueues one raw frame without blocking.
    ///
    /// Frames arriving while the queue is full are dropped with a warning;
    /// frames arriving after `close` are silently discarded.
    pub fn send(&self, frame: Vec<u8>) {
        if frame.is_empty() {
            return;
        }
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("recording queue full; dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Stops the writer. Idempotent.
    pub fn close(&self) {
        self.stop.send_replace(true);
    }
}

async fn run_writer(
    mut file: File,
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stopped.changed() => break,
            frame = rx.recv() => match frame {
                None => break,
                Some(frame) => {
                    if let Err(e) = file.write_all(&frame).await {
                        error!("recording write failed: {e}");
                        break;
                    }
                }
            }
        }
    }
    if let Err(e) = file.flush().await {
        error!("recording flush failed: {e}");
    }
    debug!("recording stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("guac-recording-{}-{name}", std::process::id()));
        path
    }

    /// Polls the file until it reaches the expected size or the deadline
    /// passes; the writer runs on its own task.
    async fn wait_for_content(path: &std::path::Path, expected: &[u8]) {
        for _ in 0..100 {
            if let Ok(content) = std::fs::read(path) {
                if content == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "recording never reached expected content: {:?}",
            std::fs::read(path)
        );
    }

    #[tokio::test]
    async fn test_frames_are_written_verbatim_in_order() {
        let path = temp_path("verbatim.rec");
        let recording = Recording::create(&path).await.unwrap();

        recording.send(b"4.size,1.0,3.800,3.600;".to_vec());
        recording.send(b"4.sync,2.10;".to_vec());

        wait_for_content(&path, b"4.size,1.0,3.800,3.600;4.sync,2.10;").await;
        recording.close();
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_empty_frames_are_skipped() {
        let path = temp_path("empty.rec");
        let recording = Recording::create(&path).await.unwrap();

        recording.send(Vec::new());
        recording.send(b"4.sync,2.10;".to_vec());

        wait_for_content(&path, b"4.sync,2.10;").await;
        recording.close();
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_create_makes_missing_parent_directories() {
        let mut path = std::env::temp_dir();
        path.push(format!("guac-recording-dirs-{}", std::process::id()));
        path.push("nested");
        path.push("session.rec");

        let recording = Recording::create(&path).await.unwrap();
        recording.close();
        assert!(path.exists());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_sends_after_close_are_dropped() {
        let path = temp_path("closed.rec");
        let recording = Recording::create(&path).await.unwrap();
        recording.close();
        recording.close();
        // Must not panic or block once the writer is gone.
        tokio::time::sleep(Duration::from_millis(20)).await;
        recording.send(b"4.sync,2.10;".to_vec());
        let _ = std::fs::remove_file(path);
    }
}
