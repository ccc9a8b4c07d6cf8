//! Offline session over a recorded session file.
//!
//! A recording is the raw concatenation of wire frames exactly as received,
//! terminators included, so the framed reader consumes it symmetrically to a
//! live connection. There is no handshake: the session is `Active` as soon
//! as the file opens.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::protocol::{Instruction, InstructionReader};
use crate::session::{
    Session, SessionError, SessionState, StateCell, QUEUE_CAPACITY,
};

/// A session replaying a recorded session file.
pub struct FileSession {
    rx: mpsc::Receiver<Instruction>,
    state: StateCell,
    stop: watch::Sender<bool>,
}

impl FileSession {
    /// Opens a recording and starts the background reader.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let mut reader = InstructionReader::new(BufReader::new(file));

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop, mut stopped) = watch::channel(false);
        let state = StateCell::new(SessionState::Active);

        let reader_state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    frame = reader.read() => match frame {
                        Ok(None) => {
                            debug!("recording exhausted");
                            break;
                        }
                        Ok(Some(ins)) => {
                            // Keepalives carry no display state.
                            if ins.opcode() == "nop" {
                                continue;
                            }
                            if tx.send(ins).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("stopping playback: {e}");
                            break;
                        }
                    }
                }
            }
            reader_state.set(SessionState::Closed);
            // `tx` drops here; the reader is the only sender, so this is the
            // single point at which the queue closes.
        });

        Ok(Self { rx, state, stop })
    }
}

#[async_trait]
impl Session for FileSession {
    async fn recv(&mut self) -> Option<Instruction> {
        // A terminated session reads as closed even while instructions are
        // still buffered in the queue.
        if *self.stop.borrow() {
            return None;
        }
        self.rx.recv().await
    }

    async fn send(&self, _instructions: &[Instruction]) -> Result<(), SessionError> {
        // A recording has no server to talk back to.
        Ok(())
    }

    fn terminate(&self) {
        self.stop.send_replace(true);
        self.state.set(SessionState::Closed);
    }

    fn state(&self) -> SessionState {
        self.state.get()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
