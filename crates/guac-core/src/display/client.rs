//! The playback client: owns a session and a compositor, pumps instructions
//! from one into the other, and surfaces composed frames on every sync.

use std::path::Path;

use image::RgbaImage;
use tracing::error;

use crate::config::Configuration;
use crate::display::handlers;
use crate::display::streams::Streams;
use crate::display::Display;
use crate::session::{FileSession, NetworkSession, Session, SessionError, SessionState};

/// Callback invoked on every `sync` with the composed screen and the
/// server-declared timestamp in milliseconds.
pub type OnSyncFn = Box<dyn FnMut(&RgbaImage, i64) + Send>;

/// A Guacamole protocol client that reconstructs the user-visible display.
///
/// The client exclusively owns its session; the session exclusively owns the
/// transport and the receive queue. All compositor mutation happens on the
/// pump, so `sync` acts as a barrier: each snapshot reflects exactly the
/// instructions received before it.
pub struct Client {
    pub(crate) session: Option<Box<dyn Session>>,
    pub(crate) display: Display,
    pub(crate) streams: Streams,
    pub(crate) on_sync: Option<OnSyncFn>,
}

impl Client {
    /// Opens a recorded session file for offline reconstruction.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the recording cannot be opened.
    pub async fn from_recording(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let session = FileSession::open(path).await?;
        Ok(Self::with_session(Box::new(session)))
    }

    /// Connects to a live guacd and prepares to reconstruct its display.
    ///
    /// # Errors
    ///
    /// Fails when the dial, the transport, or the handshake fails.
    pub async fn connect(address: &str, config: &Configuration) -> Result<Self, SessionError> {
        let session = NetworkSession::connect(address, config).await?;
        Ok(Self::with_session(Box::new(session)))
    }

    fn with_session(session: Box<dyn Session>) -> Self {
        Self {
            session: Some(session),
            display: Display::new(),
            streams: Streams::new(),
            on_sync: None,
        }
    }

    /// A client with compositor state but no session; dispatch tests drive
    /// it directly.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            session: None,
            display: Display::new(),
            streams: Streams::new(),
            on_sync: None,
        }
    }

    /// Registers the on-sync callback.
    ///
    /// The callback runs synchronously on the pump after every `sync`
    /// instruction, so it should not block; hand the frame to a channel or
    /// task if encoding is slow.
    pub fn on_sync(&mut self, callback: impl FnMut(&RgbaImage, i64) + Send + 'static) {
        self.on_sync = Some(Box::new(callback));
    }

    /// Runs the event pump until the session closes.
    ///
    /// A handler failure terminates the session; the pump then drains out
    /// on the closed queue and returns.
    pub async fn run(&mut self) {
        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let Some(ins) = session.recv().await else {
                return;
            };
            if let Err(e) = handlers::dispatch(self, &ins) {
                error!("handler for \"{}\" failed: {e}", ins.opcode());
                self.terminate();
            }
        }
    }

    /// A snapshot of the current screen and the last sync timestamp.
    pub fn screen(&self) -> (RgbaImage, i64) {
        (self.display.compose(), self.display.last_sync_ms())
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(SessionState::Closed)
    }

    /// Terminates the session. Idempotent.
    pub fn terminate(&self) {
        if let Some(session) = &self.session {
            session.terminate();
        }
    }

    /// Composes the sync frame, resets dirty state, and notifies the
    /// embedder.
    pub(crate) fn finish_frame(&mut self, timestamp_ms: i64) {
        let frame = self.display.sync(timestamp_ms);
        if let Some(callback) = &mut self.on_sync {
            callback(&frame, timestamp_ms);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_client_reports_closed() {
        let client = Client::detached();
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[test]
    fn test_screen_of_fresh_client_is_empty() {
        let client = Client::detached();
        let (screen, last_sync) = client.screen();
        assert_eq!(screen.dimensions(), (0, 0));
        assert_eq!(last_sync, 0);
    }

    #[test]
    fn test_terminate_without_session_is_harmless() {
        let client = Client::detached();
        client.terminate();
        client.terminate();
    }
}
