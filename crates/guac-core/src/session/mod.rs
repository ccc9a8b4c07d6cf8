//! Sessions: ownership of a transport, a background reader, and a bounded
//! in-order instruction queue.
//!
//! Two concurrent actors exist per session: the **reader** task, which blocks
//! on the transport and enqueues decoded instructions, and the **consumer**
//! (the client pump, or a relay writer), which drains the queue. The reader
//! is the sole owner of the queue sender, so the queue closes exactly once —
//! when the reader exits — and `terminate()` only ever flips a watch flag
//! that the reader selects on. This removes the race where a shutdown path
//! closes a channel while a send is still in flight.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Instruction, TransportError};

mod file;
pub mod handshake;
mod network;

pub use file::FileSession;
pub use network::NetworkSession;

/// Capacity of the per-session instruction queue. Sends apply backpressure
/// to the reader once the consumer falls this far behind.
pub(crate) const QUEUE_CAPACITY: usize = 128;

/// Timeout for establishing the TCP connection to guacd.
pub const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Lifecycle of a session. Terminal transitions are irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Closed = 0,
    Handshaking = 1,
    Active = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Handshaking,
            2 => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

/// Shared, atomically updated session state.
#[derive(Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation was attempted outside the `Active` state.
    #[error("not connected")]
    NotConnected,

    /// The handshake exchange did not go as expected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The transport failed or delivered a malformed frame.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A raw I/O failure outside the framed reader.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A connection to a guacd server (or a recording standing in for one).
///
/// Instructions received are delivered through `recv` strictly in arrival
/// order. `terminate` is idempotent, may be called from any task, and causes
/// the reader to exit in bounded time.
#[async_trait]
pub trait Session: Send {
    /// Receives the next instruction, or `None` once the queue has closed.
    async fn recv(&mut self) -> Option<Instruction>;

    /// Sends instructions to the server as one transaction.
    async fn send(&self, instructions: &[Instruction]) -> Result<(), SessionError>;

    /// Terminates the session: cancels the reader and closes the transport.
    fn terminate(&self);

    /// Returns the current session state.
    fn state(&self) -> SessionState;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
