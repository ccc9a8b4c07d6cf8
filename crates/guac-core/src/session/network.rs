//! Live session over a TCP connection to guacd.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::Configuration;
use crate::protocol::{Instruction, InstructionReader, InstructionWriter};
use crate::session::{
    handshake, Session, SessionError, SessionState, StateCell, CONNECT_TIMEOUT, QUEUE_CAPACITY,
};

/// A session connected to a live guacd.
///
/// The reader task owns the read half of the connection; `send` serialises
/// writes on the write half behind an async mutex so instruction frames are
/// never interleaved.
pub struct NetworkSession {
    rx: mpsc::Receiver<Instruction>,
    writer: Arc<Mutex<InstructionWriter<OwnedWriteHalf>>>,
    state: StateCell,
    stop: watch::Sender<bool>,
    uuid: String,
}

impl NetworkSession {
    /// Dials guacd, performs the handshake, and starts the background reader.
    ///
    /// # Errors
    ///
    /// Fails on dial timeout, transport failure, or a handshake mismatch; in
    /// every case the connection is dropped and no session exists.
    pub async fn connect(address: &str, config: &Configuration) -> Result<Self, SessionError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| {
                SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connection to {address} timed out"),
                ))
            })??;

        let (read_half, write_half) = stream.into_split();
        let mut reader = InstructionReader::new(BufReader::new(read_half));
        let mut writer = InstructionWriter::new(write_half);

        let state = StateCell::new(SessionState::Handshaking);
        let uuid = handshake::handshake(&mut reader, &mut writer, config).await?;
        state.set(SessionState::Active);
        debug!(uuid = %uuid, "session established");

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop, stopped) = watch::channel(false);
        let reader_state = state.clone();
        tokio::spawn(run_reader(reader, tx, stopped, reader_state));

        Ok(Self {
            rx,
            writer: Arc::new(Mutex::new(writer)),
            state,
            stop,
            uuid,
        })
    }

    /// The connection uuid issued by guacd during the handshake.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

async fn run_reader(
    mut reader: InstructionReader<BufReader<OwnedReadHalf>>,
    tx: mpsc::Sender<Instruction>,
    mut stopped: watch::Receiver<bool>,
    state: StateCell,
) {
    loop {
        tokio::select! {
            _ = stopped.changed() => break,
            frame = reader.read() => match frame {
                Ok(None) => {
                    debug!("guacd closed the connection");
                    break;
                }
                Ok(Some(ins)) => {
                    if tx.send(ins).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("disconnecting from guacd: {e}");
                    break;
                }
            }
        }
    }
    state.set(SessionState::Closed);
}

#[async_trait]
impl Session for NetworkSession {
    async fn recv(&mut self) -> Option<Instruction> {
        if *self.stop.borrow() {
            return None;
        }
        self.rx.recv().await
    }

    async fn send(&self, instructions: &[Instruction]) -> Result<(), SessionError> {
        if self.state.get() != SessionState::Active {
            return Err(SessionError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        for ins in instructions {
            writer.write(ins).await?;
        }
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
