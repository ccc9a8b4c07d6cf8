//! The live tunnel: a TCP connection to guacd multiplexed to a browser
//! WebSocket.
//!
//! One tunnel owns one guacd connection. The read half is consumed by the
//! relay's guacd→browser loop; writes from any task are serialised behind a
//! dedicated mutex so instruction frames never interleave mid-frame.
//! Observer tunnels (guests watching the same session) are independent
//! tunnels joined on the primary's connection id and tracked so that
//! disconnecting the primary disconnects every guest.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use guac_core::config::{keys, Configuration};
use guac_core::protocol::{Instruction, InstructionReader, InstructionWriter, TransportError};
use guac_core::session::{handshake, SessionError, CONNECT_TIMEOUT};

use crate::recording::Recording;

/// Numeric code attached to the `error` instruction sent when a session is
/// forcibly killed.
const KILL_CODE: &str = "886";

/// Lifecycle of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TunnelState {
    Closed = 0,
    Open = 1,
}

/// Errors surfaced by tunnel operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// An operation was attempted on a tunnel that is not open.
    #[error("not connected")]
    NotConnected,

    /// guacd closed the connection.
    #[error("connection closed by guacd")]
    Closed,

    /// The dial or handshake failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The transport failed mid-session.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A raw I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A connected tunnel to guacd.
pub struct NetworkTunnel {
    address: String,
    uuid: String,
    state: AtomicU8,
    reader: Mutex<InstructionReader<BufReader<OwnedReadHalf>>>,
    writer: Mutex<InstructionWriter<OwnedWriteHalf>>,
    recording: Option<Recording>,
    observers: std::sync::Mutex<HashMap<String, Arc<NetworkTunnel>>>,
    closed: watch::Sender<bool>,
    kill_tx: mpsc::Sender<String>,
    kill_rx: std::sync::Mutex<Option<mpsc::Receiver<String>>>,
}

impl NetworkTunnel {
    /// Dials guacd, optionally starts recording, and performs the handshake.
    ///
    /// When `recording-path` is set, the key (and `create-recording-path`)
    /// is stripped before the handshake so guacd never sees it; recording is
    /// the relay's concern, not the daemon's.
    ///
    /// # Errors
    ///
    /// Fails on dial timeout, recording setup failure, or a handshake
    /// error. The connection is dropped on every failure path.
    pub async fn connect(
        address: &str,
        mut config: Configuration,
    ) -> Result<Arc<Self>, TunnelError> {
        let recording = match config.parameter(keys::RECORDING_PATH) {
            path if path.is_empty() => None,
            path => {
                config.unset_parameter(keys::RECORDING_PATH);
                config.unset_parameter(keys::CREATE_RECORDING_PATH);
                Some(Recording::create(&path).await?)
            }
        };

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| {
                TunnelError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connection to {address} timed out"),
                ))
            })??;

        let (read_half, write_half) = stream.into_split();
        let mut reader = InstructionReader::new(BufReader::new(read_half));
        let mut writer = InstructionWriter::new(write_half);

        let uuid = handshake::handshake(&mut reader, &mut writer, &config).await?;
        info!(uuid = %uuid, address, "tunnel established");

        let (closed, _) = watch::channel(false);
        let (kill_tx, kill_rx) = mpsc::channel(1);

        Ok(Arc::new(Self {
            address: address.to_string(),
            uuid,
            state: AtomicU8::new(TunnelState::Open as u8),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            recording,
            observers: std::sync::Mutex::new(HashMap::new()),
            closed,
            kill_tx,
            kill_rx: std::sync::Mutex::new(Some(kill_rx)),
        }))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The connection uuid issued by guacd; observers join on it.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn state(&self) -> TunnelState {
        if self.state.load(Ordering::Acquire) == TunnelState::Open as u8 {
            TunnelState::Open
        } else {
            TunnelState::Closed
        }
    }

    /// Sends a raw frame (browser pass-through).
    ///
    /// # Errors
    ///
    /// Fails with [`TunnelError::NotConnected`] when the tunnel is closed.
    pub async fn send_raw(&self, frame: &[u8]) -> Result<(), TunnelError> {
        if self.state() != TunnelState::Open {
            return Err(TunnelError::NotConnected);
        }
        if frame.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.write_raw(frame).await?;
        Ok(())
    }

    /// Sends instructions as one uninterleaved transaction.
    ///
    /// # Errors
    ///
    /// Fails with [`TunnelError::NotConnected`] when the tunnel is closed.
    pub async fn send_instructions(&self, instructions: &[Instruction]) -> Result<(), TunnelError> {
        if self.state() != TunnelState::Open {
            return Err(TunnelError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        for ins in instructions {
            writer.write(ins).await?;
        }
        Ok(())
    }

    /// Receives the next raw frame from guacd, forking a copy to the
    /// recording without blocking.
    ///
    /// # Errors
    ///
    /// Fails with [`TunnelError::Closed`] at end of stream and
    /// [`TunnelError::NotConnected`] once the tunnel is closed.
    pub async fn receive(&self) -> Result<Vec<u8>, TunnelError> {
        if self.state() != TunnelState::Open {
            return Err(TunnelError::NotConnected);
        }
        let mut reader = self.reader.lock().await;
        let frame = reader.read_raw().await?.ok_or(TunnelError::Closed)?;
        if let Some(recording) = &self.recording {
            recording.send(frame.clone());
        }
        Ok(frame)
    }

    /// Requests a forced shutdown: the relay's read loop sends
    /// `error <reason> 886` to the browser and disconnects.
    pub fn kill(&self, reason: &str) {
        let _ = self.kill_tx.try_send(reason.to_string());
    }

    /// Disconnects the tunnel: farewell instruction, transport shutdown,
    /// recording stop, and observer teardown. Idempotent and safe against
    /// concurrent callers.
    pub fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let previous = self
                .state
                .swap(TunnelState::Closed as u8, Ordering::AcqRel);
            if previous == TunnelState::Closed as u8 {
                return;
            }
            debug!(uuid = %self.uuid, "tunnel disconnecting");

            // Best effort: the daemon may already be gone.
            {
                let mut writer = self.writer.lock().await;
                let _ = writer.write(&Instruction::bare("disconnect")).await;
            }

            let _ = self.closed.send(true);

            if let Some(recording) = &self.recording {
                recording.close();
            }

            let observers: Vec<Arc<NetworkTunnel>> = {
                let mut map = self.observers.lock().expect("observer table poisoned");
                map.drain().map(|(_, tunnel)| tunnel).collect()
            };
            for observer in observers {
                tokio::spawn(async move { observer.disconnect().await });
            }
        })
    }

    /// Forks a read-only observer tunnel onto this tunnel's connection id
    /// and registers it under the guest's name.
    ///
    /// # Errors
    ///
    /// Fails when the observer's own dial or handshake fails.
    pub async fn join(&self, guest: &str) -> Result<Arc<NetworkTunnel>, TunnelError> {
        let mut config = Configuration::new();
        config.connection_id = self.uuid.clone();
        config.set_parameter(keys::WIDTH, "1024");
        config.set_parameter(keys::HEIGHT, "768");
        config.set_parameter(keys::DPI, "96");
        config.set_read_only();

        let forked = NetworkTunnel::connect(&self.address, config).await?;
        self.observers
            .lock()
            .expect("observer table poisoned")
            .insert(guest.to_string(), Arc::clone(&forked));
        info!(guest, uuid = %self.uuid, "observer joined");
        Ok(forked)
    }

    /// Removes and disconnects a registered observer.
    pub async fn quit(&self, guest: &str) {
        let removed = self
            .observers
            .lock()
            .expect("observer table poisoned")
            .remove(guest);
        if let Some(observer) = removed {
            observer.disconnect().await;
            info!(guest, "observer left");
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().expect("observer table poisoned").len()
    }

    /// Multiplexes this tunnel with a browser WebSocket until either side
    /// disconnects.
    ///
    /// Spawns a guacd→browser loop, and, unless `readonly`, a
    /// browser→guacd loop. Returns once the tunnel has closed; both loops
    /// disconnect the tunnel on their way out, so the first failure
    /// anywhere tears the whole relay down.
    pub async fn relay<S>(self: Arc<Self>, ws: WebSocketStream<S>, readonly: bool)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_tx, ws_rx) = ws.split();
        let kill_rx = self
            .kill_rx
            .lock()
            .expect("kill receiver poisoned")
            .take();

        // guacd → browser
        let tunnel = Arc::clone(&self);
        let mut read_closed = self.closed.subscribe();
        tokio::spawn(async move {
            let mut ws_tx = ws_tx;
            let mut kill_rx = kill_rx;
            loop {
                tokio::select! {
                    _ = read_closed.changed() => break,
                    reason = recv_kill(&mut kill_rx) => {
                        warn!(reason = %reason, "session killed");
                        let farewell = Instruction::new("error", [reason, KILL_CODE.to_string()]);
                        let _ = ws_tx.send(Message::Text(farewell.encode().to_string())).await;
                        break;
                    }
                    frame = tunnel.receive() => match frame {
                        Ok(frame) if frame.is_empty() => continue,
                        Ok(frame) => {
                            let text = String::from_utf8_lossy(&frame).into_owned();
                            if ws_tx.send(Message::Text(text)).await.is_err() {
                                debug!("browser went away; stopping relay");
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("guacd read ended: {e}");
                            break;
                        }
                    }
                }
            }
            let _ = ws_tx.close().await;
            tunnel.disconnect().await;
        });

        // browser → guacd
        if readonly {
            drop(ws_rx);
        } else {
            let tunnel = Arc::clone(&self);
            let mut write_closed = self.closed.subscribe();
            tokio::spawn(async move {
                let mut ws_rx = ws_rx;
                loop {
                    tokio::select! {
                        _ = write_closed.changed() => break,
                        msg = ws_rx.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if tunnel.send_raw(text.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(frame))) => {
                                if tunnel.send_raw(&frame).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("browser closed the socket");
                                break;
                            }
                            // Protocol-level ping/pong is handled by the
                            // WebSocket layer itself.
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                debug!("browser read failed: {e}");
                                break;
                            }
                        }
                    }
                }
                tunnel.disconnect().await;
            });
        }

        // Wait out the session.
        let mut closed = self.closed.subscribe();
        if !*closed.borrow() {
            let _ = closed.changed().await;
        }
    }
}

/// Waits for a kill request; pends forever when the receiver has already
/// been claimed by an earlier relay.
async fn recv_kill(rx: &mut Option<mpsc::Receiver<String>>) -> String {
    match rx {
        Some(rx) => rx.recv().await.unwrap_or_default(),
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
