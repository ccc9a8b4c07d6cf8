//! # guac-tunnel
//!
//! The live relay half of the engine: dials guacd, performs the connection
//! handshake (via `guac-core`), and multiplexes the raw instruction stream
//! with a browser WebSocket. Supports forked read-only observer tunnels and
//! an optional session recording written off the hot path.
//!
//! ```no_run
//! use guac_core::Configuration;
//! use guac_tunnel::NetworkTunnel;
//!
//! # async fn example(ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>)
//! # -> Result<(), guac_tunnel::TunnelError> {
//! let mut config = Configuration::new();
//! config.protocol = "rdp".to_string();
//! config.set_parameter("hostname", "10.0.0.5");
//!
//! let tunnel = NetworkTunnel::connect("127.0.0.1:4822", config).await?;
//! tunnel.relay(ws, false).await;
//! # Ok(())
//! # }
//! ```

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use guac_core::Instruction;

pub mod network;
pub mod recording;

pub use network::{NetworkTunnel, TunnelError, TunnelState};
pub use recording::Recording;

/// Sends a Guacamole-level farewell to a browser socket: an `error`
/// instruction with the reason and numeric code, followed by `disconnect`.
///
/// Used for failures that happen before a tunnel exists (bad parameters,
/// guacd unreachable), where the browser still deserves a protocol-shaped
/// answer instead of a bare socket close.
pub async fn disconnect_ws<S>(ws: &mut WebSocketStream<S>, code: u16, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let error = Instruction::new("error", [reason.to_string(), code.to_string()]);
    let _ = ws.send(Message::Text(error.encode().to_string())).await;
    let _ = ws
        .send(Message::Text(Instruction::bare("disconnect").encode().to_string()))
        .await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
