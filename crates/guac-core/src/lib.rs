//! # guac-core
//!
//! A Guacamole protocol engine: the length-prefixed instruction codec, the
//! session state machine over byte-stream transports, and a display
//! compositor that reconstructs the user-visible screen from drawing
//! instructions.
//!
//! The crate has three layers:
//!
//! - **`protocol`** – How bytes travel: the [`Instruction`] value type, the
//!   wire codec with its limits and legacy quirks, and framed async
//!   reader/writer halves.
//! - **`session`**  – Ownership of a transport plus a background reader
//!   feeding a bounded in-order queue. Two variants: a [`FileSession`]
//!   replaying a recorded session and a [`NetworkSession`] speaking to a
//!   live guacd, including the connection handshake.
//! - **`display`**  – The compositor: layers and buffers, Porter–Duff
//!   blending, image stream reassembly, opcode dispatch, and the [`Client`]
//!   pump that emits a composed RGBA frame on every `sync`.
//!
//! Replaying a recording:
//!
//! ```no_run
//! use guac_core::Client;
//!
//! # async fn example() -> std::io::Result<()> {
//! let mut client = Client::from_recording("/var/lib/guacamole/recordings/session").await?;
//! client.on_sync(|frame, timestamp_ms| {
//!     println!("{}x{} at {timestamp_ms}", frame.width(), frame.height());
//! });
//! client.run().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod display;
pub mod protocol;
pub mod session;

pub use config::Configuration;
pub use display::client::Client;
pub use display::compose::CompositeOp;
pub use display::Display;
pub use protocol::{decode, CodecError, Instruction, InstructionReader, InstructionWriter, TransportError};
pub use session::{
    FileSession, NetworkSession, Session, SessionError, SessionState, CONNECT_TIMEOUT,
};
