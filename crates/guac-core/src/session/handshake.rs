//! The guacd connection handshake.
//!
//! After the byte channel is up, the client drives a fixed exchange:
//!
//! 1. `select <connection-id-or-protocol>`
//! 2. guacd answers `args <name>...` listing required parameter names
//! 3. `size`, `audio` (unless disabled), `video`, `image`, `timezone`
//! 4. `connect` with one value per requested name, in order
//! 5. guacd answers `ready <uuid>`
//!
//! Any argument name containing `VERSION` receives the fixed version token
//! instead of a configured value; guacd uses it to negotiate the protocol
//! revision and expects it echoed as-is.

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::config::{keys, Configuration};
use crate::protocol::{Instruction, InstructionReader, InstructionWriter};
use crate::session::SessionError;

/// Version token echoed for every `VERSION` handshake argument.
pub const VERSION: &str = "VERSION_1_5_0";

/// Image mimetypes advertised to guacd, in preference order.
const IMAGE_MIMETYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Reads one instruction and fails unless it carries the expected opcode.
///
/// # Errors
///
/// Returns [`SessionError::Handshake`] on a mismatched opcode or a closed
/// stream, and [`SessionError::Transport`] on I/O or parse failure.
pub async fn expect<R>(
    reader: &mut InstructionReader<R>,
    opcode: &str,
) -> Result<Instruction, SessionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    match reader.read().await? {
        None => Err(SessionError::Handshake(format!(
            "connection closed while waiting for \"{opcode}\""
        ))),
        Some(ins) if ins.opcode() == opcode => Ok(ins),
        Some(ins) => Err(SessionError::Handshake(format!(
            "expected \"{opcode}\" instruction but received \"{}\"",
            ins.opcode()
        ))),
    }
}

/// Drives the full handshake and returns the connection uuid from `ready`.
///
/// # Errors
///
/// Fails with [`SessionError::Handshake`] when guacd answers with an
/// unexpected opcode or a `ready` without a connection id, or with a
/// transport error on I/O failure. The caller is responsible for closing the
/// connection on error.
pub async fn handshake<R, W>(
    reader: &mut InstructionReader<R>,
    writer: &mut InstructionWriter<W>,
    config: &Configuration,
) -> Result<String, SessionError>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    // Joining an existing connection takes priority over opening a new one.
    let select_arg = if config.connection_id.is_empty() {
        config.protocol.clone()
    } else {
        config.connection_id.clone()
    };
    writer.write(&Instruction::new("select", [select_arg])).await?;

    let args = expect(reader, "args").await?;

    writer
        .write(&Instruction::new(
            "size",
            [
                config.parameter(keys::WIDTH),
                config.parameter(keys::HEIGHT),
                config.parameter(keys::DPI),
            ],
        ))
        .await?;

    if config.parameter(keys::DISABLE_AUDIO) != "true" {
        writer
            .write(&Instruction::new("audio", ["audio/L8", "audio/L16"]))
            .await?;
    }

    writer.write(&Instruction::bare("video")).await?;
    writer.write(&Instruction::new("image", IMAGE_MIMETYPES)).await?;

    let timezone = match config.parameter(keys::TIMEZONE) {
        tz if tz.is_empty() => "UTC".to_string(),
        tz => tz,
    };
    writer.write(&Instruction::new("timezone", [timezone])).await?;

    let parameters: Vec<String> = args
        .args()
        .iter()
        .map(|name| {
            if name.contains("VERSION") {
                VERSION.to_string()
            } else {
                config.parameter(name)
            }
        })
        .collect();
    writer.write(&Instruction::new("connect", parameters)).await?;

    let ready = expect(reader, "ready").await?;
    match ready.arg(0) {
        Some(uuid) if !uuid.is_empty() => Ok(uuid.to_string()),
        _ => Err(SessionError::Handshake(
            "no connection id received".to_string(),
        )),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
