//! Framed instruction I/O over byte-oriented channels.
//!
//! The Guacamole wire format is `;`-terminated, so the reader simply
//! accumulates bytes up to and including the next terminator. TCP gives no
//! framing guarantees, and recordings are a raw concatenation of frames, so
//! a buffered `read_until` is the whole story — with two quirks inherited
//! from old guacd builds, documented on [`InstructionReader::read_raw`].

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::trace;

use crate::protocol::codec::{self, CodecError};
use crate::protocol::instruction::Instruction;

/// The instruction terminator byte.
pub const TERMINATOR: u8 = b';';

/// Errors surfaced by the framed reader.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying byte channel failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer delivered a frame that violates the wire grammar.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// Frames that legacy guacd builds split off an audio instruction. The
// stray parameter line is collapsed to an empty payload (decoded upstream
// as `nop`), and a truncated audio frame is completed with the parameter
// line it is known to be missing.
const STRAY_AUDIO_44100: &[u8] = b"rate=44100,channels=2;";
const STRAY_AUDIO_22050: &[u8] = b"rate=22050,channels=2;";
const TRUNCATED_AUDIO: &[u8] = b"5.audio,1.1,31.audio/L16;";
const TRUNCATED_AUDIO_REST: &[u8] = b"rate=44100,channels=2;";

/// Reads `;`-terminated frames from a buffered byte stream.
pub struct InstructionReader<R> {
    inner: R,
}

impl<R> InstructionReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next raw frame, up to and including the terminator.
    ///
    /// Returns `Ok(None)` at clean end of stream. An empty frame
    /// (`Ok(Some(vec![]))`) is a valid result: the two stray audio parameter
    /// lines collapse to it and are decoded upstream as `nop`.
    ///
    /// Legacy fixups, preserved from the original wire behaviour:
    ///
    /// - `rate=44100,channels=2;` and `rate=22050,channels=2;` standing alone
    ///   are the tail of an audio instruction whose head was already consumed;
    ///   they collapse to an empty payload.
    /// - `5.audio,1.1,31.audio/L16;` is the head of that same split
    ///   instruction; the expected parameter line is appended so the frame
    ///   parses whole. The tail then arrives as a stray line and collapses.
    pub async fn read_raw(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut frame = Vec::new();
        let n = self.inner.read_until(TERMINATOR, &mut frame).await?;
        if n == 0 {
            return Ok(None);
        }
        trace!(frame = %String::from_utf8_lossy(&frame), "<-");

        if frame == STRAY_AUDIO_44100 || frame == STRAY_AUDIO_22050 {
            return Ok(Some(Vec::new()));
        }
        if frame == TRUNCATED_AUDIO {
            frame.extend_from_slice(TRUNCATED_AUDIO_REST);
        }
        Ok(Some(frame))
    }

    /// Reads and decodes the next instruction.
    ///
    /// Returns `Ok(None)` at clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on I/O failure or a malformed frame.
    pub async fn read(&mut self) -> Result<Option<Instruction>, TransportError> {
        match self.read_raw().await? {
            None => Ok(None),
            Some(frame) => Ok(Some(codec::decode(&frame)?)),
        }
    }
}

/// Writes instructions to a buffered byte sink, flushing after each one.
pub struct InstructionWriter<W> {
    inner: BufWriter<W>,
}

impl<W> InstructionWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Writes a raw buffer and flushes.
    pub async fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(buf).await?;
        self.inner.flush().await?;
        trace!(frame = %String::from_utf8_lossy(buf), "->");
        Ok(())
    }

    /// Serialises and writes one instruction.
    pub async fn write(&mut self, ins: &Instruction) -> std::io::Result<()> {
        self.write_raw(ins.encode().as_bytes()).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
