//! Decoder for the length-prefixed Guacamole wire grammar.
//!
//! Wire format, per instruction:
//!
//! ```text
//! element     := <decimal-length> "." <bytes of that length>
//! instruction := element ("," element)* ";"
//! ```
//!
//! The protocol documents element lengths as Unicode code point counts, but
//! every recording observed in the wild uses byte counts. The decoder
//! therefore validates the prefix as a bounded decimal number and takes the
//! element payload from the delimiter structure, which accepts either
//! convention.

use thiserror::Error;

use crate::protocol::instruction::Instruction;

/// Maximum number of bytes per instruction.
pub const INSTRUCTION_MAX_LENGTH: usize = 8192;

/// Maximum number of digits in an element length prefix.
pub const INSTRUCTION_MAX_DIGITS: usize = 5;

/// Maximum number of elements (opcode + arguments) per instruction.
pub const INSTRUCTION_MAX_ELEMENTS: usize = 128;

/// Errors produced while decoding a raw frame.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// An element is missing its `length.value` separator.
    #[error("instruction parse failed: element has no '.' separator")]
    ParseFailed,

    /// A length prefix contains a non-digit or exceeds
    /// [`INSTRUCTION_MAX_DIGITS`] digits.
    #[error("non-numeric or oversized length prefix: {prefix:?}")]
    InvalidLengthPrefix { prefix: String },

    /// The instruction carries more than [`INSTRUCTION_MAX_ELEMENTS`]
    /// elements.
    #[error("instruction contains {count} elements (maximum {INSTRUCTION_MAX_ELEMENTS})")]
    TooManyElements { count: usize },

    /// The raw frame exceeds [`INSTRUCTION_MAX_LENGTH`] bytes.
    #[error("instruction is {length} bytes long (maximum {INSTRUCTION_MAX_LENGTH})")]
    TooLong { length: usize },
}

// Two audio handshake frames that old guacd builds emit with an embedded
// ';' inside the mimetype, splitting one logical instruction across two
// terminators. Once the transport has stitched a frame back together it
// matches one of these strings and is substituted verbatim before parsing.
const LEGACY_AUDIO_ENABLED: &str = "5.audio,1.1,31.audio/L16;rate=44100,channels=2;";
const LEGACY_AUDIO_DISABLED: &str = "5.audio,1.0,31.audio/L16;rate=44100,channels=2;";

/// Decodes one raw frame (everything up to and including the `;` terminator)
/// into an [`Instruction`].
///
/// An empty frame decodes to the sentinel opcode `nop`.
///
/// # Errors
///
/// Returns [`CodecError`] when the frame violates the grammar or one of the
/// protocol limits.
///
/// # Examples
///
/// ```rust
/// use guac_core::protocol::codec::decode;
///
/// let ins = decode(b"5.error,5.hello,3.500;").unwrap();
/// assert_eq!(ins.opcode(), "error");
/// assert_eq!(ins.args(), ["hello", "500"]);
/// ```
pub fn decode(raw: &[u8]) -> Result<Instruction, CodecError> {
    if raw.is_empty() {
        return Ok(Instruction::bare("nop"));
    }

    let content = String::from_utf8_lossy(raw);

    if content == LEGACY_AUDIO_ENABLED {
        return Ok(Instruction::new("audio", ["1", "audio/L16;rate=44100,channels=2"]));
    }
    if content == LEGACY_AUDIO_DISABLED {
        return Ok(Instruction::new("audio", ["0", "audio/L16;rate=44100,channels=2"]));
    }

    if raw.len() > INSTRUCTION_MAX_LENGTH {
        return Err(CodecError::TooLong { length: raw.len() });
    }

    let content = content.strip_suffix(';').unwrap_or(&content);

    let elements: Vec<&str> = content.split(',').collect();
    if elements.len() > INSTRUCTION_MAX_ELEMENTS {
        return Err(CodecError::TooManyElements {
            count: elements.len(),
        });
    }

    let mut values = Vec::with_capacity(elements.len());
    for element in elements {
        let (prefix, value) = element.split_once('.').ok_or(CodecError::ParseFailed)?;

        if prefix.len() > INSTRUCTION_MAX_DIGITS
            || !prefix.chars().all(|c| c.is_ascii_digit())
        {
            return Err(CodecError::InvalidLengthPrefix {
                prefix: prefix.to_string(),
            });
        }

        values.push(value.to_string());
    }

    let mut values = values.into_iter();
    let opcode = values.next().unwrap_or_default();
    Ok(Instruction::new(opcode, values))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
