//! The Guacamole instruction value type.
//!
//! An instruction is an opcode plus an ordered list of string arguments.
//! Arguments are arbitrary byte strings carried as text; binary payloads
//! (image chunks) are base64-encoded at the wire level and remain opaque
//! strings here.
//!
//! The wire form (`<len>.<opcode>,<len>.<arg>,...;`) is derived lazily and
//! memoised, so an instruction that is written to several peers is only
//! serialised once.

use std::fmt;
use std::sync::OnceLock;

/// A single Guacamole protocol message.
///
/// # Examples
///
/// ```rust
/// use guac_core::Instruction;
///
/// let ins = Instruction::new("size", ["0", "1024", "768"]);
/// assert_eq!(ins.encode(), "4.size,1.0,4.1024,3.768;");
/// ```
#[derive(Debug)]
pub struct Instruction {
    opcode: String,
    args: Vec<String>,
    /// Memoised wire form; populated on the first call to [`encode`].
    ///
    /// [`encode`]: Instruction::encode
    wire: OnceLock<String>,
}

impl Instruction {
    /// Creates an instruction from an opcode and its arguments.
    pub fn new<O, A, S>(opcode: O, args: A) -> Self
    where
        O: Into<String>,
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opcode: opcode.into(),
            args: args.into_iter().map(Into::into).collect(),
            wire: OnceLock::new(),
        }
    }

    /// Creates an instruction with no arguments, e.g. `disconnect` or `video`.
    pub fn bare<O: Into<String>>(opcode: O) -> Self {
        Self::new(opcode, Vec::<String>::new())
    }

    /// The opcode identifying the instruction's kind.
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// The ordered arguments following the opcode.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns argument `index`, or `None` when the instruction is shorter.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Returns the length-prefixed wire form, terminated by `;`.
    ///
    /// The result is computed once and cached, so repeated writes of the same
    /// instruction are idempotent and free of re-serialisation cost.
    pub fn encode(&self) -> &str {
        self.wire.get_or_init(|| {
            // Lengths are byte counts, matching what recordings contain in
            // practice (see the codec module for the prefix-semantics note).
            let mut out = format!("{}.{}", self.opcode.len(), self.opcode);
            for arg in &self.args {
                out.push(',');
                out.push_str(&format!("{}.{}", arg.len(), arg));
            }
            out.push(';');
            out
        })
    }
}

impl Clone for Instruction {
    fn clone(&self) -> Self {
        let wire = OnceLock::new();
        if let Some(cached) = self.wire.get() {
            let _ = wire.set(cached.clone());
        }
        Self {
            opcode: self.opcode.clone(),
            args: self.args.clone(),
            wire,
        }
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        // The memoised wire form is derived state and does not participate
        // in equality.
        self.opcode == other.opcode && self.args == other.args
    }
}

impl Eq for Instruction {}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_opcode_only() {
        let ins = Instruction::bare("disconnect");
        assert_eq!(ins.encode(), "10.disconnect;");
    }

    #[test]
    fn test_encode_with_arguments() {
        let ins = Instruction::new("error", ["hello", "500"]);
        assert_eq!(ins.encode(), "5.error,5.hello,3.500;");
    }

    #[test]
    fn test_encode_empty_argument() {
        let ins = Instruction::new("connect", ["", "admin"]);
        assert_eq!(ins.encode(), "7.connect,0.,5.admin;");
    }

    #[test]
    fn test_encode_is_memoised() {
        let ins = Instruction::new("sync", ["12345"]);
        let first = ins.encode() as *const str;
        let second = ins.encode() as *const str;
        assert_eq!(first, second, "repeated encodes must return the cached form");
    }

    #[test]
    fn test_clone_preserves_cached_wire_form() {
        let ins = Instruction::new("size", ["0", "800", "600"]);
        let wire = ins.encode().to_string();
        let cloned = ins.clone();
        assert_eq!(cloned.encode(), wire);
    }

    #[test]
    fn test_equality_ignores_memoisation() {
        let encoded = Instruction::new("mouse", ["10", "20"]);
        let _ = encoded.encode();
        let fresh = Instruction::new("mouse", ["10", "20"]);
        assert_eq!(encoded, fresh);
    }

    #[test]
    fn test_display_matches_encode() {
        let ins = Instruction::new("select", ["vnc"]);
        assert_eq!(ins.to_string(), "6.select,3.vnc;");
    }

    #[test]
    fn test_arg_accessor_out_of_range() {
        let ins = Instruction::new("blob", ["1", "QUJD"]);
        assert_eq!(ins.arg(1), Some("QUJD"));
        assert_eq!(ins.arg(2), None);
    }
}
