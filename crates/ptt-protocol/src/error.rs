//! Error types for wire and host protocol decoding

use thiserror::Error;

/// Errors that can occur while parsing host lines or wire frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line does not start with the `custom` keyword
    #[error("missing command prefix")]
    MissingPrefix,

    /// Unknown or unsupported command name
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Wrong number of arguments for the command
    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    /// Token is not a decimal or 0x-prefixed number
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// Number parsed but does not fit the field
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Hex string has a bad prefix, odd length or non-hex digits
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Declared length does not match decoded data
    #[error("length mismatch: declared {declared}, decoded {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Wire frame is shorter than its command requires
    #[error("truncated frame: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Byte does not map to a wire command
    #[error("unknown wire command: 0x{0:02X}")]
    UnknownWireCommand(u8),
}
