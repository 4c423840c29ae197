//! Error types for the engine

use ptt_protocol::ParseError;
use thiserror::Error;

/// Errors returned by engine operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PttError {
    /// Handle does not reference an allocated event
    #[error("handle does not reference a live event")]
    NullPointer,

    /// Argument out of range or malformed
    #[error("invalid value")]
    InvalidValue,

    /// Operation not valid in the current state
    #[error("invalid state")]
    InvalidState,

    /// Mode is out of range or not enabled
    #[error("invalid mode")]
    InvalidMode,

    /// Command not handled by the current mode
    #[error("invalid command")]
    InvalidCommand,

    /// Pool is exhausted
    #[error("no free slot")]
    NoFreeSlot,

    /// Resource is owned by someone else
    #[error("busy")]
    Busy,
}

impl From<ParseError> for PttError {
    fn from(_: ParseError) -> Self {
        PttError::InvalidValue
    }
}

/// Result alias used throughout the engine
pub type PttResult<T> = Result<T, PttError>;
