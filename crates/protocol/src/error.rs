//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Device identity string is not in `VVVV:PPPP` form
    #[error("Invalid device id '{0}', expected VVVV:PPPP (e.g. '2341:0010')")]
    InvalidDeviceId(String),

    /// Baud rate of zero cannot be encoded
    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
