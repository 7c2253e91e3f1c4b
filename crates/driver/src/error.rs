//! Connection error types
//!
//! None of these cross the `connect`/`disconnect` boundary as a return
//! value; they are delivered to the handler's `on_error`.

use protocol::UsbError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The platform refused access to the device
    #[error("Permission denied for device {device}")]
    PermissionDenied { device: String },

    /// The device could not be opened
    #[error("Failed to open device {device}: {source}")]
    OpenFailed {
        device: String,
        #[source]
        source: UsbError,
    },

    /// The data interface could not be claimed
    #[error("Failed to claim interface {interface} on device {device}: {source}")]
    InterfaceClaimFailed {
        device: String,
        interface: u8,
        #[source]
        source: UsbError,
    },

    /// A transfer loop thread could not be started
    #[error("Failed to start {direction} transfer loop: {message}")]
    SpawnFailed {
        direction: &'static str,
        message: String,
    },
}
