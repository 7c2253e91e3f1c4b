//! Protocol library for rust-usb-serial
//!
//! This crate defines the wire-level pieces of a serial-over-USB link:
//! device and endpoint descriptions, the CDC-ACM style line-coding control
//! requests understood by Arduino-class USB serial adapters, and the static
//! catalog of known compatible devices.
//!
//! # Example
//!
//! ```
//! use protocol::{LineConfig, build_baud_rate_request};
//!
//! let request = build_baud_rate_request(115_200);
//! assert_eq!(request, [0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08]);
//!
//! let config = LineConfig::default();
//! assert_eq!(config.encode(), request);
//! ```
//!
//! # Device catalog
//!
//! ```
//! use protocol::catalog::pretty_name;
//!
//! assert_eq!(pretty_name(0x2341, 0x0010), "Arduino Mega 2560 (2341:0010)");
//! assert_eq!(pretty_name(0x1234, 0x00AB), "Unknown (1234:00AB)");
//! ```

pub mod catalog;
pub mod error;
pub mod line_coding;
pub mod types;

pub use catalog::{CatalogEntry, KNOWN_DEVICES, format_device_id, parse_device_id};
pub use error::{ProtocolError, Result};
pub use line_coding::{
    ACTIVATE_REQUEST, ControlRequest, DEFAULT_BAUD_RATE, LINE_CODING_LEN, LineConfig,
    SET_LINE_CODING_REQUEST, build_baud_rate_request,
};
pub use types::{DeviceId, DeviceInfo, Direction, Endpoint, TransferKind, UsbError};
