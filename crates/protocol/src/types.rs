//! USB type definitions
//!
//! This module defines the USB-related types shared by the driver and its
//! device-access backends: device identity, endpoint descriptions and
//! transfer error conditions.

use std::fmt;
use thiserror::Error;

/// Raw device identifier assigned by the device-access backend
///
/// Only used for logging; catalog identity is the vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Device information returned by enumeration
///
/// Immutable once enumerated. The backend uses `bus_number` and
/// `device_address` to locate the physical device again when opening it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-assigned identifier (logging only)
    pub id: DeviceId,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Interface carrying the bulk data endpoints
    pub interface_index: u8,
    /// Bus number on the host
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
}

impl DeviceInfo {
    /// Returns true when both devices refer to the same enumerated device
    pub fn same_device(&self, other: &DeviceInfo) -> bool {
        self.id == other.id
            && self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
    }
}

/// Endpoint direction, as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address
    pub fn from_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint of a claimed interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint address (includes direction bit)
    pub address: u8,
    /// Transfer direction
    pub direction: Direction,
    /// Transfer type
    pub transfer_type: TransferKind,
    /// Maximum packet size in bytes
    pub max_packet_size: u16,
}

impl Endpoint {
    /// Create a bulk endpoint, deriving the direction from the address
    pub fn bulk(address: u8, max_packet_size: u16) -> Self {
        Self {
            address,
            direction: Direction::from_address(address),
            transfer_type: TransferKind::Bulk,
            max_packet_size,
        }
    }

    /// Whether this is a bulk endpoint in the given direction
    pub fn is_bulk(&self, direction: Direction) -> bool {
        self.transfer_type == TransferKind::Bulk && self.direction == direction
    }
}

/// USB error types
///
/// Maps to libusb error codes. See rusb::Error for details.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("not found")]
    NotFound,
    /// Device is busy
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("i/o error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_address() {
        assert_eq!(Direction::from_address(0x81), Direction::In);
        assert_eq!(Direction::from_address(0x02), Direction::Out);
    }

    #[test]
    fn test_bulk_endpoint() {
        let ep = Endpoint::bulk(0x83, 64);
        assert!(ep.is_bulk(Direction::In));
        assert!(!ep.is_bulk(Direction::Out));
    }

    #[test]
    fn test_same_device() {
        let a = DeviceInfo {
            id: DeviceId(7),
            vendor_id: 0x2341,
            product_id: 0x0010,
            interface_index: 1,
            bus_number: 1,
            device_address: 7,
        };
        let mut b = a.clone();
        assert!(a.same_device(&b));

        b.id = DeviceId(8);
        assert!(!a.same_device(&b));
    }

    #[test]
    fn test_usb_error_display() {
        assert_eq!(UsbError::Timeout.to_string(), "transfer timed out");
        let other = UsbError::Other {
            message: "boom".to_string(),
        };
        assert_eq!(other.to_string(), "boom");
    }
}
