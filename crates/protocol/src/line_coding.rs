//! Line coding for Arduino-style USB serial adapters
//!
//! The adapter is configured with two class requests sent to interface 0:
//! an activation request with no data stage, followed by a 7 byte
//! line-coding record carrying the baud rate and frame format.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Baud rate used when none is configured
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Length of the line-coding data stage
pub const LINE_CODING_LEN: usize = 7;

/// Host-to-device, class, interface
const REQUEST_TYPE_CLASS_INTERFACE_OUT: u8 = 0x21;

/// Setup packet of a control request (everything except the data stage)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
}

/// Activates the serial interface. Must precede [`SET_LINE_CODING_REQUEST`].
pub const ACTIVATE_REQUEST: ControlRequest = ControlRequest {
    request_type: REQUEST_TYPE_CLASS_INTERFACE_OUT,
    request: 34,
    value: 0,
    index: 0,
};

/// Sets baud rate and frame format; data stage is [`build_baud_rate_request`].
pub const SET_LINE_CODING_REQUEST: ControlRequest = ControlRequest {
    request_type: REQUEST_TYPE_CLASS_INTERFACE_OUT,
    request: 32,
    value: 0,
    index: 0,
};

/// Serial line parameters
///
/// Only the baud rate is configurable; this driver always uses 8 data bits,
/// one stop bit (encoded 0) and no parity (encoded 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: u8,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl LineConfig {
    /// Line config with the driver's fixed frame format
    pub const fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            stop_bits: 0,
            parity: 0,
        }
    }

    /// Like [`LineConfig::new`] but rejects a zero baud rate
    pub fn checked(baud_rate: u32) -> Result<Self> {
        if baud_rate == 0 {
            return Err(ProtocolError::InvalidBaudRate(baud_rate));
        }
        Ok(Self::new(baud_rate))
    }

    /// Encode as the line-coding data stage
    pub fn encode(&self) -> [u8; LINE_CODING_LEN] {
        let mut buf = [0u8; LINE_CODING_LEN];
        LittleEndian::write_u32(&mut buf[..4], self.baud_rate);
        buf[4] = self.stop_bits;
        buf[5] = self.parity;
        buf[6] = self.data_bits;
        buf
    }
}

/// Build the line-coding data stage for `baud`
///
/// Layout: baud rate (little endian, 4 bytes), stop bits, parity, data bits.
pub fn build_baud_rate_request(baud: u32) -> [u8; LINE_CODING_LEN] {
    LineConfig::new(baud).encode()
}
