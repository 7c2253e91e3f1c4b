//! Static catalog of compatible devices
//!
//! Identities are formatted as `VVVV:PPPP`: vendor and product id as four
//! uppercase, zero-padded hex digits.

use crate::error::{ProtocolError, Result};
use crate::types::DeviceInfo;

/// Known compatible device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
}

impl CatalogEntry {
    pub const fn new(vendor_id: u16, product_id: u16, name: &'static str) -> Self {
        Self {
            vendor_id,
            product_id,
            name,
        }
    }

    /// `VVVV:PPPP` identity of this entry
    pub fn device_id(&self) -> String {
        format_device_id(self.vendor_id, self.product_id)
    }
}

/// Devices this driver knows how to talk to
pub const KNOWN_DEVICES: &[CatalogEntry] = &[
    CatalogEntry::new(0x2341, 0x0010, "Arduino Mega 2560"),
    CatalogEntry::new(0x1EAF, 0x0004, "LeafLabs Maple (r5)"),
];

/// Format a vendor/product pair as `VVVV:PPPP`
pub fn format_device_id(vendor_id: u16, product_id: u16) -> String {
    format!("{:04X}:{:04X}", vendor_id, product_id)
}

/// Parse a `VVVV:PPPP` identity (case-insensitive, optional `0x` prefixes)
pub fn parse_device_id(id: &str) -> Result<(u16, u16)> {
    let invalid = || ProtocolError::InvalidDeviceId(id.to_string());

    let (vid, pid) = id.trim().split_once(':').ok_or_else(invalid)?;
    let parse = |part: &str| {
        let hex = part
            .strip_prefix("0x")
            .or_else(|| part.strip_prefix("0X"))
            .unwrap_or(part);
        if hex.is_empty() || hex.len() > 4 {
            return Err(invalid());
        }
        u16::from_str_radix(hex, 16).map_err(|_| invalid())
    };

    Ok((parse(vid)?, parse(pid)?))
}

/// Look up a vendor/product pair in the catalog
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static CatalogEntry> {
    KNOWN_DEVICES
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

/// Whether a device appears in the catalog
pub fn is_compatible(device: &DeviceInfo) -> bool {
    lookup(device.vendor_id, device.product_id).is_some()
}

/// Display name of a vendor/product pair, e.g. `Arduino Mega 2560 (2341:0010)`
///
/// Devices missing from the catalog are named `Unknown`.
pub fn pretty_name(vendor_id: u16, product_id: u16) -> String {
    let name = lookup(vendor_id, product_id)
        .map(|entry| entry.name)
        .unwrap_or("Unknown");
    format!("{} ({})", name, format_device_id(vendor_id, product_id))
}

/// [`pretty_name`] for an enumerated device
pub fn pretty_device_name(device: &DeviceInfo) -> String {
    pretty_name(device.vendor_id, device.product_id)
}
