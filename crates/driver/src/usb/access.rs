//! Device access port
//!
//! The connection manager never talks to a USB stack directly. A backend
//! implements [`DeviceAccess`] for enumeration and permission handling and
//! hands out [`DeviceIo`] handles for the transfers themselves. The libusb
//! backend lives in [`crate::usb::libusb`]; tests supply scripted mocks.

use protocol::{DeviceInfo, Endpoint, UsbError};
use std::time::Duration;

/// Result of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
}

/// Invoked once with the outcome of [`DeviceAccess::request_permission`]
///
/// May be called from any thread, including synchronously from inside
/// `request_permission`.
pub type PermissionCallback = Box<dyn FnOnce(DeviceInfo, PermissionOutcome) + Send + 'static>;

/// Host platform device enumeration and access
pub trait DeviceAccess: Send + Sync + 'static {
    /// Currently attached devices, in the platform's enumeration order
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, UsbError>;

    /// Whether the process may open `device` right now
    fn has_permission(&self, device: &DeviceInfo) -> bool;

    /// Ask the platform for access; the answer arrives through `callback`
    fn request_permission(&self, device: &DeviceInfo, callback: PermissionCallback);

    /// Open `device` for transfers
    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn DeviceIo>, UsbError>;
}

/// An opened device
///
/// Transfer methods take `&self` so the inbound and outbound loops can share
/// one handle. Claiming and releasing need exclusive access.
pub trait DeviceIo: Send + Sync + 'static {
    /// Claim exclusive use of an interface
    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Release a previously claimed interface
    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Endpoints of `interface`, in descriptor order
    fn interface_endpoints(&self, interface: u8) -> Result<Vec<Endpoint>, UsbError>;

    /// Host-to-device control transfer, returns bytes transferred
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Bulk read; `Err(UsbError::Timeout)` means no data arrived in time
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration)
    -> Result<usize, UsbError>;

    /// Bulk write, returns bytes actually written
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError>;
}
