//! libusb backend for the device access port
//!
//! Enumerates devices through a `rusb::Context` and opens them with
//! `rusb::DeviceHandle`. libusb has no interactive permission prompt, so
//! permission is probed by opening the device.

use crate::usb::access::{DeviceAccess, DeviceIo, PermissionCallback, PermissionOutcome};
use protocol::{DeviceId, DeviceInfo, Direction, Endpoint, TransferKind, UsbError};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// USB interface class of a CDC data interface
const CDC_DATA_CLASS: u8 = 0x0A;

/// Data interface assumed when no CDC data interface is advertised
const FALLBACK_DATA_INTERFACE: u8 = 1;

/// Device access through libusb
pub struct LibusbAccess {
    context: Context,
}

impl LibusbAccess {
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }

    /// Find the libusb device behind an enumerated `DeviceInfo`
    fn find_device(&self, info: &DeviceInfo) -> Result<Device<Context>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        devices
            .iter()
            .find(|d| d.bus_number() == info.bus_number && d.address() == info.device_address)
            .ok_or(UsbError::NotFound)
    }

    fn describe(device: &Device<Context>) -> Result<DeviceInfo, rusb::Error> {
        let desc = device.device_descriptor()?;
        let bus = device.bus_number();
        let address = device.address();

        Ok(DeviceInfo {
            id: DeviceId(((bus as u32) << 8) | address as u32),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            interface_index: data_interface(device).unwrap_or(FALLBACK_DATA_INTERFACE),
            bus_number: bus,
            device_address: address,
        })
    }
}

/// First interface whose class is CDC data
fn data_interface(device: &Device<Context>) -> Option<u8> {
    let config = device.active_config_descriptor().ok()?;
    config.interfaces().find_map(|interface| {
        interface
            .descriptors()
            .find(|d| d.class_code() == CDC_DATA_CLASS)
            .map(|d| d.interface_number())
    })
}

impl DeviceAccess for LibusbAccess {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let mut found = Vec::new();
        for device in devices.iter() {
            match Self::describe(&device) {
                Ok(info) => found.push(info),
                Err(e) => warn!(
                    "Skipping device at bus={}, addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        debug!("Enumerated {} devices", found.len());
        Ok(found)
    }

    fn has_permission(&self, device: &DeviceInfo) -> bool {
        let Ok(usb_device) = self.find_device(device) else {
            return false;
        };
        match usb_device.open() {
            Ok(_) => true,
            Err(rusb::Error::Access) => false,
            // Let open() report anything else
            Err(_) => true,
        }
    }

    fn request_permission(&self, device: &DeviceInfo, callback: PermissionCallback) {
        let outcome = if self.has_permission(device) {
            PermissionOutcome::Granted
        } else {
            warn!(
                "No access to device {}; check udev rules or group membership",
                device.id
            );
            PermissionOutcome::Denied
        };
        callback(device.clone(), outcome);
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn DeviceIo>, UsbError> {
        let usb_device = self.find_device(device)?;
        let handle = usb_device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", device.id, e);
            map_rusb_error(e)
        })?;

        debug!("Opened device {}", device.id);
        Ok(Box::new(LibusbDevice {
            handle,
            claimed: Vec::new(),
        }))
    }
}

/// Opened libusb device
pub struct LibusbDevice {
    handle: DeviceHandle<Context>,
    /// Claimed interfaces, and whether a kernel driver was detached from each
    claimed: Vec<(u8, bool)>,
}

impl DeviceIo for LibusbDevice {
    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        let detached = match self.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                match self.handle.detach_kernel_driver(interface) {
                    Ok(()) => true,
                    Err(e) => {
                        // Claiming will most likely fail next
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        );
                        false
                    }
                }
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        self.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)?;
        debug!("Claimed interface {}", interface);
        self.claimed.push((interface, detached));
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        let position = self.claimed.iter().position(|(i, _)| *i == interface);
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)?;
        debug!("Released interface {}", interface);

        if let Some(position) = position {
            let (_, detached) = self.claimed.remove(position);
            if detached && let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }
        Ok(())
    }

    fn interface_endpoints(&self, interface: u8) -> Result<Vec<Endpoint>, UsbError> {
        let config = self
            .handle
            .device()
            .active_config_descriptor()
            .map_err(map_rusb_error)?;

        let iface = config
            .interfaces()
            .find(|i| i.number() == interface)
            .ok_or(UsbError::NotFound)?;

        // Alternate setting 0 is the active one after claiming
        let endpoints = iface
            .descriptors()
            .next()
            .map(|desc| {
                desc.endpoint_descriptors()
                    .map(|ep| Endpoint {
                        address: ep.address(),
                        direction: map_direction(ep.direction()),
                        transfer_type: map_transfer_type(ep.transfer_type()),
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(endpoints)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
            .map_err(map_rusb_error)
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(map_rusb_error)
    }
}

impl Drop for LibusbDevice {
    fn drop(&mut self) {
        for (interface, _) in self.claimed.clone() {
            if let Err(e) = self.release_interface(interface) {
                debug!("Failed to release interface {} on close: {}", interface, e);
            }
        }
    }
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
