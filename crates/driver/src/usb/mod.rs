//! USB side of the driver
//!
//! - [`access`]: the device access port and opened-device handle traits
//! - [`libusb`]: the `rusb` implementation of that port
//! - [`line`]: activation and line-coding control transfers
//! - [`worker`]: inbound and outbound transfer loop threads
//! - [`manager`]: connection lifecycle on top of all of the above

pub mod access;
pub mod handler;
pub mod libusb;
pub mod line;
pub mod manager;
pub mod worker;

pub use access::{DeviceAccess, DeviceIo, PermissionCallback, PermissionOutcome};
pub use handler::{ChannelHandler, ConnectionEvent, ConnectionHandler, NoopHandler};
pub use libusb::LibusbAccess;
pub use line::LineConfigurator;
pub use manager::{ConnectionManager, ConnectionSettings, ConnectionState, LoopStatus};
pub use worker::{LoopDirection, LoopSettings};
