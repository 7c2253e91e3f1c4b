//! Serial-over-USB link driver
//!
//! Connects to a USB CDC serial adapter, configures its line coding and
//! shuttles opaque frames in both directions on two transfer loop threads.
//!
//! ```no_run
//! use driver::{ChannelHandler, ConnectionManager, ConnectionSettings, LibusbAccess};
//! use std::sync::Arc;
//!
//! let access = Arc::new(LibusbAccess::new()?);
//! let manager = ConnectionManager::new(access, ConnectionSettings::default());
//! let (handler, events) = ChannelHandler::new();
//! manager.set_connection_handler(Arc::new(handler));
//!
//! if let Some(device) = manager.get_compatible_device() {
//!     manager.connect(&device);
//!     manager.queue_message(&b"hello\n"[..]);
//! }
//! # drop(events);
//! # Ok::<(), protocol::UsbError>(())
//! ```

pub mod config;
pub mod error;
pub mod usb;

pub use config::DriverConfig;
pub use error::ConnectError;
pub use usb::{
    ChannelHandler, ConnectionEvent, ConnectionHandler, ConnectionManager, ConnectionSettings,
    ConnectionState, DeviceAccess, DeviceIo, LibusbAccess, LoopStatus, PermissionCallback,
    PermissionOutcome,
};
