//! Test utilities for rust-usb-serial
//!
//! Provides mock device descriptions and helper functions for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{arduino_mega, create_mock_device_info};
//!
//! let device = create_mock_device_info(1, 0x1234, 0x5678);
//! assert_eq!(device.vendor_id, 0x1234);
//! assert_eq!(arduino_mega(2).product_id, 0x0010);
//! ```

use protocol::{DeviceId, DeviceInfo, Endpoint, TransferKind};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceInfo using data interface 1
pub fn create_mock_device_info(id: u32, vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId(id),
        vendor_id,
        product_id,
        interface_index: 1,
        bus_number: 1,
        device_address: (id % 128) as u8,
    }
}

/// Mock Arduino Mega 2560 (in the device catalog)
pub fn arduino_mega(id: u32) -> DeviceInfo {
    create_mock_device_info(id, 0x2341, 0x0010)
}

/// Mock LeafLabs Maple r5 (in the device catalog)
pub fn leaflabs_maple(id: u32) -> DeviceInfo {
    create_mock_device_info(id, 0x1EAF, 0x0004)
}

/// Mock FTDI adapter (not in the device catalog)
pub fn unknown_adapter(id: u32) -> DeviceInfo {
    create_mock_device_info(id, 0x0403, 0x6001)
}

/// Endpoint set of a CDC data interface: bulk OUT 0x02, bulk IN 0x83
pub fn cdc_data_endpoints() -> Vec<Endpoint> {
    vec![Endpoint::bulk(0x02, 64), Endpoint::bulk(0x83, 64)]
}

/// Interrupt IN endpoint (notification endpoint of a CDC control interface)
pub fn interrupt_in_endpoint(address: u8) -> Endpoint {
    Endpoint {
        transfer_type: TransferKind::Interrupt,
        ..Endpoint::bulk(address | 0x80, 16)
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Poll `condition` from a blocking test until it holds or `timeout` expires
///
/// Returns whether the condition was observed.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
