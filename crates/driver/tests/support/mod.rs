//! Scripted device backend for connection tests
//!
//! `MockAccess` enumerates a fixed device list and answers permission
//! requests according to a `PermissionMode`. Every device it opens shares
//! one `MockState`, which scripts bulk reads and records control transfers,
//! bulk writes, claims, releases and closes.

#![allow(dead_code)]

use common::test_utils::{DEFAULT_TEST_TIMEOUT, cdc_data_endpoints, wait_until};
use driver::usb::{LoopSettings, PermissionCallback, PermissionOutcome};
use driver::{ConnectionEvent, ConnectionSettings, DeviceAccess, DeviceIo};
use parking_lot::Mutex;
use protocol::{DeviceInfo, Endpoint, UsbError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One recorded control transfer: (request_type, request, value, index, data)
pub type ControlCall = (u8, u8, u16, u16, Vec<u8>);

/// How `MockAccess` answers permission checks and requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Permission already held
    Granted,
    /// Not held; requests are stored until the test resolves them
    Deferred,
    /// Not held; requests are denied synchronously
    Denied,
}

/// Behaviour and recordings shared by every handle the backend opens
pub struct MockState {
    pub endpoints: Mutex<Vec<Endpoint>>,
    pub reads: Mutex<VecDeque<Result<Vec<u8>, UsbError>>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub write_endpoints: Mutex<Vec<u8>>,
    pub last_read_endpoint: Mutex<Option<u8>>,
    pub controls: Mutex<Vec<ControlCall>>,
    pub claimed: Mutex<Vec<u8>>,
    pub released: Mutex<Vec<u8>>,
    pub claim_error: Mutex<Option<UsbError>>,
    pub control_error: Mutex<Option<UsbError>>,
    /// Bytes accepted per bulk write; unlimited when `None`
    pub write_limit: Mutex<Option<usize>>,
    pub closed: AtomicUsize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            endpoints: Mutex::new(cdc_data_endpoints()),
            reads: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            write_endpoints: Mutex::new(Vec::new()),
            last_read_endpoint: Mutex::new(None),
            controls: Mutex::new(Vec::new()),
            claimed: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            claim_error: Mutex::new(None),
            control_error: Mutex::new(None),
            write_limit: Mutex::new(None),
            closed: AtomicUsize::new(0),
        }
    }
}

impl MockState {
    /// Queue a frame for the next bulk read
    pub fn push_read(&self, frame: &[u8]) {
        self.reads.lock().push_back(Ok(frame.to_vec()));
    }

    /// Make a later bulk read fail
    pub fn push_read_error(&self, err: UsbError) {
        self.reads.lock().push_back(Err(err));
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn controls(&self) -> Vec<ControlCall> {
        self.controls.lock().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Scripted `DeviceAccess`
pub struct MockAccess {
    pub devices: Mutex<Vec<DeviceInfo>>,
    pub state: Arc<MockState>,
    pub permission: Mutex<PermissionMode>,
    pub pending: Mutex<Vec<(DeviceInfo, PermissionCallback)>>,
    pub open_error: Mutex<Option<UsbError>>,
    pub opens: AtomicUsize,
    pub permission_requests: AtomicUsize,
}

impl MockAccess {
    pub fn new(devices: Vec<DeviceInfo>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            state: Arc::new(MockState::default()),
            permission: Mutex::new(PermissionMode::Granted),
            pending: Mutex::new(Vec::new()),
            open_error: Mutex::new(None),
            opens: AtomicUsize::new(0),
            permission_requests: AtomicUsize::new(0),
        })
    }

    pub fn with_permission(devices: Vec<DeviceInfo>, mode: PermissionMode) -> Arc<Self> {
        let access = Self::new(devices);
        *access.permission.lock() = mode;
        access
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Answer every stored permission request with `outcome`
    pub fn resolve_pending(&self, outcome: PermissionOutcome) {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for (device, callback) in pending {
            callback(device, outcome);
        }
    }

    /// Answer the stored requests as if they were for `device`
    pub fn resolve_pending_as(&self, device: &DeviceInfo, outcome: PermissionOutcome) {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for (_, callback) in pending {
            callback(device.clone(), outcome);
        }
    }
}

impl DeviceAccess for MockAccess {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, UsbError> {
        Ok(self.devices.lock().clone())
    }

    fn has_permission(&self, _device: &DeviceInfo) -> bool {
        *self.permission.lock() == PermissionMode::Granted
    }

    fn request_permission(&self, device: &DeviceInfo, callback: PermissionCallback) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let mode = *self.permission.lock();
        match mode {
            PermissionMode::Granted => callback(device.clone(), PermissionOutcome::Granted),
            PermissionMode::Denied => callback(device.clone(), PermissionOutcome::Denied),
            PermissionMode::Deferred => self.pending.lock().push((device.clone(), callback)),
        }
    }

    fn open(&self, _device: &DeviceInfo) -> Result<Box<dyn DeviceIo>, UsbError> {
        if let Some(err) = self.open_error.lock().clone() {
            return Err(err);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockIo {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Opened mock device
pub struct MockIo {
    state: Arc<MockState>,
}

impl DeviceIo for MockIo {
    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        if let Some(err) = self.state.claim_error.lock().clone() {
            return Err(err);
        }
        self.state.claimed.lock().push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.state.released.lock().push(interface);
        Ok(())
    }

    fn interface_endpoints(&self, _interface: u8) -> Result<Vec<Endpoint>, UsbError> {
        Ok(self.state.endpoints.lock().clone())
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.state
            .controls
            .lock()
            .push((request_type, request, value, index, data.to_vec()));
        match self.state.control_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(data.len()),
        }
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbError> {
        *self.state.last_read_endpoint.lock() = Some(endpoint);
        let next = self.state.reads.lock().pop_front();
        match next {
            Some(Ok(frame)) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            Some(Err(err)) => Err(err),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Err(UsbError::Timeout)
            }
        }
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize, UsbError> {
        let accepted = match *self.state.write_limit.lock() {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        self.state.write_endpoints.lock().push(endpoint);
        self.state.writes.lock().push(data.to_vec());
        Ok(accepted)
    }
}

impl Drop for MockIo {
    fn drop(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connection settings with short timeouts
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        join_timeout: Duration::from_secs(2),
        loops: LoopSettings {
            read_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_millis(100),
            idle_pause: Duration::from_millis(1),
            ..LoopSettings::default()
        },
        ..ConnectionSettings::default()
    }
}

/// Wait for the next event on a handler channel
pub fn next_event(rx: &async_channel::Receiver<ConnectionEvent>) -> Option<ConnectionEvent> {
    let mut event = None;
    wait_until(DEFAULT_TEST_TIMEOUT, || {
        event = rx.try_recv().ok();
        event.is_some()
    });
    event
}

/// Drain whatever events are queued right now
pub fn drain_events(rx: &async_channel::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}
