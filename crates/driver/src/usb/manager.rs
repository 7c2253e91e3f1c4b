//! Connection manager
//!
//! Drives one serial link at a time through
//! `Idle -> (AwaitingPermission) -> Connecting -> Connected -> Disconnecting -> Idle`.
//!
//! Two locks are involved. `ops` serializes `connect`, `disconnect` and
//! permission results coming from callers; it is held across blocking work
//! such as opening the device and joining the loops. `session` guards the
//! active link and is only ever held briefly, so status queries and a
//! `disconnect` issued from a loop's own handler callback never wait behind
//! a join. Handler callbacks for lifecycle events run after both locks are
//! released.
//!
//! The loop threads' ids outlive the session's link: they are dropped only
//! after teardown has joined the loops, so a `disconnect` from a loop's
//! handler is recognised even while another caller is joining that loop.

use crate::error::ConnectError;
use crate::usb::access::{DeviceAccess, DeviceIo, PermissionOutcome};
use crate::usb::handler::{ConnectionHandler, HandlerSlot, NoopHandler};
use crate::usb::line::LineConfigurator;
use crate::usb::worker::{
    LoopContext, LoopDirection, LoopHandle, LoopSettings, spawn_inbound, spawn_outbound,
};
use bytes::Bytes;
use common::{LinkMetrics, OutboundQueue};
use parking_lot::Mutex;
use protocol::catalog::{is_compatible, pretty_device_name};
use protocol::{DeviceInfo, Direction, LineConfig};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings applied to every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Line coding sent after the activation transfer
    pub line: LineConfig,
    /// Timeout of each configuration control transfer
    pub control_timeout: Duration,
    /// Upper bound on waiting for each loop to exit during teardown
    pub join_timeout: Duration,
    pub loops: LoopSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            line: LineConfig::default(),
            control_timeout: Duration::from_millis(1000),
            join_timeout: Duration::from_secs(2),
            loops: LoopSettings::default(),
        }
    }
}

/// Lifecycle state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    AwaitingPermission = 1,
    Connecting = 2,
    Connected = 3,
    Disconnecting = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::AwaitingPermission,
            2 => ConnectionState::Connecting,
            3 => ConnectionState::Connected,
            4 => ConnectionState::Disconnecting,
            _ => ConnectionState::Idle,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::AwaitingPermission => "awaiting permission",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Running flags of the most recently started loops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStatus {
    pub inbound: bool,
    pub outbound: bool,
}

/// Lifecycle event waiting to be delivered to the handler
enum Notice {
    Connected,
    Disconnected,
    Error(ConnectError),
}

struct ActiveLink {
    device: DeviceInfo,
    io: Arc<dyn DeviceIo>,
    cancel: CancellationToken,
    inbound: Option<LoopHandle>,
    outbound: Option<LoopHandle>,
}

#[derive(Default)]
struct Session {
    pending: Option<DeviceInfo>,
    active: Option<ActiveLink>,
    inbound_running: Option<Arc<AtomicBool>>,
    outbound_running: Option<Arc<AtomicBool>>,
}

struct Inner {
    access: Arc<dyn DeviceAccess>,
    handler: Arc<HandlerSlot>,
    queue: OutboundQueue,
    metrics: Arc<LinkMetrics>,
    settings: ConnectionSettings,
    state: AtomicU8,
    ops: Mutex<()>,
    session: Mutex<Session>,
    /// Threads of the current loops, kept until teardown has joined them
    loop_threads: Mutex<Vec<ThreadId>>,
}

/// Owns the connection to one serial adapter at a time
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create an idle manager on top of a device access backend
    pub fn new(access: Arc<dyn DeviceAccess>, settings: ConnectionSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                access,
                handler: Arc::new(HandlerSlot::new(Arc::new(NoopHandler))),
                queue: OutboundQueue::new(),
                metrics: Arc::new(LinkMetrics::new()),
                settings,
                state: AtomicU8::new(ConnectionState::Idle as u8),
                ops: Mutex::new(()),
                session: Mutex::new(Session::default()),
                loop_threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Replace the event handler
    ///
    /// Takes effect for every later callback, including frames delivered
    /// by an inbound loop that is already running.
    pub fn set_connection_handler(&self, handler: Arc<dyn ConnectionHandler>) {
        self.inner.handler.replace(handler);
    }

    /// Connect to `device`, tearing down any active connection first
    ///
    /// Returns once the device is connected, the attempt has failed (reported
    /// through `on_error`), or a permission request is outstanding.
    pub fn connect(&self, device: &DeviceInfo) {
        let inner = &self.inner;
        let mut notices = Vec::new();
        let ops = inner.ops.lock();

        inner.teardown_active(&mut notices);

        if !inner.access.has_permission(device) {
            info!(
                "No permission for {}, requesting it",
                pretty_device_name(device)
            );
            inner.session.lock().pending = Some(device.clone());
            inner.set_state(ConnectionState::AwaitingPermission);
            drop(ops);
            inner.dispatch(notices);

            // The backend may answer synchronously, so no lock is held here
            let weak: Weak<Inner> = Arc::downgrade(inner);
            inner.access.request_permission(
                device,
                Box::new(move |device, outcome| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_permission_result(device, outcome);
                    }
                }),
            );
            return;
        }

        inner.do_connect(device, &mut notices);
        drop(ops);
        inner.dispatch(notices);
    }

    /// Tear down the active connection, if any
    ///
    /// Cancels both loops, waits for them up to the join timeout, discards
    /// pending outbound frames and releases the interface. Also abandons an
    /// outstanding permission request. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let mut notices = Vec::new();

        if inner.on_loop_thread() {
            // The thread holding `ops` may be joining this very loop
            inner.teardown_active(&mut notices);
        } else {
            let _ops = inner.ops.lock();
            inner.teardown_active(&mut notices);
        }

        inner.dispatch(notices);
    }

    /// Queue a frame for the outbound loop
    ///
    /// Never blocks. Frames queued while no outbound loop runs stay queued
    /// until the next teardown.
    pub fn queue_message(&self, frame: impl Into<Bytes>) {
        let frame = frame.into();
        let len = frame.len();
        if let Err(e) = self.inner.queue.push(frame) {
            warn!("Dropping outbound frame of {} bytes: {}", len, e);
        }
    }

    /// All attached devices, in enumeration order
    pub fn devices(&self) -> Vec<DeviceInfo> {
        match self.inner.access.list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                Vec::new()
            }
        }
    }

    /// First attached device found in the catalog
    pub fn get_compatible_device(&self) -> Option<DeviceInfo> {
        let device = self.devices().into_iter().find(is_compatible);
        match &device {
            Some(device) => debug!("Compatible device: {}", pretty_device_name(device)),
            None => debug!("No compatible device attached"),
        }
        device
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Device of the active connection
    pub fn connected_device(&self) -> Option<DeviceInfo> {
        self.inner
            .session
            .lock()
            .active
            .as_ref()
            .map(|link| link.device.clone())
    }

    /// Whether the most recently started loops are still running
    pub fn loop_status(&self) -> LoopStatus {
        let session = self.inner.session.lock();
        let running = |flag: &Option<Arc<AtomicBool>>| {
            flag.as_ref()
                .is_some_and(|flag| flag.load(Ordering::Acquire))
        };
        LoopStatus {
            inbound: running(&session.inbound_running),
            outbound: running(&session.outbound_running),
        }
    }

    /// Frames waiting in the outbound queue
    pub fn pending_frames(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn metrics(&self) -> Arc<LinkMetrics> {
        Arc::clone(&self.inner.metrics)
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            debug!(
                "Connection state: {} -> {}",
                ConnectionState::from_u8(previous),
                state
            );
        }
    }

    fn on_loop_thread(&self) -> bool {
        self.loop_threads.lock().contains(&thread::current().id())
    }

    fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let handler = self.handler.get();
        for notice in notices {
            match notice {
                Notice::Connected => handler.on_connected(),
                Notice::Disconnected => handler.on_disconnected(),
                Notice::Error(e) => handler.on_error(&e),
            }
        }
    }

    fn on_permission_result(&self, device: DeviceInfo, outcome: PermissionOutcome) {
        let mut notices = Vec::new();
        let ops = self.ops.lock();

        let expected = {
            let mut session = self.session.lock();
            let matches = self.state() == ConnectionState::AwaitingPermission
                && session
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.same_device(&device));
            if matches {
                session.pending = None;
            }
            matches
        };

        if !expected {
            debug!(
                "Ignoring permission result for {}: no matching request pending",
                pretty_device_name(&device)
            );
            return;
        }

        match outcome {
            PermissionOutcome::Granted => {
                info!("Permission granted for {}", pretty_device_name(&device));
                self.do_connect(&device, &mut notices);
            }
            PermissionOutcome::Denied => {
                let name = pretty_device_name(&device);
                warn!("Permission denied for {}", name);
                self.set_state(ConnectionState::Idle);
                notices.push(Notice::Error(ConnectError::PermissionDenied { device: name }));
            }
        }

        drop(ops);
        self.dispatch(notices);
    }

    fn fail(&self, notices: &mut Vec<Notice>, err: ConnectError) {
        error!("{}", err);
        self.set_state(ConnectionState::Idle);
        notices.push(Notice::Error(err));
    }

    fn do_connect(&self, device: &DeviceInfo, notices: &mut Vec<Notice>) {
        let name = pretty_device_name(device);
        let interface = device.interface_index;
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {} ({})", name, device.id);

        let mut io = match self.access.open(device) {
            Ok(io) => io,
            Err(source) => {
                self.fail(notices, ConnectError::OpenFailed { device: name, source });
                return;
            }
        };

        if let Err(source) = io.claim_interface(interface) {
            self.fail(
                notices,
                ConnectError::InterfaceClaimFailed {
                    device: name,
                    interface,
                    source,
                },
            );
            return;
        }

        let configurator = LineConfigurator::new(self.settings.line, self.settings.control_timeout);
        if let Err(e) = configurator.configure(&*io) {
            warn!("Line configuration of {} incomplete ({}), continuing", name, e);
        }

        let endpoints = io.interface_endpoints(interface).unwrap_or_else(|e| {
            warn!("Failed to read endpoints of interface {}: {}", interface, e);
            Vec::new()
        });
        let bulk_in = endpoints.iter().find(|ep| ep.is_bulk(Direction::In)).copied();
        let bulk_out = endpoints.iter().find(|ep| ep.is_bulk(Direction::Out)).copied();

        let io: Arc<dyn DeviceIo> = Arc::from(io);
        let cancel = CancellationToken::new();
        let ctx = LoopContext {
            io: Arc::clone(&io),
            cancel: cancel.clone(),
            handler: Arc::clone(&self.handler),
            metrics: Arc::clone(&self.metrics),
            settings: self.settings.loops,
        };
        let mut link = ActiveLink {
            device: device.clone(),
            io,
            cancel,
            inbound: None,
            outbound: None,
        };

        self.metrics.reset();

        match bulk_in {
            Some(endpoint) => match spawn_inbound(ctx.clone(), endpoint) {
                Ok(handle) => link.inbound = Some(handle),
                Err(e) => return self.abort(link, LoopDirection::Inbound, e, notices),
            },
            None => warn!("{} has no bulk IN endpoint, not reading", name),
        }

        match bulk_out {
            Some(endpoint) => match spawn_outbound(ctx, endpoint, self.queue.receiver()) {
                Ok(handle) => link.outbound = Some(handle),
                Err(e) => return self.abort(link, LoopDirection::Outbound, e, notices),
            },
            None => warn!(
                "{} has no bulk OUT endpoint, queued frames will not be sent",
                name
            ),
        }

        *self.loop_threads.lock() = link
            .inbound
            .iter()
            .chain(&link.outbound)
            .map(LoopHandle::thread_id)
            .collect();

        {
            let mut session = self.session.lock();
            session.inbound_running = link.inbound.as_ref().map(LoopHandle::running_flag);
            session.outbound_running = link.outbound.as_ref().map(LoopHandle::running_flag);
            session.active = Some(link);
        }

        self.metrics.mark_connected();
        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", name);
        notices.push(Notice::Connected);
    }

    /// Undo a half-built connection after a loop failed to start
    fn abort(
        &self,
        link: ActiveLink,
        direction: LoopDirection,
        err: std::io::Error,
        notices: &mut Vec<Notice>,
    ) {
        self.teardown(link);
        self.fail(
            notices,
            ConnectError::SpawnFailed {
                direction: direction.as_str(),
                message: err.to_string(),
            },
        );
    }

    /// Tear down whatever the session holds and return to `Idle`
    fn teardown_active(&self, notices: &mut Vec<Notice>) {
        let (link, pending) = {
            let mut session = self.session.lock();
            (session.active.take(), session.pending.take())
        };

        if let Some(pending) = &pending {
            info!(
                "Abandoning permission request for {}",
                pretty_device_name(pending)
            );
        }

        let had_link = link.is_some();
        if let Some(link) = link {
            let name = pretty_device_name(&link.device);
            self.teardown(link);
            info!("Disconnected from {}", name);
            notices.push(Notice::Disconnected);
        }

        if had_link || pending.is_some() {
            self.set_state(ConnectionState::Idle);
        }
    }

    fn teardown(&self, link: ActiveLink) {
        self.set_state(ConnectionState::Disconnecting);
        link.cancel.cancel();

        let mut joined = true;
        for handle in [link.inbound, link.outbound].into_iter().flatten() {
            joined &= handle.join(self.settings.join_timeout);
        }
        self.loop_threads.lock().clear();

        let dropped = self.queue.clear();
        if dropped > 0 {
            info!("Discarded {} pending outbound frames", dropped);
        }

        let interface = link.device.interface_index;
        let mut io = link.io;
        if !joined {
            warn!(
                "Transfer loops still running, interface {} is released when the device closes",
                interface
            );
        } else if let Some(io) = Arc::get_mut(&mut io) {
            if let Err(e) = io.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        } else {
            debug!("Device handle still shared, interface {} is released on close", interface);
        }

        self.metrics.mark_disconnected();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Loops hold no reference to the manager; stop them so they exit
        if let Some(link) = self.session.get_mut().active.take() {
            link.cancel.cancel();
        }
    }
}
