//! Transfer loop threads
//!
//! Each direction of a connection runs on its own OS thread. Bulk transfers
//! are blocking calls with a bounded timeout; the remaining suspension
//! points (the outbound dequeue and the inbound idle pause) run on a small
//! current-thread Tokio runtime so they can race the connection's
//! cancellation token and wake the moment a disconnect is requested.

use crate::usb::access::DeviceIo;
use crate::usb::handler::HandlerSlot;
use bytes::Bytes;
use common::{LinkMetrics, QueueReceiver};
use protocol::{Endpoint, UsbError};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// How often a bounded join checks whether the thread has exited
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Tunables shared by both loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Size of the inbound read buffer (independent of max packet size)
    pub read_buffer_size: usize,
    /// Timeout of one bulk read
    pub read_timeout: Duration,
    /// Timeout of one bulk write
    pub write_timeout: Duration,
    /// Pause after a read that returned no data
    pub idle_pause: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: 256,
            read_timeout: Duration::from_millis(250),
            write_timeout: Duration::from_millis(1000),
            idle_pause: Duration::from_millis(10),
        }
    }
}

/// Transfer direction of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDirection {
    Inbound,
    Outbound,
}

impl LoopDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopDirection::Inbound => "inbound",
            LoopDirection::Outbound => "outbound",
        }
    }

    fn thread_name(&self) -> &'static str {
        match self {
            LoopDirection::Inbound => "usb-serial-in",
            LoopDirection::Outbound => "usb-serial-out",
        }
    }
}

impl fmt::Display for LoopDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a loop shares with the connection that spawned it
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub io: Arc<dyn DeviceIo>,
    pub cancel: CancellationToken,
    pub handler: Arc<HandlerSlot>,
    pub metrics: Arc<LinkMetrics>,
    pub settings: LoopSettings,
}

/// A spawned transfer loop
pub(crate) struct LoopHandle {
    direction: LoopDirection,
    thread: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Flag cleared by the thread when it exits
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    /// Whether the caller is running on this loop's thread
    pub fn is_current_thread(&self) -> bool {
        self.thread_id() == thread::current().id()
    }

    /// Wait up to `timeout` for the thread to exit
    ///
    /// Returns false when the thread is still running after the deadline,
    /// or when called from the loop's own thread (joining would deadlock).
    /// The caller must have cancelled the loop beforehand.
    pub fn join(self, timeout: Duration) -> bool {
        if self.is_current_thread() {
            debug!(
                "Not joining {} loop from its own thread; it exits after this callback",
                self.direction
            );
            return false;
        }

        let deadline = Instant::now() + timeout;
        while !self.thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Shutdown join timeout: {} loop still running after {:?}, continuing teardown",
                    self.direction, timeout
                );
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if let Err(e) = self.thread.join() {
            error!("{} loop panicked: {:?}", self.direction, e);
        }
        true
    }
}

/// Clears the running flag however the loop exits
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn spawn_loop<F>(direction: LoopDirection, body: F) -> std::io::Result<LoopHandle>
where
    F: FnOnce(RunningGuard) + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let guard = RunningGuard(Arc::clone(&running));

    let thread = thread::Builder::new()
        .name(direction.thread_name().to_string())
        .spawn(move || body(guard))?;

    Ok(LoopHandle {
        direction,
        thread,
        running,
    })
}

fn loop_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
}

/// Spawn the loop that reads `endpoint` and forwards frames to the handler
pub(crate) fn spawn_inbound(ctx: LoopContext, endpoint: Endpoint) -> std::io::Result<LoopHandle> {
    spawn_loop(LoopDirection::Inbound, move |guard| {
        let _guard = guard;
        run_inbound(ctx, endpoint)
    })
}

/// Spawn the loop that drains `queue` into `endpoint`
pub(crate) fn spawn_outbound(
    ctx: LoopContext,
    endpoint: Endpoint,
    queue: QueueReceiver,
) -> std::io::Result<LoopHandle> {
    spawn_loop(LoopDirection::Outbound, move |guard| {
        let _guard = guard;
        run_outbound(ctx, endpoint, queue)
    })
}

fn run_inbound(ctx: LoopContext, endpoint: Endpoint) {
    let rt = match loop_runtime() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Inbound loop could not build its runtime: {}", e);
            return;
        }
    };

    let mut buf = vec![0u8; ctx.settings.read_buffer_size.max(1)];
    info!("Inbound loop started on endpoint {:#04x}", endpoint.address);

    loop {
        let idle = match ctx
            .io
            .read_bulk(endpoint.address, &mut buf, ctx.settings.read_timeout)
        {
            Ok(0) | Err(UsbError::Timeout) => {
                ctx.metrics.record_idle_read();
                true
            }
            Ok(len) => {
                trace!("Inbound frame: {} bytes", len);
                ctx.metrics.record_read(len);
                ctx.handler
                    .get()
                    .on_message(Bytes::copy_from_slice(&buf[..len]));
                false
            }
            Err(UsbError::NoDevice) => {
                error!("Device disconnected, inbound loop stopping");
                ctx.metrics.record_error();
                break;
            }
            Err(e) => {
                warn!("Bulk read on {:#04x} failed: {}", endpoint.address, e);
                ctx.metrics.record_error();
                true
            }
        };

        if ctx.cancel.is_cancelled() {
            break;
        }

        if idle && !pause(&rt, &ctx.cancel, ctx.settings.idle_pause) {
            break;
        }
    }

    info!("Inbound loop stopped");
}

/// Sleep for `duration`; returns false if cancelled meanwhile
fn pause(rt: &Runtime, cancel: &CancellationToken, duration: Duration) -> bool {
    rt.block_on(async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    })
}

fn run_outbound(ctx: LoopContext, endpoint: Endpoint, queue: QueueReceiver) {
    let rt = match loop_runtime() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Outbound loop could not build its runtime: {}", e);
            return;
        }
    };

    info!(
        "Outbound loop started on endpoint {:#04x} (max packet {} bytes)",
        endpoint.address, endpoint.max_packet_size
    );

    loop {
        // Frames left in the queue on cancellation stay there
        let next = rt.block_on(async {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                frame = queue.recv() => Some(frame),
            }
        });

        let frame = match next {
            None => break,
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                error!("Outbound queue failed: {}", e);
                break;
            }
        };

        match ctx
            .io
            .write_bulk(endpoint.address, &frame, ctx.settings.write_timeout)
        {
            Ok(written) if written < frame.len() => {
                warn!(
                    "Short write on {:#04x}: {} of {} bytes sent, remainder dropped",
                    endpoint.address,
                    written,
                    frame.len()
                );
                ctx.metrics.record_write(frame.len(), written);
            }
            Ok(written) => {
                trace!("Outbound frame: {} bytes", written);
                ctx.metrics.record_write(frame.len(), written);
            }
            Err(UsbError::NoDevice) => {
                error!("Device disconnected, outbound loop stopping");
                ctx.metrics.record_error();
                break;
            }
            Err(e) => {
                warn!(
                    "Bulk write on {:#04x} failed, frame of {} bytes dropped: {}",
                    endpoint.address,
                    frame.len(),
                    e
                );
                ctx.metrics.record_error();
            }
        }
    }

    info!("Outbound loop stopped");
}
