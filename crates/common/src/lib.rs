//! Common utilities for rust-usb-serial
//!
//! This crate provides functionality shared by the driver library and its
//! command-line front end: error handling, logging setup, the outbound frame
//! queue drained by the transfer loops, link metrics and test helpers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use channel::{OutboundQueue, QueueReceiver};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use metrics::{LinkMetrics, MetricsSnapshot};
