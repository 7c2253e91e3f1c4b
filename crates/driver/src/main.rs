//! usb-serial
//!
//! Terminal front end for the serial-over-USB driver. Lines typed on stdin
//! are sent to the adapter, frames received from it are printed on stdout.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{MetricsSnapshot, setup_logging};
use driver::config::{DriverConfig, load_config};
use driver::{
    ChannelHandler, ConnectionEvent, ConnectionManager, ConnectionState, LibusbAccess,
};
use protocol::catalog::{is_compatible, pretty_device_name};
use protocol::{DeviceInfo, parse_device_id};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

/// How often the link is checked for loops that died on their own
const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "usb-serial")]
#[command(
    author,
    version,
    about = "usb-serial - Talk to a USB CDC serial adapter"
)]
#[command(long_about = "
Connects to a USB serial adapter (Arduino Mega 2560, LeafLabs Maple, ...),
sets its line coding and bridges it to the terminal: every line read from
stdin is sent to the device, every frame received is written to stdout.

EXAMPLES:
    # Connect to the first known adapter at 115200 baud
    usb-serial

    # Pick a specific adapter and baud rate
    usb-serial --device 2341:0010 --baud 9600

    # List attached USB devices
    usb-serial --list-devices

    # Dump received bytes as hex
    usb-serial --hex

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-serial/driver.toml
    3. /etc/usb-serial/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Device to connect to (VVVV:PPPP)
    #[arg(short, long, value_name = "VID:PID")]
    device: Option<String>,

    /// Baud rate
    #[arg(short, long, value_name = "RATE")]
    baud: Option<u32>,

    /// Print received frames as hex instead of text
    #[arg(long)]
    hex: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        load_config(path).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    // Command line wins over the file
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(ref device) = args.device {
        config.device.preferred = Some(device.clone());
    }
    if let Some(ref level) = args.log_level {
        config.general.log_level = level.clone();
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.general.log_level).context("Failed to setup logging")?;

    info!("usb-serial v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.general.log_level);

    let access = LibusbAccess::new().context("Failed to initialise libusb")?;
    let manager = ConnectionManager::new(Arc::new(access), config.connection_settings());

    if args.list_devices {
        list_devices_mode(&manager);
        return Ok(());
    }

    let device = select_device(&manager, &config)?;
    run_terminal(manager, device, args.hex).await
}

/// List USB devices and exit
fn list_devices_mode(manager: &ConnectionManager) {
    let devices = manager.devices();

    if devices.is_empty() {
        println!("No USB devices found.");
        return;
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        let marker = if is_compatible(&device) { "*" } else { " " };
        println!(" {} [{}] {}", marker, device.id, pretty_device_name(&device));
        println!(
            "      Bus {:03} Device {:03} Data interface: {}",
            device.bus_number, device.device_address, device.interface_index
        );
    }
    println!("\n  * known serial adapter");
}

/// Preferred device if configured, else the first known adapter
fn select_device(manager: &ConnectionManager, config: &DriverConfig) -> Result<DeviceInfo> {
    match config.device.preferred.as_deref() {
        Some(id) => {
            let (vendor_id, product_id) = parse_device_id(id).map_err(|e| anyhow!(e))?;
            manager
                .devices()
                .into_iter()
                .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
                .ok_or_else(|| anyhow!("Device {} is not attached", id))
        }
        None => manager.get_compatible_device().ok_or_else(|| {
            anyhow!("No compatible serial adapter found (try --list-devices and --device)")
        }),
    }
}

/// Bridge the adapter to stdin/stdout until Ctrl+C or the link dies
async fn run_terminal(manager: ConnectionManager, device: DeviceInfo, hex: bool) -> Result<()> {
    let (handler, events) = ChannelHandler::new();
    manager.set_connection_handler(Arc::new(handler));

    info!("Connecting to {}", pretty_device_name(&device));
    let connecting = manager.clone();
    tokio::task::spawn_blocking(move || connecting.connect(&device))
        .await
        .context("Connect task failed")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut link_check = tokio::time::interval(LINK_CHECK_INTERVAL);
    let mut failure = None;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                break;
            }
            event = events.recv() => {
                let Ok(event) = event else { break };
                match event {
                    ConnectionEvent::Connected => {
                        info!("Connected, type lines to send them (Ctrl+C to quit)");
                    }
                    ConnectionEvent::Message(frame) => print_frame(&frame, hex),
                    ConnectionEvent::Disconnected => {
                        info!("Disconnected");
                        break;
                    }
                    ConnectionEvent::Error(e) => {
                        error!("{}", e);
                        if manager.state() == ConnectionState::Idle {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(mut line)) => {
                        line.push('\n');
                        manager.queue_message(line.into_bytes());
                    }
                    Ok(None) => {
                        info!("stdin closed, still receiving (Ctrl+C to quit)");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = link_check.tick() => {
                let status = manager.loop_status();
                if manager.is_connected() && !status.inbound && !status.outbound {
                    warn!("Both transfer loops stopped, device lost");
                    break;
                }
            }
        }
    }

    let snapshot = MetricsSnapshot::from_metrics(&manager.metrics());
    let closing = manager.clone();
    tokio::task::spawn_blocking(move || closing.disconnect())
        .await
        .context("Disconnect task failed")?;

    let uptime = snapshot.uptime.unwrap_or_default();
    info!(
        "Connected for {:.1}s: sent {} in {} frames, received {} in {} frames, {} short writes, {} errors",
        uptime.as_secs_f64(),
        MetricsSnapshot::format_bytes(snapshot.bytes_sent),
        snapshot.frames_sent,
        MetricsSnapshot::format_bytes(snapshot.bytes_received),
        snapshot.frames_received,
        snapshot.short_writes,
        snapshot.transfer_errors
    );

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_frame(frame: &[u8], hex: bool) {
    let mut stdout = std::io::stdout().lock();
    let result = if hex {
        let line: Vec<String> = frame.iter().map(|b| format!("{:02x}", b)).collect();
        writeln!(stdout, "{}", line.join(" "))
    } else {
        stdout.write_all(String::from_utf8_lossy(frame).as_bytes())
    };
    if let Err(e) = result.and_then(|_| stdout.flush()) {
        warn!("Failed to write to stdout: {}", e);
    }
}
