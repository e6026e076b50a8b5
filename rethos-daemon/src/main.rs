#![forbid(unsafe_code)]

//! REthos daemon entry point: turn one serial line to an MCU into a
//! reliable, multiplexed, channel-oriented packet link with per-channel
//! local endpoints.

use std::net::Ipv6Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rethos_core::Config;
use rethos_daemon::{endpoint, mux, serial, tun, Mux};
use tracing::info;

/// Reliable multi-channel bridge over a serial link.
///
/// The provided IPv6 address is interpreted as a /64 prefix for the subnet.
/// PREFIX::1 is the address of this device on the link and PREFIX::2 is the
/// address of the MCU. Without a prefix, no packets are routed; messages are
/// only forwarded to local client processes.
#[derive(Debug, Parser)]
#[command(name = "rethos", version)]
struct Args {
    /// Serial device connected to the MCU (e.g. /dev/ttyUSB0).
    device: String,

    /// Serial baud rate.
    baudrate: Option<u32>,

    /// IPv6 /64 prefix for the TUN subnet.
    prefix: Option<Ipv6Addr>,

    /// Optional TOML configuration file; command-line values take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("could not load config {}", path.display()))?,
        None => Config::default(),
    };
    cfg.device = args.device;
    if let Some(baudrate) = args.baudrate {
        cfg.baud_rate = baudrate;
    }
    if let Some(prefix) = args.prefix {
        cfg.prefix = Some(prefix);
    }
    cfg.validate()?;

    let tun_device = tun::create(&cfg).context("could not configure TUN device")?;
    if tun_device.is_none() {
        info!("no IPv6 prefix provided; will not forward packets");
    }

    let serial = serial::open(&cfg)?;
    info!("opened serial device {} at {} baud", cfg.device, cfg.baud_rate);

    let (events_tx, events_rx) = mux::channel();
    endpoint::spawn_all(&cfg.socket_namespace, events_tx.clone())
        .context("could not bind channel endpoints")?;
    mux::spawn_stdin(events_tx.clone());
    if let Some(device) = &tun_device {
        tun::spawn_reader(device, events_tx.clone());
    }

    let (serial_rx, serial_tx) = tokio::io::split(serial);
    let mux = Mux::new(cfg, serial_tx, tun_device);
    mux.run(serial_rx, events_rx).await?;
    Ok(())
}
