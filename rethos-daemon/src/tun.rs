//! Optional kernel TUN device for IP packet forwarding.
//!
//! With an IPv6 /64 prefix configured, the daemon creates a TUN interface,
//! assigns `<prefix>::1` to it, and forwards whole IP packets between the
//! interface and the tuntap channel; `<prefix>::2` is the MCU's address on
//! the link. Address assignment and link-up go through the `ip` tool.

use std::process::Command;
use std::sync::Arc;

use bytes::Bytes;
use rethos_core::{Config, Error, Result, MTU};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tun_tap::{Iface, Mode};

use crate::mux::Event;

/// A configured, up TUN interface. Reads and writes go through the shared
/// descriptor; one IP packet per send.
#[derive(Clone)]
pub struct TunDevice {
    iface: Arc<Iface>,
}

impl TunDevice {
    /// Interface name assigned by the kernel.
    pub fn name(&self) -> &str {
        self.iface.name()
    }

    /// Write one IP packet to the interface. Partial writes are reported
    /// but not retried; the packet is gone either way.
    pub fn send(&self, packet: &[u8]) {
        match self.iface.send(packet) {
            Ok(written) if written != packet.len() => {
                warn!(
                    "sent partial packet: packet size is {} bytes, but the tun write returned {written}",
                    packet.len()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("write to tun device failed: {e}"),
        }
    }
}

/// Create and configure the TUN device, if a prefix is configured.
pub fn create(cfg: &Config) -> Result<Option<TunDevice>> {
    let Some(host_addr) = cfg.host_addr() else {
        return Ok(None);
    };
    // A prefix implies both addresses exist.
    let Some(mcu_addr) = cfg.mcu_addr() else {
        return Ok(None);
    };

    let iface = Iface::without_packet_info("", Mode::Tun)
        .map_err(|e| Error::config(format!("could not create tun device: {e}")))?;
    let name = iface.name().to_string();
    info!("created TUN interface: {name}");

    ip_command(&["-6", "addr", "add", &format!("{host_addr}/64"), "dev", &name])?;
    ip_command(&["link", "set", "dev", &name, "up"])?;

    info!("IPv6 subnet is {host_addr}/64");
    info!("IPv6 address of this device is {host_addr}");
    info!("IPv6 address of the MCU is {mcu_addr}");

    Ok(Some(TunDevice {
        iface: Arc::new(iface),
    }))
}

/// Spawn the blocking reader feeding TUN packets into the event queue.
pub fn spawn_reader(device: &TunDevice, events: mpsc::Sender<Event>) {
    let iface = device.iface.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; MTU];
        loop {
            match iface.recv(&mut buf) {
                Ok(n) => {
                    let packet = Bytes::copy_from_slice(&buf[..n]);
                    if events.blocking_send(Event::TunPacket(packet)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("read from tun device failed: {e}");
                    return;
                }
            }
        }
    });
}

fn ip_command(args: &[&str]) -> Result<()> {
    let status = Command::new("ip")
        .args(args)
        .status()
        .map_err(|e| Error::config(format!("could not run `ip`: {e}")))?;
    if !status.success() {
        return Err(Error::config(format!("`ip {}` failed: {status}", args.join(" "))));
    }
    Ok(())
}
