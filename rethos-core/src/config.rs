//! REthos configuration handling. Parses a TOML file into a strongly-typed
//! structure; the daemon's command line overrides individual fields.

use serde::Deserialize;
use std::{fs, net::Ipv6Addr, path::Path, time::Duration};

use crate::error::{Error, Result};

/// Baud rates accepted for the serial link. 8N1, raw mode, no flow control.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    9600, 19200, 38400, 57600, 115200,
    // The following rates might not be available on all platforms.
    230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000, 3000000,
    3500000, 4000000,
];

/// Default baud rate when none is configured.
pub const BAUD_RATE_DEFAULT: u32 = 115200;

/// Primary configuration structure shared across REthos components.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device connected to the MCU (e.g. `/dev/ttyUSB0`).
    pub device: String,

    /// Serial baud rate; must be one of [`SUPPORTED_BAUD_RATES`].
    pub baud_rate: u32,

    /// Optional IPv6 /64 prefix. When present a TUN device is created with
    /// `<prefix>::1` assigned to the host; `<prefix>::2` is the MCU address
    /// reported on the command channel. When absent the tuntap channel is
    /// inert.
    pub prefix: Option<Ipv6Addr>,

    /// Abstract-socket namespace for per-channel endpoints; channel `n` is
    /// reachable at the abstract name `<namespace>/<n>`.
    pub socket_namespace: String,

    /// Period of the statistics report, in milliseconds.
    pub stats_interval_ms: u64,

    /// Period of the retransmission timer, in milliseconds.
    pub rexmit_interval_ms: u64,

    /// Period of the unsolicited MCU-address broadcast, in milliseconds.
    pub ipaddr_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: BAUD_RATE_DEFAULT,
            prefix: None,
            socket_namespace: "rethos".to_string(),
            stats_interval_ms: 15_000,
            rexmit_interval_ms: 100,
            ipaddr_interval_ms: 20_000,
        }
    }
}

impl Config {
    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(&path).map_err(Error::from)?;
        let cfg = toml::from_str::<Config>(&data)?;
        Ok(cfg)
    }

    /// Check the configuration for values the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(Error::config("serial device must be set"));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(Error::config(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        if self.socket_namespace.is_empty() {
            return Err(Error::config("socket namespace must not be empty"));
        }
        if self.rexmit_interval_ms == 0 {
            return Err(Error::config("rexmit interval must be nonzero"));
        }
        Ok(())
    }

    /// Statistics report period.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Retransmission timer period.
    pub fn rexmit_interval(&self) -> Duration {
        Duration::from_millis(self.rexmit_interval_ms)
    }

    /// MCU-address broadcast period.
    pub fn ipaddr_interval(&self) -> Duration {
        Duration::from_millis(self.ipaddr_interval_ms)
    }

    /// Host-side address on the TUN link (`<prefix>::1`), if a prefix is set.
    pub fn host_addr(&self) -> Option<Ipv6Addr> {
        self.prefix.map(|p| addr_in_prefix(p, 1))
    }

    /// MCU address on the link (`<prefix>::2`), if a prefix is set.
    pub fn mcu_addr(&self) -> Option<Ipv6Addr> {
        self.prefix.map(|p| addr_in_prefix(p, 2))
    }
}

/// Keep the upper 64 prefix bits and set the interface identifier to `suffix`.
fn addr_in_prefix(prefix: Ipv6Addr, suffix: u16) -> Ipv6Addr {
    let s = prefix.segments();
    Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, suffix)
}
