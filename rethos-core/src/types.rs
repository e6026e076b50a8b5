//! Protocol constants and small shared types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum payload size of one frame, in bytes.
pub const MTU: usize = 16384;

/// Number of logical channels multiplexed over the serial link.
pub const NUM_CHANNELS: usize = 256;

/// One of the 256 logical channels multiplexed over the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel(pub u8);

impl Channel {
    /// Control channel: carries ACK/NACK only, never DATA.
    pub const CONTROL: Channel = Channel(0);
    /// Bytes read from the host's stdin; inbound payloads go to stdout.
    pub const STDIN: Channel = Channel(1);
    /// Command channel used to query the MCU's configured IP address.
    pub const COMMAND: Channel = Channel(2);
    /// IP packets exchanged with the kernel TUN device.
    pub const TUNTAP: Channel = Channel(3);

    /// Index into per-channel tables.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl From<u8> for Channel {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command-channel opcodes (first payload byte of a channel-2 DATA frame).
pub mod cmd {
    /// Request: report the MCU's configured IPv6 address.
    pub const GET_MCU_IP_ADDR: u8 = 0x01;
    /// Response opcode; followed by the 16-byte IPv6 address.
    pub const RSP_GET_MCU_IP_ADDR: u8 = 0x11;
}

/// Number of frames missing between `previous` and `latest`, wrap-safe.
///
/// `seq_gap(n + 1, n)` is 0: consecutive sequence numbers mean no loss.
pub fn seq_gap(latest: u16, previous: u16) -> u16 {
    latest.wrapping_sub(previous).wrapping_sub(1)
}
