//! Bridge statistics: monotonic counters, the human-readable summary, and the
//! fixed-layout binary record pushed to a channel-0 client.
//!
//! The binary layout is stable wire format: each field is serialized
//! explicitly as little-endian u64, never via in-memory struct layout.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::NUM_CHANNELS;

/// Size in bytes of the encoded record: 7 global counters followed by
/// 5 counters for each of the 256 channels.
pub const STATS_RECORD_LEN: usize = 8 * (7 + NUM_CHANNELS * 5);

/// Link-wide counters. Reset only on process restart.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GlobalStats {
    pub serial_received: u64,
    pub domain_forwarded: u64,
    pub domain_received: u64,
    pub serial_forwarded: u64,
    pub lost_frames: u64,
    pub bad_frames: u64,
    pub drop_notconnected: u64,
}

/// Per-channel counters. Field order is the wire order of the record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub serial_received: u64,
    pub domain_forwarded: u64,
    pub drop_notconnected: u64,
    pub domain_received: u64,
    pub serial_forwarded: u64,
}

/// All bridge counters: global totals plus one record per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub global: GlobalStats,
    pub channel: [ChannelStats; NUM_CHANNELS],
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            global: GlobalStats::default(),
            channel: [ChannelStats::default(); NUM_CHANNELS],
        }
    }
}

impl Stats {
    /// Encode the record in its fixed little-endian layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(STATS_RECORD_LEN);
        buf.put_u64_le(self.global.serial_received);
        buf.put_u64_le(self.global.domain_forwarded);
        buf.put_u64_le(self.global.domain_received);
        buf.put_u64_le(self.global.serial_forwarded);
        buf.put_u64_le(self.global.lost_frames);
        buf.put_u64_le(self.global.bad_frames);
        buf.put_u64_le(self.global.drop_notconnected);
        for ch in &self.channel {
            buf.put_u64_le(ch.serial_received);
            buf.put_u64_le(ch.domain_forwarded);
            buf.put_u64_le(ch.drop_notconnected);
            buf.put_u64_le(ch.domain_received);
            buf.put_u64_le(ch.serial_forwarded);
        }
        debug_assert_eq!(buf.len(), STATS_RECORD_LEN);
        buf.freeze()
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.global;
        writeln!(
            f,
            "received {} frames on serial link; forwarded {} on domain sockets",
            g.serial_received, g.domain_forwarded
        )?;
        writeln!(
            f,
            "received {} frames on domain sockets; forwarded {} on serial link",
            g.domain_received, g.serial_forwarded
        )?;
        writeln!(
            f,
            "lost {} frames, {} of which were detected on the serial link",
            g.lost_frames, g.bad_frames
        )?;
        write!(
            f,
            "an additional {} frames were dropped, due to lack of a listening process",
            g.drop_notconnected
        )
    }
}
