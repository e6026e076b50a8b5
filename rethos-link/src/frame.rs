//! The typed frame model carried over the serial link.

use bytes::Bytes;
use rethos_core::Channel;

/// Frame types understood by the link.
///
/// Only [`FrameType::Data`] carries a meaningful payload and participates in
/// retransmission. ACK/NACK travel on the control channel with an empty
/// payload. HB/HB_REPLY are reserved: the host parses them but never emits
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Hb,
    HbReply,
    Ack,
    Nack,
}

impl FrameType {
    /// Decode the on-wire type byte; `None` for values outside the protocol.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x1 => Some(Self::Data),
            0x2 => Some(Self::Hb),
            0x3 => Some(Self::HbReply),
            0x4 => Some(Self::Ack),
            0x5 => Some(Self::Nack),
            _ => None,
        }
    }

    /// The on-wire type byte.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Data => 0x1,
            Self::Hb => 0x2,
            Self::HbReply => 0x3,
            Self::Ack => 0x4,
            Self::Nack => 0x5,
        }
    }
}

/// One complete frame: type, sequence number, channel, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub seqno: u16,
    pub channel: Channel,
    pub payload: Bytes,
}

impl Frame {
    /// A DATA frame on `channel`.
    pub fn data(seqno: u16, channel: Channel, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type: FrameType::Data,
            seqno,
            channel,
            payload: payload.into(),
        }
    }

    /// An ACK for `seqno`, on the control channel with an empty payload.
    pub fn ack(seqno: u16) -> Self {
        Self {
            frame_type: FrameType::Ack,
            seqno,
            channel: Channel::CONTROL,
            payload: Bytes::new(),
        }
    }

    /// A NACK. The sequence number of a NACK is unused and always zero.
    pub fn nack() -> Self {
        Self {
            frame_type: FrameType::Nack,
            seqno: 0,
            channel: Channel::CONTROL,
            payload: Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_roundtrip() {
        for ft in [
            FrameType::Data,
            FrameType::Hb,
            FrameType::HbReply,
            FrameType::Ack,
            FrameType::Nack,
        ] {
            assert_eq!(FrameType::from_wire(ft.to_wire()), Some(ft));
        }
        assert_eq!(FrameType::from_wire(0), None);
        assert_eq!(FrameType::from_wire(0x6), None);
    }

    #[test]
    fn control_frames_are_empty_and_on_channel_zero() {
        let ack = Frame::ack(77);
        assert_eq!(ack.channel, Channel::CONTROL);
        assert!(ack.payload.is_empty());
        assert_eq!(ack.seqno, 77);
        assert_eq!(Frame::nack().seqno, 0);
    }
}
