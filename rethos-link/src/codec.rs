//! Byte-oriented wire codec.
//!
//! A frame travels as `ESC FRAME_START`, the escaped checksummed preamble
//! (type, seqno little-endian, channel), the escaped checksummed payload,
//! `ESC FRAME_END`, and finally the escaped two-byte Fletcher-16 check value
//! (low byte first). The check bytes are not covered by the checksum.
//!
//! The decoder is an incremental state machine fed one byte at a time; it
//! yields [`DecodeEvent::FrameReady`] on a valid frame and
//! [`DecodeEvent::FrameDropped`] on corruption, overflow, or an unexpected
//! marker. Deciding what to do about a drop (typically: NACK) is the
//! caller's business.

use bytes::{BufMut, Bytes, BytesMut};
use rethos_core::{Channel, MTU};
use tracing::{debug, warn};

use crate::checksum::Fletcher16;
use crate::frame::{Frame, FrameType};

/// Escape character; never appears bare inside a frame body.
pub const ESC: u8 = 0xBE;
/// `ESC LITERAL_ESC` encodes a literal `0xBE` byte.
pub const LITERAL_ESC: u8 = 0x55;
/// `ESC FRAME_START` opens a frame.
pub const FRAME_START: u8 = 0xEF;
/// `ESC FRAME_END` closes the frame body; the check bytes follow.
pub const FRAME_END: u8 = 0xE5;

/// Encode `frame` into its full wire image.
pub fn encode(frame: &Frame) -> BytesMut {
    let mut wire = BytesMut::with_capacity(frame.payload.len() + 16);
    let mut ck = Fletcher16::new();

    wire.put_slice(&[ESC, FRAME_START]);

    let preamble = [
        frame.frame_type.to_wire(),
        (frame.seqno & 0xFF) as u8,
        (frame.seqno >> 8) as u8,
        frame.channel.0,
    ];
    ck.update(&preamble);
    put_escaped(&mut wire, &preamble);

    ck.update(&frame.payload);
    put_escaped(&mut wire, &frame.payload);

    wire.put_slice(&[ESC, FRAME_END]);

    let cksum = ck.finalize();
    put_escaped(&mut wire, &[(cksum & 0xFF) as u8, (cksum >> 8) as u8]);

    wire
}

fn put_escaped(wire: &mut BytesMut, data: &[u8]) {
    for &byte in data {
        if byte == ESC {
            wire.put_slice(&[ESC, LITERAL_ESC]);
        } else {
            wire.put_u8(byte);
        }
    }
}

/// Outcome of feeding one byte to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A complete frame passed its checksum.
    FrameReady(Frame),
    /// The frame in progress was abandoned (corruption, overflow, bad escape).
    FrameDropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitFrameStart,
    WaitFrameType,
    WaitSeqno1,
    WaitSeqno2,
    WaitChannel,
    InFrame,
    WaitChecksum1,
    WaitChecksum2,
}

/// Incremental frame decoder.
///
/// The payload buffer is allocated once at MTU size and reused across frames.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    in_escape: bool,
    checksum: Fletcher16,
    frame_type: u8,
    seqno: u16,
    channel: u8,
    payload: BytesMut,
    wire_checksum: u16,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::WaitFrameStart,
            in_escape: false,
            checksum: Fletcher16::new(),
            frame_type: 0,
            seqno: 0,
            channel: 0,
            payload: BytesMut::with_capacity(MTU),
            wire_checksum: 0,
        }
    }

    /// Feed one wire byte; returns an event when a frame completes or dies.
    pub fn push_byte(&mut self, byte: u8) -> Option<DecodeEvent> {
        if byte == ESC {
            // A run of ESC bytes keeps us in the escape state.
            self.in_escape = true;
            return None;
        }
        let escaped = std::mem::take(&mut self.in_escape);

        let literal = if escaped {
            match byte {
                LITERAL_ESC => ESC,
                FRAME_START => return self.on_frame_start(),
                FRAME_END => return self.on_frame_end(),
                other => {
                    warn!("unexpected escape sequence 0xBE 0x{other:02X}: dropping current frame");
                    return self.drop_frame();
                }
            }
        } else {
            byte
        };

        match self.state {
            State::WaitFrameStart => {
                debug!("stray byte 0x{literal:02X} outside any frame");
                None
            }
            State::WaitFrameType => {
                self.frame_type = literal;
                self.checksum.update(&[literal]);
                self.state = State::WaitSeqno1;
                None
            }
            State::WaitSeqno1 => {
                self.seqno = u16::from(literal);
                self.checksum.update(&[literal]);
                self.state = State::WaitSeqno2;
                None
            }
            State::WaitSeqno2 => {
                self.seqno |= u16::from(literal) << 8;
                self.checksum.update(&[literal]);
                self.state = State::WaitChannel;
                None
            }
            State::WaitChannel => {
                self.channel = literal;
                self.payload.clear();
                self.checksum.update(&[literal]);
                self.state = State::InFrame;
                None
            }
            State::InFrame => {
                if self.payload.len() >= MTU {
                    warn!("dropping runaway frame");
                    return self.drop_frame();
                }
                self.payload.put_u8(literal);
                self.checksum.update(&[literal]);
                None
            }
            State::WaitChecksum1 => {
                self.wire_checksum = u16::from(literal);
                self.state = State::WaitChecksum2;
                None
            }
            State::WaitChecksum2 => {
                self.wire_checksum |= u16::from(literal) << 8;
                self.state = State::WaitFrameStart;
                if self.wire_checksum != self.checksum.finalize() {
                    debug!(
                        "frame failed checksum: wire 0x{:04X}, computed 0x{:04X}",
                        self.wire_checksum,
                        self.checksum.finalize()
                    );
                    return Some(DecodeEvent::FrameDropped);
                }
                let Some(frame_type) = FrameType::from_wire(self.frame_type) else {
                    warn!("dropping frame with unknown type 0x{:02X}", self.frame_type);
                    return Some(DecodeEvent::FrameDropped);
                };
                Some(DecodeEvent::FrameReady(Frame {
                    frame_type,
                    seqno: self.seqno,
                    channel: Channel(self.channel),
                    payload: Bytes::copy_from_slice(&self.payload),
                }))
            }
        }
    }

    /// `ESC FRAME_START`: restart reception. Mid-frame this abandons the
    /// frame in progress and the peer is expected to retransmit it.
    fn on_frame_start(&mut self) -> Option<DecodeEvent> {
        let mid_frame = self.state != State::WaitFrameStart;
        if mid_frame {
            warn!("unexpected start-of-frame sequence: dropping current frame");
        }
        self.checksum = Fletcher16::new();
        self.state = State::WaitFrameType;
        mid_frame.then_some(DecodeEvent::FrameDropped)
    }

    fn on_frame_end(&mut self) -> Option<DecodeEvent> {
        match self.state {
            State::InFrame => {
                self.state = State::WaitChecksum1;
                None
            }
            State::WaitFrameStart => {
                debug!("end-of-frame marker outside any frame");
                None
            }
            _ => {
                warn!("unexpected end-of-frame sequence: dropping current frame");
                self.drop_frame()
            }
        }
    }

    fn drop_frame(&mut self) -> Option<DecodeEvent> {
        self.state = State::WaitFrameStart;
        Some(DecodeEvent::FrameDropped)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
