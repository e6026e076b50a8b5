//! Stop-and-wait reliability over the frame codec.
//!
//! At most one DATA frame is outstanding per direction. [`Link`] tracks the
//! outbound sequence counter and the single retransmit slot, suppresses
//! duplicate inbound frames, and produces the wire images the event loop
//! must write (ACKs, NACK reactions, retransmissions). It performs no I/O
//! itself and never looks at a clock; the caller owns the retransmit timer.

use bytes::BytesMut;
use rethos_core::{seq_gap, Channel};
use tracing::{debug, info};

use crate::codec;
use crate::frame::{Frame, FrameType};

/// What the event loop should do with an inbound frame, besides writing the
/// accompanying wire images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Control-channel frame, fully consumed by the link.
    Control,
    /// New data; forward the payload on its channel. `lost` is the number of
    /// sequence numbers skipped since the previously delivered frame.
    Deliver { lost: u16 },
    /// Retransmission of the frame most recently delivered; already acked,
    /// do not forward again.
    Duplicate,
    /// New but empty data frame: counted, never forwarded. `lost` as above.
    Empty { lost: u16 },
}

/// Reaction to an inbound frame: wire images to emit, in order, before
/// acting on the disposition. Emitting first preserves the invariant that
/// the ACK for frame N precedes N's payload reaching a local client.
#[derive(Debug)]
pub struct Reaction {
    pub wire: Vec<BytesMut>,
    pub disposition: Disposition,
}

/// The retransmit slot: a copy of the one unacknowledged DATA frame.
#[derive(Debug)]
struct RexmitSlot {
    seqno: u16,
    channel: Channel,
    payload: BytesMut,
}

/// Stop-and-wait link state for one serial peer.
#[derive(Debug)]
pub struct Link {
    out_seqno: u16,
    rexmit: RexmitSlot,
    rexmit_acked: bool,
    received_data_frame: bool,
    last_rcvd_seqno: u16,
}

impl Link {
    pub fn new() -> Self {
        Self {
            out_seqno: 0,
            rexmit: RexmitSlot {
                seqno: 0,
                channel: Channel::CONTROL,
                payload: BytesMut::new(),
            },
            // The slot holds nothing at startup; never retransmit it.
            rexmit_acked: true,
            received_data_frame: false,
            last_rcvd_seqno: 0,
        }
    }

    /// True while a DATA frame awaits its ACK.
    pub fn outstanding(&self) -> bool {
        !self.rexmit_acked
    }

    /// Compose a DATA frame on `channel`, storing a retransmit copy.
    ///
    /// Returns the wire image to write. The caller must (re)arm its
    /// retransmit timer after every call.
    pub fn send_data(&mut self, channel: Channel, payload: &[u8]) -> BytesMut {
        self.out_seqno = self.out_seqno.wrapping_add(1);
        self.rexmit.seqno = self.out_seqno;
        self.rexmit.channel = channel;
        self.rexmit.payload.clear();
        self.rexmit.payload.extend_from_slice(payload);
        self.rexmit_acked = false;

        codec::encode(&Frame::data(self.out_seqno, channel, payload.to_vec()))
    }

    /// Wire image of the stored DATA frame, unchanged, while unacknowledged.
    ///
    /// The retransmission keeps its original sequence number so the peer's
    /// duplicate suppression holds.
    pub fn rexmit(&self) -> Option<BytesMut> {
        (!self.rexmit_acked).then(|| self.encode_rexmit())
    }

    /// Wire image of a NACK, for a frame the decoder dropped.
    pub fn nack(&self) -> BytesMut {
        codec::encode(&Frame::nack())
    }

    /// Run the reliability state machine over one inbound frame.
    pub fn handle_frame(&mut self, frame: &Frame) -> Reaction {
        let mut wire = Vec::new();

        if frame.channel == Channel::CONTROL {
            match frame.frame_type {
                FrameType::Nack => {
                    if self.rexmit_acked {
                        // Nothing is outstanding, so the NACK is a symptom of
                        // a lost or corrupted ACK. Answering with a NACK here
                        // could start a NACK storm; re-ACK the last frame we
                        // received instead.
                        if self.received_data_frame {
                            wire.push(codec::encode(&Frame::ack(self.last_rcvd_seqno)));
                        }
                    } else {
                        wire.push(self.encode_rexmit());
                    }
                }
                FrameType::Ack => {
                    if frame.seqno == self.rexmit.seqno {
                        self.rexmit_acked = true;
                    }
                    // ACKs for any other seqno leave the link untouched.
                }
                other => {
                    info!("got frame of type {other:?} on control channel");
                }
            }
            return Reaction {
                wire,
                disposition: Disposition::Control,
            };
        }

        // Every frame arriving on a data channel is acknowledged, duplicates
        // included: the first ACK may have been lost.
        wire.push(codec::encode(&Frame::ack(frame.seqno)));

        if self.received_data_frame && frame.seqno == self.last_rcvd_seqno {
            debug!("got a duplicate frame on channel {}", frame.channel);
            return Reaction {
                wire,
                disposition: Disposition::Duplicate,
            };
        }

        self.received_data_frame = true;
        let lost = seq_gap(frame.seqno, self.last_rcvd_seqno);
        self.last_rcvd_seqno = frame.seqno;

        let disposition = if frame.payload.is_empty() {
            debug!("got an empty frame on channel {}: not forwarding", frame.channel);
            Disposition::Empty { lost }
        } else {
            Disposition::Deliver { lost }
        };
        Reaction { wire, disposition }
    }

    fn encode_rexmit(&self) -> BytesMut {
        codec::encode(&Frame::data(
            self.rexmit.seqno,
            self.rexmit.channel,
            self.rexmit.payload.to_vec(),
        ))
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodeEvent, FrameDecoder};

    fn decode_one(wire: &[u8]) -> Frame {
        let mut decoder = FrameDecoder::new();
        for &b in wire {
            if let Some(DecodeEvent::FrameReady(frame)) = decoder.push_byte(b) {
                return frame;
            }
        }
        panic!("no frame in wire image");
    }

    #[test]
    fn seqnos_start_at_one_and_increment() {
        let mut link = Link::new();
        let first = decode_one(&link.send_data(Channel(5), b"a"));
        let second = decode_one(&link.send_data(Channel(5), b"b"));
        assert_eq!(first.seqno, 1);
        assert_eq!(second.seqno, 2);
    }

    #[test]
    fn nothing_to_retransmit_at_startup() {
        let link = Link::new();
        assert!(!link.outstanding());
        assert!(link.rexmit().is_none());
    }

    #[test]
    fn matching_ack_clears_the_slot() {
        let mut link = Link::new();
        let sent = decode_one(&link.send_data(Channel(5), b"payload"));
        assert!(link.outstanding());

        link.handle_frame(&Frame::ack(sent.seqno));
        assert!(!link.outstanding());
        assert!(link.rexmit().is_none());
    }

    #[test]
    fn mismatching_ack_changes_nothing() {
        let mut link = Link::new();
        let sent = decode_one(&link.send_data(Channel(5), b"payload"));

        link.handle_frame(&Frame::ack(sent.seqno.wrapping_add(9)));
        assert!(link.outstanding());
        let rexmit = decode_one(&link.rexmit().unwrap());
        assert_eq!(rexmit, sent);
    }

    #[test]
    fn retransmission_is_byte_identical() {
        let mut link = Link::new();
        let original = link.send_data(Channel(8), b"same bytes");
        let again = link.rexmit().unwrap();
        assert_eq!(&original[..], &again[..]);
    }

    #[test]
    fn nack_while_outstanding_retransmits_immediately() {
        let mut link = Link::new();
        let sent = decode_one(&link.send_data(Channel(5), b"payload"));

        let reaction = link.handle_frame(&Frame::nack());
        assert_eq!(reaction.disposition, Disposition::Control);
        assert_eq!(reaction.wire.len(), 1);
        assert_eq!(decode_one(&reaction.wire[0]), sent);
    }

    #[test]
    fn nack_while_idle_reacks_the_last_received_frame() {
        let mut link = Link::new();

        // Before any data frame was received: stay silent.
        let reaction = link.handle_frame(&Frame::nack());
        assert!(reaction.wire.is_empty());

        link.handle_frame(&Frame::data(5, Channel(7), &b"A"[..]));
        let reaction = link.handle_frame(&Frame::nack());
        assert_eq!(reaction.wire.len(), 1);
        let reack = decode_one(&reaction.wire[0]);
        assert_eq!(reack.frame_type, FrameType::Ack);
        assert_eq!(reack.seqno, 5);
    }

    #[test]
    fn inbound_data_is_acked_then_delivered() {
        let mut link = Link::new();
        let reaction = link.handle_frame(&Frame::data(1, Channel(7), &b"A"[..]));
        assert_eq!(reaction.disposition, Disposition::Deliver { lost: 0 });
        let ack = decode_one(&reaction.wire[0]);
        assert_eq!(ack.frame_type, FrameType::Ack);
        assert_eq!(ack.seqno, 1);
    }

    #[test]
    fn duplicate_data_is_acked_but_not_delivered() {
        let mut link = Link::new();
        let first = link.handle_frame(&Frame::data(5, Channel(7), &b"A"[..]));
        assert!(matches!(first.disposition, Disposition::Deliver { .. }));

        let second = link.handle_frame(&Frame::data(5, Channel(7), &b"A"[..]));
        assert_eq!(second.disposition, Disposition::Duplicate);
        let ack = decode_one(&second.wire[0]);
        assert_eq!((ack.frame_type, ack.seqno), (FrameType::Ack, 5));
    }

    #[test]
    fn sequence_gaps_are_counted_as_losses() {
        let mut link = Link::new();
        link.handle_frame(&Frame::data(1, Channel(7), &b"A"[..]));
        let reaction = link.handle_frame(&Frame::data(4, Channel(7), &b"B"[..]));
        assert_eq!(reaction.disposition, Disposition::Deliver { lost: 2 });
    }

    #[test]
    fn gap_accounting_survives_wraparound() {
        let mut link = Link::new();
        link.handle_frame(&Frame::data(u16::MAX, Channel(7), &b"A"[..]));
        let reaction = link.handle_frame(&Frame::data(0, Channel(7), &b"B"[..]));
        assert_eq!(reaction.disposition, Disposition::Deliver { lost: 0 });
    }

    #[test]
    fn empty_data_frames_are_counted_but_not_forwarded() {
        let mut link = Link::new();
        let reaction = link.handle_frame(&Frame::data(1, Channel(7), Vec::new()));
        assert_eq!(reaction.disposition, Disposition::Empty { lost: 0 });
        assert_eq!(decode_one(&reaction.wire[0]).seqno, 1);
    }

    #[test]
    fn only_one_frame_is_ever_outstanding() {
        let mut link = Link::new();
        link.send_data(Channel(5), b"first");
        // A second send overwrites the slot; the link never tracks two.
        let second = decode_one(&link.send_data(Channel(5), b"second"));
        let rexmit = decode_one(&link.rexmit().unwrap());
        assert_eq!(rexmit, second);
    }
}
