//! Length-prefixed message framing spoken with local clients.
//!
//! Every message in either direction is a `u32` big-endian length followed by
//! that many payload bytes, so message boundaries survive the stream socket.
//! A client message longer than the link MTU is drained and skipped without
//! closing the connection; a short read mid-message closes it.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rethos_core::MTU;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Codec for the local client protocol.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Remaining bytes of an oversized message still to be drained.
    skip: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self { skip: 0 }
    }
}

impl Decoder for MessageCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        loop {
            if self.skip > 0 {
                let n = self.skip.min(src.len());
                src.advance(n);
                self.skip -= n;
                if self.skip > 0 {
                    return Ok(None);
                }
            }
            if src.len() < 4 {
                return Ok(None);
            }
            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if len > MTU {
                warn!("client message of {len} bytes exceeds the link MTU: skipping");
                src.advance(4);
                self.skip = len;
                continue;
            }
            if src.len() < 4 + len {
                src.reserve(4 + len - src.len());
                return Ok(None);
            }
            src.advance(4);
            return Ok(Some(src.split_to(len)));
        }
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> io::Result<()> {
        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
