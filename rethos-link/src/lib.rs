#![forbid(unsafe_code)]

//! REthos serial link layer.
//!
//! * [`checksum`]: incremental Fletcher-16 over the checksummed frame bytes.
//! * [`frame`]: the typed frame model (type, sequence number, channel, payload).
//! * [`codec`]: byte-oriented wire encoder and the incremental decoder state machine.
//! * [`link`]: stop-and-wait reliability with one outstanding DATA frame,
//!   ACK/NACK reactions, duplicate suppression, loss accounting.
//!
//! Everything here is synchronous and I/O-free; the daemon owns the serial
//! descriptor and writes the wire images this crate produces.

pub mod checksum;
pub mod codec;
pub mod frame;
pub mod link;

pub use checksum::Fletcher16;
pub use codec::{encode, DecodeEvent, FrameDecoder};
pub use frame::{Frame, FrameType};
pub use link::{Disposition, Link, Reaction};
