#![forbid(unsafe_code)]

//! REthos host daemon library.
//!
//! The binary in `main.rs` wires these pieces together:
//! * [`serial`]: open and configure the serial line to the MCU.
//! * [`tun`]: optional kernel TUN device for IP packet forwarding.
//! * [`message`]: length-prefixed framing spoken with local clients.
//! * [`endpoint`]: per-channel local endpoints (one client at a time).
//! * [`mux`]: the event loop tying serial, TUN, stdin, clients, and timers
//!   together.

pub mod endpoint;
pub mod message;
pub mod mux;
pub mod serial;
pub mod tun;

pub use mux::{Event, Mux};
