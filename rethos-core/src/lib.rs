#![forbid(unsafe_code)]

//! REthos core utilities shared by the link layer and the daemon: protocol
//! constants, configuration, error handling, and the statistics record.

pub mod config;
pub mod error;
pub mod stats;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use stats::{ChannelStats, GlobalStats, Stats, STATS_RECORD_LEN};
pub use types::{seq_gap, Channel, MTU, NUM_CHANNELS};
