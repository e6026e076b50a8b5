//! Serial line setup: 8N1, raw, no hardware or software flow control.

use rethos_core::{Config, Error, Result};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Open the configured serial device. The baud rate has already been
/// validated against the supported set by [`Config::validate`].
pub fn open(cfg: &Config) -> Result<SerialStream> {
    tokio_serial::new(cfg.device.as_str(), cfg.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| Error::config(format!("could not open serial device {}: {e}", cfg.device)))
}
