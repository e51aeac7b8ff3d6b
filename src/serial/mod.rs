//! # Serial Transport
//!
//! Opens the serial connection to an autopilot.
//!
//! The link engine takes any async byte stream; this module only finds and
//! opens the device. Everything past `open` is the link's business.

use crate::error::{MavLinkError, Result};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Common autopilot baud rate over USB and telemetry radios
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default autopilot device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC (flight controllers)
    "/dev/ttyUSB0", // USB-to-serial adapters and telemetry radios
];

/// Opened autopilot serial port
pub struct AutopilotSerial {
    port: tokio_serial::SerialStream,
    device_path: String,
}

impl std::fmt::Debug for AutopilotSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutopilotSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl AutopilotSerial {
    /// Open the configured device, or probe the default paths when `path` is empty
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mav_link_core::serial::AutopilotSerial;
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let serial = AutopilotSerial::open("", 115200)?;
    ///     println!("Connected to {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        if path.is_empty() {
            Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate)
        } else {
            Self::open_with_paths(&[path], baud_rate)
        }
    }

    /// Try each path in order and keep the first that opens
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened autopilot at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(MavLinkError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open one port as 8N1 without flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| MavLinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand the stream over to a link
    pub fn into_stream(self) -> tokio_serial::SerialStream {
        self.port
    }
}
