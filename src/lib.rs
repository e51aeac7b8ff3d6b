//! # MAVLink Link Core
//!
//! Ground-station side of a MAVLink connection to an autopilot.
//!
//! This library provides:
//! - MAVLink v1/v2 framing with CRC-extra validation and stream reassembly
//! - A link engine that owns the byte stream, sends the ground-station
//!   heartbeat and dispatches typed messages to listeners
//! - Parameter and command request/reply correlation
//! - A MAVLink FTP client (list, download, delete)
//! - The guided accelerometer calibration state machine
//!
//! ```no_run
//! use mav_link_core::link::{LinkConfig, MavLink};
//! use mav_link_core::correlator::{ParamClient, ParamClientConfig};
//!
//! # async fn run(stream: tokio::io::DuplexStream) -> mav_link_core::error::Result<()> {
//! let link = MavLink::open(stream, LinkConfig::default());
//! let params = ParamClient::new(link.handle(), ParamClientConfig::default());
//! let value = params.read_by_name("INS_ACCOFFS_X").await?;
//! println!("{} = {}", value.param_id, value.param_value);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod mavlink;
pub mod link;
pub mod correlator;
pub mod ftp;
pub mod calibration;
pub mod serial;
pub mod journal;
