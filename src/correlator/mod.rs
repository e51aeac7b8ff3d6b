//! # Request/Response Correlation
//!
//! Matches asynchronous PARAM_VALUE and COMMAND_ACK replies back to the
//! request that caused them. Each client owns one logical channel with at
//! most one outstanding request.

pub mod pending;
pub mod params;
pub mod command;

pub use command::{AccelCalibration, CommandClient, MotorTest, PreflightCalibration};
pub use params::{ParamClient, ParamClientConfig};
