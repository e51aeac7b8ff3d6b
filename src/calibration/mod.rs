//! # Sensor Calibration
//!
//! Guided accelerometer calibration and single-shot sensor calibrations.
//!
//! This module handles:
//! - The calibration state machine (pure, synchronous)
//! - Recognizing the autopilot's position prompts in status text
//! - IMU plausibility checks before each position sample
//! - Driving the machine against a live link

pub mod machine;
pub mod imu_check;
pub mod controller;

pub use controller::CalibrationController;
pub use imu_check::{GravityAlignmentCheck, ImuPlausibility, ImuVerdict};
pub use machine::{
    CalibrationEvent, CalibrationKind, CalibrationMachine, CalibrationProgress, CalibrationState,
    FailureReason, VehiclePosition, POSITION_COUNT,
};
