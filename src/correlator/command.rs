//! # Command Client
//!
//! COMMAND_LONG sender correlated with COMMAND_ACK, plus thin builders for the
//! commands a configurator needs.
//!
//! Commands are never retried: a repeated calibration or reboot request is not
//! idempotent on the autopilot side.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::pending::{await_reply, PendingSlot};
use crate::error::{MavLinkError, Result};
use crate::link::{LinkHandle, ListenerId};
use crate::mavlink::messages::{CommandAck, CommandLong, MavResult};
use crate::mavlink::protocol::*;

/// Default wait for a COMMAND_ACK
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Accelerometer selection of PREFLIGHT_CALIBRATION (param5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccelCalibration {
    #[default]
    None,
    /// Six-position calibration
    Full,
    /// Board level (trim) only
    LevelHorizon,
    /// Single-position simple calibration
    Simple,
}

impl AccelCalibration {
    fn param(self) -> f32 {
        match self {
            AccelCalibration::None => 0.0,
            AccelCalibration::Full => 1.0,
            AccelCalibration::LevelHorizon => 2.0,
            AccelCalibration::Simple => 4.0,
        }
    }
}

/// Sensors selected for MAV_CMD_PREFLIGHT_CALIBRATION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreflightCalibration {
    pub gyroscope: bool,
    pub magnetometer: bool,
    pub barometer: bool,
    pub radio_trim: bool,
    pub accelerometer: AccelCalibration,
}

impl PreflightCalibration {
    pub fn accelerometer() -> Self {
        Self {
            accelerometer: AccelCalibration::Full,
            ..Self::default()
        }
    }

    pub fn gyroscope() -> Self {
        Self {
            gyroscope: true,
            ..Self::default()
        }
    }

    pub fn barometer() -> Self {
        Self {
            barometer: true,
            ..Self::default()
        }
    }

    pub fn level_horizon() -> Self {
        Self {
            accelerometer: AccelCalibration::LevelHorizon,
            ..Self::default()
        }
    }

    pub fn to_params(self) -> [f32; 7] {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        [
            flag(self.gyroscope),
            flag(self.magnetometer),
            flag(self.barometer),
            flag(self.radio_trim),
            self.accelerometer.param(),
            0.0,
            0.0,
        ]
    }
}

/// Parameters of MAV_CMD_DO_MOTOR_TEST (throttle as percent)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorTest {
    /// 1-based motor instance
    pub motor: u8,
    pub throttle_percent: f32,
    pub duration: Duration,
    /// Number of motors to spin in sequence, starting at `motor`
    pub motor_count: u8,
}

impl MotorTest {
    pub fn to_params(self) -> [f32; 7] {
        [
            self.motor as f32,
            0.0, // MOTOR_TEST_THROTTLE_PERCENT
            self.throttle_percent.clamp(0.0, 100.0),
            self.duration.as_secs_f32(),
            self.motor_count as f32,
            0.0, // MOTOR_TEST_ORDER_DEFAULT
            0.0,
        ]
    }
}

/// Request/response client for COMMAND_LONG
pub struct CommandClient {
    link: LinkHandle,
    slot: Arc<PendingSlot<CommandAck>>,
    channel: tokio::sync::Mutex<()>,
    listener: ListenerId,
    ack_timeout: Duration,
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

impl CommandClient {
    pub fn new(link: LinkHandle, ack_timeout: Duration) -> Self {
        let slot = Arc::new(PendingSlot::new());
        let offer = Arc::clone(&slot);
        let listener = link.dispatcher().on_command_ack(move |_, ack| {
            offer.offer(ack);
        });

        Self {
            link,
            slot,
            channel: tokio::sync::Mutex::new(()),
            listener,
            ack_timeout,
        }
    }

    /// Send a COMMAND_LONG and wait for its COMMAND_ACK
    ///
    /// Any result code is returned as-is. `InProgress` is not terminal: a
    /// second ACK for the same command may follow on the dispatcher.
    ///
    /// # Errors
    ///
    /// * `Timeout` if no ACK for `command` arrives in time
    /// * `LinkClosed` / `ConnectionLost` if the link stops first
    pub async fn send(&self, command: u16, params: [f32; 7]) -> Result<CommandAck> {
        let _channel = self.channel.lock().await;
        let target = self.link.target();

        let message = CommandLong {
            target_system: target.system_id,
            target_component: target.component_id,
            command,
            confirmation: 0,
            params,
        };

        let rx = self.slot.arm(move |ack: &CommandAck| ack.command == command);
        debug!("Sending command {} {:?}", command, params);

        if let Err(e) = self.link.send_message(&message).await {
            self.slot.clear();
            return Err(e);
        }

        match await_reply(rx, self.ack_timeout, &self.link, "COMMAND_ACK").await {
            Ok(ack) => {
                debug!("Command {} acknowledged: {}", command, ack.result);
                Ok(ack)
            }
            Err(e) => {
                self.slot.clear();
                Err(e)
            }
        }
    }

    /// Send a command and turn any refusal into `CommandRejected`
    ///
    /// `InProgress` counts as success.
    pub async fn send_checked(&self, command: u16, params: [f32; 7]) -> Result<CommandAck> {
        let ack = self.send(command, params).await?;
        match ack.result {
            MavResult::Accepted | MavResult::InProgress => Ok(ack),
            result => {
                warn!("Command {} rejected: {}", command, result);
                Err(MavLinkError::CommandRejected { command, result })
            }
        }
    }

    pub async fn motor_test(&self, test: MotorTest) -> Result<CommandAck> {
        info!(
            "Motor test: motor {} at {}% for {:?}",
            test.motor, test.throttle_percent, test.duration
        );
        self.send(MAV_CMD_DO_MOTOR_TEST, test.to_params()).await
    }

    pub async fn preflight_calibration(&self, selection: PreflightCalibration) -> Result<CommandAck> {
        self.send(MAV_CMD_PREFLIGHT_CALIBRATION, selection.to_params()).await
    }

    /// Reboot the autopilot
    pub async fn reboot(&self) -> Result<CommandAck> {
        self.send(MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    pub async fn shutdown(&self) -> Result<CommandAck> {
        self.send(MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN, [2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    /// Arm; `force` bypasses pre-arm checks
    pub async fn arm(&self, force: bool) -> Result<CommandAck> {
        self.send(MAV_CMD_COMPONENT_ARM_DISARM, arm_disarm_params(true, force))
            .await
    }

    /// Disarm; `force` disarms even in flight
    pub async fn disarm(&self, force: bool) -> Result<CommandAck> {
        self.send(MAV_CMD_COMPONENT_ARM_DISARM, arm_disarm_params(false, force))
            .await
    }

    /// Report an accelerometer calibration position (1-6) or a success/abort value
    pub async fn accel_cal_vehicle_pos(&self, position: f32) -> Result<CommandAck> {
        self.send(MAV_CMD_ACCELCAL_VEHICLE_POS, [position, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    /// Reset every parameter to its default
    pub async fn reset_parameters(&self) -> Result<CommandAck> {
        self.send(MAV_CMD_PREFLIGHT_STORAGE, [2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        self.link.dispatcher().unsubscribe(self.listener);
    }
}

fn arm_disarm_params(arm: bool, force: bool) -> [f32; 7] {
    [
        if arm { 1.0 } else { 0.0 },
        if force { ARM_DISARM_FORCE_MAGIC } else { 0.0 },
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_calibration_params() {
        assert_eq!(
            PreflightCalibration::accelerometer().to_params(),
            [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]
        );
        assert_eq!(
            PreflightCalibration::gyroscope().to_params(),
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(
            PreflightCalibration::barometer().to_params(),
            [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(
            PreflightCalibration::level_horizon().to_params(),
            [0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_arm_disarm_force_magic() {
        assert_eq!(arm_disarm_params(true, false)[..2], [1.0, 0.0]);
        assert_eq!(arm_disarm_params(true, true)[..2], [1.0, 21196.0]);
        assert_eq!(arm_disarm_params(false, true)[..2], [0.0, 21196.0]);
    }

    #[test]
    fn test_motor_test_params() {
        let params = MotorTest {
            motor: 2,
            throttle_percent: 150.0,
            duration: Duration::from_millis(1500),
            motor_count: 1,
        }
        .to_params();

        assert_eq!(params[0], 2.0);
        assert_eq!(params[1], 0.0);
        assert_eq!(params[2], 100.0, "throttle is clamped to 100%");
        assert_eq!(params[3], 1.5);
        assert_eq!(params[4], 1.0);
    }
}
