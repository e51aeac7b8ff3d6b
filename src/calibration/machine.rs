//! # Calibration State Machine
//!
//! Pure transition logic for accelerometer and single-shot sensor
//! calibrations. No I/O happens here: every input returns the actions the
//! controller must carry out.
//!
//! ## Accelerometer flow
//!
//! ```text
//! Idle -> CommandSent -> WaitingForInstruction
//!      -> (PositionRequested -> AwaitingUserConfirmation -> Sampling) x 6
//!      -> Completed | Failed | Cancelled
//! ```
//!
//! The accelerometer calibration only advances on remote signals. It is never
//! completed by a timer, and never without six confirmed positions followed by
//! an explicit success line.
//!
//! ## Single-shot kinds
//!
//! Gyroscope, barometer and level-horizon complete a fixed delay after the
//! command is accepted.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::correlator::PreflightCalibration;
use crate::mavlink::messages::MavResult;
use crate::mavlink::protocol::{
    ACCELCAL_VEHICLE_POS_FAILED, MAV_CMD_ACCELCAL_VEHICLE_POS, MAV_CMD_PREFLIGHT_CALIBRATION,
};

/// Number of positions of the six-position calibration
pub const POSITION_COUNT: usize = 6;

/// Vehicle attitude requested by the autopilot (ACCELCAL_VEHICLE_POS 1-6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VehiclePosition {
    Level = 1,
    Left = 2,
    Right = 3,
    NoseDown = 4,
    NoseUp = 5,
    Back = 6,
}

impl VehiclePosition {
    pub const ALL: [VehiclePosition; POSITION_COUNT] = [
        VehiclePosition::Level,
        VehiclePosition::Left,
        VehiclePosition::Right,
        VehiclePosition::NoseDown,
        VehiclePosition::NoseUp,
        VehiclePosition::Back,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.get(number.checked_sub(1)? as usize).copied()
    }

    /// Default user instruction for this position
    pub fn instruction(self) -> &'static str {
        match self {
            VehiclePosition::Level => "Place the vehicle level",
            VehiclePosition::Left => "Place the vehicle on its left side",
            VehiclePosition::Right => "Place the vehicle on its right side",
            VehiclePosition::NoseDown => "Place the vehicle nose down",
            VehiclePosition::NoseUp => "Place the vehicle nose up",
            VehiclePosition::Back => "Place the vehicle on its back",
        }
    }

    /// Extract the requested position from an autopilot status line
    ///
    /// # Examples
    ///
    /// ```
    /// use mav_link_core::calibration::VehiclePosition;
    ///
    /// assert_eq!(
    ///     VehiclePosition::from_status_text("Place vehicle on its LEFT side and press any key."),
    ///     Some(VehiclePosition::Left)
    /// );
    /// assert_eq!(VehiclePosition::from_status_text("Calibration successful"), None);
    /// ```
    pub fn from_status_text(text: &str) -> Option<Self> {
        let text = text.to_ascii_lowercase();
        if !text.contains("place") {
            return None;
        }

        if text.contains("nose down") || text.contains("nosedown") {
            Some(VehiclePosition::NoseDown)
        } else if text.contains("nose up") || text.contains("noseup") {
            Some(VehiclePosition::NoseUp)
        } else if text.contains("left") {
            Some(VehiclePosition::Left)
        } else if text.contains("right") {
            Some(VehiclePosition::Right)
        } else if text.contains("back") || text.contains("upside") {
            Some(VehiclePosition::Back)
        } else if text.contains("level") {
            Some(VehiclePosition::Level)
        } else {
            None
        }
    }
}

impl fmt::Display for VehiclePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VehiclePosition::Level => "level",
            VehiclePosition::Left => "left side",
            VehiclePosition::Right => "right side",
            VehiclePosition::NoseDown => "nose down",
            VehiclePosition::NoseUp => "nose up",
            VehiclePosition::Back => "back",
        };
        write!(f, "{} ({})", name, self.number())
    }
}

/// How a calibration kind reaches `Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Only an explicit remote success line completes it
    RemoteSignal,
    /// Completes a fixed delay after the command is accepted
    AfterDelay,
}

/// Sensor being calibrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationKind {
    Accelerometer,
    Gyroscope,
    Barometer,
    LevelHorizon,
}

impl CalibrationKind {
    pub fn completion_policy(self) -> CompletionPolicy {
        match self {
            CalibrationKind::Accelerometer => CompletionPolicy::RemoteSignal,
            CalibrationKind::Gyroscope | CalibrationKind::Barometer | CalibrationKind::LevelHorizon => {
                CompletionPolicy::AfterDelay
            }
        }
    }

    pub fn command(self) -> PreflightCalibration {
        match self {
            CalibrationKind::Accelerometer => PreflightCalibration::accelerometer(),
            CalibrationKind::Gyroscope => PreflightCalibration::gyroscope(),
            CalibrationKind::Barometer => PreflightCalibration::barometer(),
            CalibrationKind::LevelHorizon => PreflightCalibration::level_horizon(),
        }
    }
}

/// Why a calibration ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    CommandRejected(MavResult),
    CommandTimedOut,
    RemoteReportedFailure(String),
    ConnectionLost,
    SendFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::CommandRejected(result) => write!(f, "command {}", result),
            FailureReason::CommandTimedOut => write!(f, "no response to calibration command"),
            FailureReason::RemoteReportedFailure(text) => write!(f, "autopilot reported: {}", text),
            FailureReason::ConnectionLost => write!(f, "connection lost"),
            FailureReason::SendFailed(reason) => write!(f, "send failed: {}", reason),
        }
    }
}

/// Calibration state; positions exist only where they are meaningful
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    CommandSent,
    WaitingForInstruction,
    /// Single-shot calibration in progress
    Running,
    PositionRequested { position: VehiclePosition },
    AwaitingUserConfirmation { position: VehiclePosition },
    Sampling { position: VehiclePosition },
    Completed,
    Failed(FailureReason),
    Cancelled,
}

impl CalibrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CalibrationState::Completed | CalibrationState::Failed(_) | CalibrationState::Cancelled
        )
    }

    /// A session exists and has not ended
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != CalibrationState::Idle
    }

    /// Position the state refers to, if any
    pub fn position(&self) -> Option<VehiclePosition> {
        match self {
            CalibrationState::PositionRequested { position }
            | CalibrationState::AwaitingUserConfirmation { position }
            | CalibrationState::Sampling { position } => Some(*position),
            _ => None,
        }
    }
}

/// Confirmed positions out of six
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationProgress {
    pub confirmed: usize,
    pub total: usize,
}

impl CalibrationProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.confirmed * 100) / self.total) as u8
    }
}

/// Events for the user interface
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    StateChanged(CalibrationState),
    ProgressChanged(CalibrationProgress),
    /// The user must place the vehicle and confirm
    StepRequired {
        position: VehiclePosition,
        instruction: String,
    },
    /// The autopilot refused the sample; the same position must be retried
    PositionRejected {
        position: VehiclePosition,
        reason: String,
    },
    /// The vehicle does not look like it is in the requested position
    ImuCheckFailed {
        position: VehiclePosition,
        detail: String,
    },
    StatusText(String),
}

/// Inputs driving the machine
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationInput {
    Start(CalibrationKind),
    CommandAck { command: u16, result: MavResult },
    CommandTimedOut { command: u16 },
    SendFailed { command: u16, reason: String },
    StatusText(String),
    UserConfirmed,
    ImuCheckResult {
        position: VehiclePosition,
        passed: bool,
        detail: String,
    },
    CompletionTimerElapsed { generation: u64 },
    Cancel,
    Disconnected,
}

/// Work the controller performs on behalf of the machine
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationAction {
    SendCommand { command: u16, params: [f32; 7] },
    RunImuCheck { position: VehiclePosition },
    ScheduleCompletion { generation: u64, after: Duration },
    Emit(CalibrationEvent),
}

#[derive(Debug)]
struct Session {
    kind: CalibrationKind,
    confirmed: BTreeSet<VehiclePosition>,
    last_status: Option<String>,
    instruction: Option<String>,
}

/// The calibration state machine
#[derive(Debug)]
pub struct CalibrationMachine {
    state: CalibrationState,
    session: Option<Session>,
    generation: u64,
    simple_completion_delay: Duration,
}

impl CalibrationMachine {
    pub fn new(simple_completion_delay: Duration) -> Self {
        Self {
            state: CalibrationState::Idle,
            session: None,
            generation: 0,
            simple_completion_delay,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn kind(&self) -> Option<CalibrationKind> {
        self.session.as_ref().map(|s| s.kind)
    }

    /// Positions confirmed by the autopilot in the current session
    pub fn confirmed_positions(&self) -> Vec<VehiclePosition> {
        self.session
            .as_ref()
            .map(|s| s.confirmed.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn last_status(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.last_status.as_deref())
    }

    /// Instruction for the current step
    pub fn instruction(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.instruction.as_deref())
    }

    /// Feed one input and collect the resulting actions
    pub fn handle(&mut self, input: CalibrationInput) -> Vec<CalibrationAction> {
        let mut actions = Vec::new();

        match input {
            CalibrationInput::Start(kind) => self.on_start(kind, &mut actions),
            CalibrationInput::CommandAck { command, result } => {
                self.on_command_ack(command, result, &mut actions)
            }
            CalibrationInput::CommandTimedOut { command } => {
                if command == MAV_CMD_PREFLIGHT_CALIBRATION && self.state == CalibrationState::CommandSent {
                    self.fail(FailureReason::CommandTimedOut, &mut actions);
                }
            }
            CalibrationInput::SendFailed { command, reason } => {
                if self.state.is_active() {
                    warn!("Calibration command {} could not be sent: {}", command, reason);
                    self.fail(FailureReason::SendFailed(reason), &mut actions);
                }
            }
            CalibrationInput::StatusText(text) => self.on_status_text(text, &mut actions),
            CalibrationInput::UserConfirmed => {
                if let CalibrationState::PositionRequested { position } = self.state {
                    self.transition(CalibrationState::AwaitingUserConfirmation { position }, &mut actions);
                    actions.push(CalibrationAction::RunImuCheck { position });
                } else {
                    debug!("Ignoring confirmation in state {:?}", self.state);
                }
            }
            CalibrationInput::ImuCheckResult {
                position,
                passed,
                detail,
            } => self.on_imu_check(position, passed, detail, &mut actions),
            CalibrationInput::CompletionTimerElapsed { generation } => {
                if generation == self.generation && self.state == CalibrationState::Running {
                    self.transition(CalibrationState::Completed, &mut actions);
                }
            }
            CalibrationInput::Cancel => self.on_cancel(&mut actions),
            CalibrationInput::Disconnected => {
                if self.state.is_active() {
                    self.fail(FailureReason::ConnectionLost, &mut actions);
                }
            }
        }

        actions
    }

    fn on_start(&mut self, kind: CalibrationKind, actions: &mut Vec<CalibrationAction>) {
        if self.state.is_active() {
            warn!("Calibration already running, ignoring start of {:?}", kind);
            return;
        }

        info!("Starting {:?} calibration", kind);
        self.generation += 1;
        self.session = Some(Session {
            kind,
            confirmed: BTreeSet::new(),
            last_status: None,
            instruction: None,
        });

        actions.push(CalibrationAction::SendCommand {
            command: MAV_CMD_PREFLIGHT_CALIBRATION,
            params: kind.command().to_params(),
        });
        self.transition(CalibrationState::CommandSent, actions);
    }

    fn on_command_ack(&mut self, command: u16, result: MavResult, actions: &mut Vec<CalibrationAction>) {
        if !self.state.is_active() {
            return;
        }
        let accepted = matches!(result, MavResult::Accepted | MavResult::InProgress);

        match command {
            MAV_CMD_PREFLIGHT_CALIBRATION => {
                if !accepted {
                    self.fail(FailureReason::CommandRejected(result), actions);
                    return;
                }
                if self.state != CalibrationState::CommandSent {
                    return;
                }
                match self.kind().map(CalibrationKind::completion_policy) {
                    Some(CompletionPolicy::RemoteSignal) => {
                        self.transition(CalibrationState::WaitingForInstruction, actions);
                    }
                    Some(CompletionPolicy::AfterDelay) => {
                        self.transition(CalibrationState::Running, actions);
                        actions.push(CalibrationAction::ScheduleCompletion {
                            generation: self.generation,
                            after: self.simple_completion_delay,
                        });
                    }
                    None => {}
                }
            }
            MAV_CMD_ACCELCAL_VEHICLE_POS => {
                let CalibrationState::Sampling { position } = self.state else {
                    return;
                };
                match result {
                    MavResult::Accepted | MavResult::InProgress => {
                        debug!("Sample for {} acknowledged", position);
                    }
                    MavResult::TemporarilyRejected | MavResult::Denied => {
                        self.reject_position(position, format!("sample {}", result), actions);
                    }
                    other => self.fail(FailureReason::CommandRejected(other), actions),
                }
            }
            _ => {}
        }
    }

    fn on_status_text(&mut self, text: String, actions: &mut Vec<CalibrationAction>) {
        if !self.state.is_active() {
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session.last_status = Some(text.clone());
        }
        actions.push(CalibrationAction::Emit(CalibrationEvent::StatusText(text.clone())));

        if self.kind() != Some(CalibrationKind::Accelerometer) {
            return;
        }

        let lower = text.to_ascii_lowercase();
        if lower.contains("calibration") && (lower.contains("failed") || lower.contains("cancelled")) {
            self.fail(FailureReason::RemoteReportedFailure(text), actions);
            return;
        }

        if lower.contains("calibration") && lower.contains("successful") {
            self.on_success_line(actions);
            return;
        }

        if let Some(position) = VehiclePosition::from_status_text(&text) {
            self.on_position_requested(position, text, actions);
        }
    }

    fn on_position_requested(
        &mut self,
        requested: VehiclePosition,
        text: String,
        actions: &mut Vec<CalibrationAction>,
    ) {
        match self.state.clone() {
            CalibrationState::CommandSent | CalibrationState::WaitingForInstruction => {}
            CalibrationState::Sampling { position } if position == requested => {
                // Asked again for the position just sampled: the sample was refused
                self.reject_position(position, text, actions);
                return;
            }
            CalibrationState::Sampling { position } => self.confirm(position, actions),
            CalibrationState::PositionRequested { position }
            | CalibrationState::AwaitingUserConfirmation { position } => {
                if position == requested {
                    return;
                }
                debug!("Autopilot moved from {} to {}", position, requested);
            }
            _ => return,
        }

        if let Some(session) = self.session.as_mut() {
            // A position asked for again must be sampled again
            if session.confirmed.remove(&requested) {
                actions.push(CalibrationAction::Emit(CalibrationEvent::ProgressChanged(
                    progress_of(session),
                )));
            }
            session.instruction = Some(text.clone());
        }

        self.transition(CalibrationState::PositionRequested { position: requested }, actions);
        actions.push(CalibrationAction::Emit(CalibrationEvent::StepRequired {
            position: requested,
            instruction: text,
        }));
    }

    fn on_success_line(&mut self, actions: &mut Vec<CalibrationAction>) {
        if let CalibrationState::Sampling { position } = self.state {
            self.confirm(position, actions);
        }

        let confirmed = self.session.as_ref().map_or(0, |s| s.confirmed.len());
        if confirmed == POSITION_COUNT {
            info!("Accelerometer calibration successful");
            self.transition(CalibrationState::Completed, actions);
        } else {
            self.fail(
                FailureReason::RemoteReportedFailure(format!(
                    "success reported with only {} of {} positions confirmed",
                    confirmed, POSITION_COUNT
                )),
                actions,
            );
        }
    }

    fn on_imu_check(
        &mut self,
        position: VehiclePosition,
        passed: bool,
        detail: String,
        actions: &mut Vec<CalibrationAction>,
    ) {
        match self.state {
            CalibrationState::AwaitingUserConfirmation { position: current } if current == position => {}
            _ => {
                debug!("Ignoring stale IMU check for {}", position);
                return;
            }
        }

        if passed {
            actions.push(CalibrationAction::SendCommand {
                command: MAV_CMD_ACCELCAL_VEHICLE_POS,
                params: [position.number() as f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            });
            self.transition(CalibrationState::Sampling { position }, actions);
        } else {
            warn!("IMU check failed for {}: {}", position, detail);
            self.transition(CalibrationState::PositionRequested { position }, actions);
            actions.push(CalibrationAction::Emit(CalibrationEvent::ImuCheckFailed {
                position,
                detail,
            }));
            actions.push(CalibrationAction::Emit(CalibrationEvent::StepRequired {
                position,
                instruction: self.current_instruction(position),
            }));
        }
    }

    fn on_cancel(&mut self, actions: &mut Vec<CalibrationAction>) {
        if !self.state.is_active() {
            return;
        }

        // Abort the six-position sequence once the autopilot has started it
        let remote_running = self.kind() == Some(CalibrationKind::Accelerometer)
            && self.state != CalibrationState::CommandSent;
        if remote_running {
            actions.push(CalibrationAction::SendCommand {
                command: MAV_CMD_ACCELCAL_VEHICLE_POS,
                params: [ACCELCAL_VEHICLE_POS_FAILED, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            });
        }

        info!("Calibration cancelled");
        self.transition(CalibrationState::Cancelled, actions);
    }

    fn reject_position(&mut self, position: VehiclePosition, reason: String, actions: &mut Vec<CalibrationAction>) {
        warn!("Position {} rejected: {}", position, reason);
        self.transition(CalibrationState::PositionRequested { position }, actions);
        actions.push(CalibrationAction::Emit(CalibrationEvent::PositionRejected { position, reason }));
        actions.push(CalibrationAction::Emit(CalibrationEvent::StepRequired {
            position,
            instruction: self.current_instruction(position),
        }));
    }

    fn confirm(&mut self, position: VehiclePosition, actions: &mut Vec<CalibrationAction>) {
        if let Some(session) = self.session.as_mut() {
            if session.confirmed.insert(position) {
                info!("Position {} confirmed", position);
                actions.push(CalibrationAction::Emit(CalibrationEvent::ProgressChanged(
                    progress_of(session),
                )));
            }
        }
    }

    fn current_instruction(&self, position: VehiclePosition) -> String {
        self.instruction()
            .map(str::to_string)
            .unwrap_or_else(|| position.instruction().to_string())
    }

    fn fail(&mut self, reason: FailureReason, actions: &mut Vec<CalibrationAction>) {
        warn!("Calibration failed: {}", reason);
        self.transition(CalibrationState::Failed(reason), actions);
    }

    fn transition(&mut self, next: CalibrationState, actions: &mut Vec<CalibrationAction>) {
        if next == self.state {
            return;
        }
        debug!("Calibration state {:?} -> {:?}", self.state, next);

        if next.is_terminal() {
            self.session = None;
            self.generation += 1;
        }
        self.state = next.clone();
        actions.push(CalibrationAction::Emit(CalibrationEvent::StateChanged(next)));
    }
}

fn progress_of(session: &Session) -> CalibrationProgress {
    CalibrationProgress {
        confirmed: session.confirmed.len(),
        total: POSITION_COUNT,
    }
}
