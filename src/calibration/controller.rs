//! # Calibration Controller
//!
//! Runs a [`CalibrationMachine`] against a live link.
//!
//! Every input (remote ACK, status line, user action, timer, IMU verdict,
//! link loss) goes through one queue, so the machine sees them strictly in
//! order. Slow work (sending commands, the IMU check, completion timers) runs
//! in spawned tasks that feed their result back into the same queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::imu_check::ImuPlausibility;
use super::machine::{
    CalibrationAction, CalibrationEvent, CalibrationInput, CalibrationKind, CalibrationMachine,
    CalibrationState,
};
use crate::correlator::CommandClient;
use crate::error::{MavLinkError, Result};
use crate::link::{LinkHandle, LinkState, ListenerId};
use crate::mavlink::messages::CommandAck;
use crate::mavlink::protocol::{MAV_CMD_ACCELCAL_VEHICLE_POS, MAV_CMD_PREFLIGHT_CALIBRATION};

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 256;

type InputSender = mpsc::UnboundedSender<CalibrationInput>;

/// Async driver of the calibration machine
pub struct CalibrationController {
    link: LinkHandle,
    commands: Arc<CommandClient>,
    inputs: InputSender,
    events: broadcast::Sender<CalibrationEvent>,
    state: watch::Receiver<CalibrationState>,
    listeners: Vec<ListenerId>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CalibrationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationController")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl CalibrationController {
    /// Subscribe to the link and start the controller task
    ///
    /// # Arguments
    ///
    /// * `link` - Link to the autopilot
    /// * `commands` - Command client used for every calibration command
    /// * `imu` - Plausibility check run before each sample
    /// * `simple_completion_delay` - Delay after which single-shot kinds complete
    pub fn spawn(
        link: LinkHandle,
        commands: Arc<CommandClient>,
        imu: Arc<dyn ImuPlausibility>,
        simple_completion_delay: Duration,
    ) -> Self {
        let (inputs, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state) = watch::channel(CalibrationState::Idle);
        let cancel = CancellationToken::new();

        let mut listeners = Vec::new();

        let tx = inputs.clone();
        listeners.push(link.dispatcher().on_command_ack(move |_, ack: &CommandAck| {
            if matches!(ack.command, MAV_CMD_PREFLIGHT_CALIBRATION | MAV_CMD_ACCELCAL_VEHICLE_POS) {
                let _ = tx.send(CalibrationInput::CommandAck {
                    command: ack.command,
                    result: ack.result,
                });
            }
        }));

        let tx = inputs.clone();
        listeners.push(link.dispatcher().on_status_text(move |_, text| {
            let _ = tx.send(CalibrationInput::StatusText(text.text.clone()));
        }));

        let driver = Driver {
            machine: CalibrationMachine::new(simple_completion_delay),
            commands: Arc::clone(&commands),
            imu,
            inputs: inputs.clone(),
            events: events.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(driver.run(rx, link.watch_state(), cancel.clone()));

        Self {
            link,
            commands,
            inputs,
            events,
            state,
            listeners,
            cancel,
            task: Some(task),
        }
    }

    /// Begin a calibration
    ///
    /// # Errors
    ///
    /// Returns `Busy` if a calibration is already running
    pub fn start(&self, kind: CalibrationKind) -> Result<()> {
        if self.state().is_active() {
            return Err(MavLinkError::Busy("calibration already running"));
        }
        self.push(CalibrationInput::Start(kind))
    }

    /// The user has placed the vehicle in the requested position
    ///
    /// # Errors
    ///
    /// Returns error if no position is currently requested
    pub fn accept_step(&self) -> Result<()> {
        match self.state() {
            CalibrationState::PositionRequested { .. } => self.push(CalibrationInput::UserConfirmed),
            other => Err(MavLinkError::Calibration(format!(
                "no position requested (state {:?})",
                other
            ))),
        }
    }

    /// Abort the running calibration
    pub fn cancel(&self) -> Result<()> {
        self.push(CalibrationInput::Cancel)
    }

    /// Reboot the autopilot, typically after a completed calibration
    ///
    /// # Errors
    ///
    /// Returns `Busy` while a calibration is running
    pub async fn reboot(&self) -> Result<CommandAck> {
        if self.state().is_active() {
            return Err(MavLinkError::Busy("calibration running"));
        }
        info!("Rebooting autopilot");
        self.commands.reboot().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CalibrationEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> CalibrationState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<CalibrationState> {
        self.state.clone()
    }

    /// Stop the controller task and detach from the link
    pub async fn shutdown(mut self) {
        self.detach();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Calibration task ended abnormally: {}", e);
            }
        }
    }

    fn push(&self, input: CalibrationInput) -> Result<()> {
        self.inputs
            .send(input)
            .map_err(|_| MavLinkError::Calibration("controller stopped".to_string()))
    }

    fn detach(&mut self) {
        self.cancel.cancel();
        for id in self.listeners.drain(..) {
            self.link.dispatcher().unsubscribe(id);
        }
    }
}

impl Drop for CalibrationController {
    fn drop(&mut self) {
        self.detach();
    }
}

struct Driver {
    machine: CalibrationMachine,
    commands: Arc<CommandClient>,
    imu: Arc<dyn ImuPlausibility>,
    inputs: InputSender,
    events: broadcast::Sender<CalibrationEvent>,
    state: watch::Sender<CalibrationState>,
}

impl Driver {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<CalibrationInput>,
        mut link_state: watch::Receiver<LinkState>,
        cancel: CancellationToken,
    ) {
        let mut link_down = *link_state.borrow() != LinkState::Open;

        loop {
            let input = tokio::select! {
                _ = cancel.cancelled() => break,
                changed = link_state.changed(), if !link_down => {
                    if changed.is_err() || *link_state.borrow() != LinkState::Open {
                        link_down = true;
                        CalibrationInput::Disconnected
                    } else {
                        continue;
                    }
                }
                input = rx.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };

            for action in self.machine.handle(input) {
                self.perform(action);
            }
            self.state.send_if_modified(|state| {
                if state != self.machine.state() {
                    *state = self.machine.state().clone();
                    true
                } else {
                    false
                }
            });
        }

        debug!("Calibration controller stopped");
    }

    fn perform(&self, action: CalibrationAction) {
        match action {
            CalibrationAction::SendCommand { command, params } => {
                let commands = Arc::clone(&self.commands);
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    // The ACK itself reaches the machine through the dispatcher
                    match commands.send(command, params).await {
                        Ok(_) => {}
                        Err(MavLinkError::Timeout { .. }) => {
                            warn!("No ACK for calibration command {}", command);
                            let _ = inputs.send(CalibrationInput::CommandTimedOut { command });
                        }
                        Err(MavLinkError::LinkClosed | MavLinkError::ConnectionLost) => {}
                        Err(e) => {
                            let _ = inputs.send(CalibrationInput::SendFailed {
                                command,
                                reason: e.to_string(),
                            });
                        }
                    }
                });
            }
            CalibrationAction::RunImuCheck { position } => {
                let imu = Arc::clone(&self.imu);
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    let verdict = imu.check(position).await;
                    let _ = inputs.send(CalibrationInput::ImuCheckResult {
                        position,
                        passed: verdict.passed,
                        detail: verdict.detail,
                    });
                });
            }
            CalibrationAction::ScheduleCompletion { generation, after } => {
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = inputs.send(CalibrationInput::CompletionTimerElapsed { generation });
                });
            }
            CalibrationAction::Emit(event) => {
                // No subscribers is fine
                let _ = self.events.send(event);
            }
        }
    }
}
