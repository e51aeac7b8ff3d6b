//! # mav-link
//!
//! Command-line ground station built on `mav_link_core`.
//!
//! ```text
//! mav-link [--config FILE] monitor
//! mav-link [--config FILE] param list
//! mav-link [--config FILE] param get NAME
//! mav-link [--config FILE] param set NAME VALUE
//! mav-link [--config FILE] ls PATH
//! mav-link [--config FILE] get REMOTE LOCAL
//! mav-link [--config FILE] calibrate accel|gyro|baro|level [--reboot]
//! mav-link [--config FILE] reboot
//! ```
//!
//! Logging goes to stderr (filter with `RUST_LOG`) and, when `[log] dir` is
//! set, to a daily rolling file.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use mav_link_core::calibration::{
    CalibrationController, CalibrationEvent, CalibrationKind, CalibrationState, GravityAlignmentCheck,
};
use mav_link_core::config::Config;
use mav_link_core::correlator::{CommandClient, ParamClient};
use mav_link_core::ftp::FtpClient;
use mav_link_core::journal::EventJournal;
use mav_link_core::link::{LinkHandle, MavLink};
use mav_link_core::mavlink::messages::MavSeverity;
use mav_link_core::serial::AutopilotSerial;

/// How long to wait for the autopilot's first heartbeat
const TARGET_WAIT: Duration = Duration::from_secs(10);

/// A parameter stream that goes quiet this long is considered finished
const PARAM_LIST_IDLE: Duration = Duration::from_secs(3);

#[derive(Debug, PartialEq)]
enum Command {
    Monitor,
    ParamList,
    ParamGet(String),
    ParamSet(String, f32),
    List(String),
    Get { remote: String, local: String },
    Calibrate { kind: CalibrationKind, reboot: bool },
    Reboot,
}

fn parse_args(args: &[String]) -> Result<(Option<String>, Command)> {
    let mut config = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            config = Some(iter.next().context("--config needs a path")?.clone());
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        [] | ["monitor"] => Command::Monitor,
        ["param", "list"] => Command::ParamList,
        ["param", "get", name] => Command::ParamGet(name.to_string()),
        ["param", "set", name, value] => Command::ParamSet(
            name.to_string(),
            value.parse().with_context(|| format!("invalid value '{}'", value))?,
        ),
        ["ls", path] => Command::List(path.to_string()),
        ["get", remote, local] => Command::Get {
            remote: remote.to_string(),
            local: local.to_string(),
        },
        ["calibrate", kind, flags @ ..] => Command::Calibrate {
            kind: match *kind {
                "accel" => CalibrationKind::Accelerometer,
                "gyro" => CalibrationKind::Gyroscope,
                "baro" => CalibrationKind::Barometer,
                "level" => CalibrationKind::LevelHorizon,
                other => bail!("unknown calibration '{}'", other),
            },
            reboot: flags.contains(&"--reboot"),
        },
        ["reboot"] => Command::Reboot,
        other => bail!("unrecognized arguments: {}", other.join(" ")),
    };

    Ok((config, command))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, command) = parse_args(&args)?;

    let config = match &config_path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };

    // Initialize logging; the guard flushes the file writer on exit
    let (file_layer, _log_guard) = match &config.log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mav-link.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    info!("mav-link v{} starting...", env!("CARGO_PKG_VERSION"));

    let serial = AutopilotSerial::open(&config.serial.port, config.serial.baud_rate)?;
    info!("Autopilot serial port opened at: {}", serial.device_path());

    let mut link = MavLink::open(serial.into_stream(), config.link_config());
    let handle = link.handle();

    let result = tokio::select! {
        result = run(command, &config, handle.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    };

    let report = link.close().await;
    if !report.is_clean() {
        warn!("Shutdown issues: {:?}", report.issues);
    }

    result
}

async fn run(command: Command, config: &Config, link: LinkHandle) -> Result<()> {
    // Monitor mode also runs before the autopilot shows up
    if command != Command::Monitor {
        let target = tokio::time::timeout(TARGET_WAIT, link.wait_for_target())
            .await
            .context("no heartbeat from the autopilot")??;
        info!("Autopilot is system {} component {}", target.system_id, target.component_id);
    }

    match command {
        Command::Monitor => monitor(config, link).await?,
        Command::ParamList => param_list(config, link).await?,
        Command::ParamGet(name) => {
            let params = ParamClient::new(link, config.param_client_config());
            let value = params.read_by_name(&name).await?;
            println!("{} = {}", value.param_id, value.param_value);
        }
        Command::ParamSet(name, value) => {
            let params = ParamClient::new(link, config.param_client_config());
            let echoed = params.set(&name, value).await?;
            println!("{} = {}", echoed.param_id, echoed.param_value);
        }
        Command::List(path) => {
            let ftp = FtpClient::new(link, config.ftp_timeout());
            for entry in ftp.list_directory(&path).await? {
                match entry.size() {
                    Some(size) => println!("{:>10}  {}", size, entry.path),
                    None => println!("{:>10}  {}/", "<dir>", entry.path),
                }
            }
        }
        Command::Get { remote, local } => {
            let ftp = FtpClient::new(link, config.ftp_timeout());
            let mut contents = Vec::new();
            let bytes = ftp
                .download(
                    &remote,
                    &mut contents,
                    |progress| {
                        if let Some(fraction) = progress.fraction() {
                            info!("{}: {:.0}%", remote, fraction * 100.0);
                        }
                    },
                    &CancellationToken::new(),
                )
                .await?;
            std::fs::write(&local, &contents).with_context(|| format!("writing {}", local))?;
            println!("{} bytes written to {}", bytes, local);
        }
        Command::Calibrate { kind, reboot } => calibrate(config, link, kind, reboot).await?,
        Command::Reboot => {
            let commands = CommandClient::new(link, config.ack_timeout());
            let ack = commands.reboot().await?;
            println!("Reboot: {}", ack.result);
        }
    }

    Ok(())
}

/// Print every parameter the autopilot streams back
async fn param_list(config: &Config, link: LinkHandle) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let listener = link.dispatcher().on_param_value(move |_, value| {
        let _ = tx.send(value.clone());
    });

    let params = ParamClient::new(link.clone(), config.param_client_config());
    params.request_list().await?;

    let mut values = BTreeMap::new();
    while let Ok(Some(value)) = tokio::time::timeout(PARAM_LIST_IDLE, rx.recv()).await {
        let expected = value.param_count as usize;
        values.insert(value.param_index, value);
        if values.len() >= expected {
            break;
        }
    }
    link.dispatcher().unsubscribe(listener);

    for value in values.values() {
        println!("{:<16} {}", value.param_id, value.param_value);
    }
    match values.values().next().map(|v| v.param_count as usize) {
        Some(expected) if expected > values.len() => {
            warn!("Received {} of {} parameters", values.len(), expected)
        }
        _ => info!("Received {} parameters", values.len()),
    }
    Ok(())
}

/// Log heartbeats and status text until interrupted
async fn monitor(config: &Config, link: LinkHandle) -> Result<()> {
    let journal = match &config.log.journal {
        Some(path) => {
            let journal = EventJournal::create(path)
                .with_context(|| format!("opening journal {}", path.display()))?;
            journal.attach(link.dispatcher());
            info!("Journaling messages to {}", path.display());
            Some(journal)
        }
        None => None,
    };

    link.dispatcher().on_status_text(|source, text| {
        if text.severity <= MavSeverity::Warning {
            warn!("[{}] {}", source.system_id, text.text);
        } else {
            info!("[{}] {}", source.system_id, text.text);
        }
    });

    let target = link.wait_for_target().await?;
    info!("Autopilot is system {} component {}", target.system_id, target.component_id);

    let mut state = link.watch_state();
    let mut flush = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = flush.tick() => {
                if let Some(journal) = &journal {
                    journal.flush()?;
                }
            }
            changed = state.changed() => {
                if changed.is_err() || link.state() != mav_link_core::link::LinkState::Open {
                    break;
                }
            }
        }
    }

    if let Some(journal) = &journal {
        journal.flush()?;
    }
    Err(link.closed_error().into())
}

/// Guided calibration driven from stdin
async fn calibrate(config: &Config, link: LinkHandle, kind: CalibrationKind, reboot: bool) -> Result<()> {
    let commands = Arc::new(CommandClient::new(link.clone(), config.ack_timeout()));
    let imu = Arc::new(GravityAlignmentCheck::new(
        link.clone(),
        config.calibration.imu_min_gravity_fraction,
    ));
    let controller = CalibrationController::spawn(
        link,
        commands,
        imu,
        config.simple_completion_delay(),
    );
    let mut events = controller.subscribe();
    let mut state = controller.watch_state();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    controller.start(kind)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CalibrationEvent::StepRequired { position, instruction }) => {
                    println!("[{}/6] {}", position.number(), instruction);
                    println!("Press Enter when the vehicle is in position.");
                }
                Ok(CalibrationEvent::PositionRejected { position, reason }) => {
                    println!("{} was rejected ({}). Hold the position and press Enter again.", position, reason);
                }
                Ok(CalibrationEvent::ImuCheckFailed { detail, .. }) => {
                    println!("Vehicle does not look right: {}", detail);
                }
                Ok(CalibrationEvent::ProgressChanged(progress)) => {
                    println!("Progress: {}%", progress.percent());
                }
                Ok(CalibrationEvent::StatusText(text)) => info!("{}", text),
                Ok(CalibrationEvent::StateChanged(_)) => {}
                Err(e) => warn!("Missed calibration events: {}", e),
            },
            line = stdin.next_line(), if stdin_open => {
                if line?.is_none() {
                    stdin_open = false;
                    controller.cancel()?;
                } else if let Err(e) = controller.accept_step() {
                    warn!("{}", e);
                }
            }
            changed = state.changed() => {
                changed?;
                let current = state.borrow().clone();
                if current.is_terminal() {
                    break;
                }
            }
        }
    }

    match controller.state() {
        CalibrationState::Completed => {
            println!("Calibration complete.");
            if reboot {
                let ack = controller.reboot().await?;
                println!("Reboot: {}", ack.result);
            }
            controller.shutdown().await;
            Ok(())
        }
        CalibrationState::Failed(reason) => {
            controller.shutdown().await;
            bail!("calibration failed: {}", reason)
        }
        other => {
            controller.shutdown().await;
            bail!("calibration ended in {:?}", other)
        }
    }
}
