//! # Event Journal
//!
//! Appends received link messages to a JSON Lines file.
//!
//! One object per line:
//! `{"timestamp":"2026-01-01T00:00:00.000Z","system_id":1,"component_id":1,"message":"HEARTBEAT","fields":{..}}`

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{MavLinkError, Result};
use crate::link::{Dispatcher, ListenerId, Source};
use crate::mavlink::messages::MavMessage;

/// One journal line
#[derive(Debug, Serialize)]
pub struct JournalRecord {
    pub timestamp: String,
    pub system_id: u8,
    pub component_id: u8,
    pub message: &'static str,
    pub fields: Value,
}

impl JournalRecord {
    pub fn new(source: &Source, message: &MavMessage) -> Self {
        let (name, fields) = describe(message);
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            system_id: source.system_id,
            component_id: source.component_id,
            message: name,
            fields,
        }
    }
}

/// Message name and a JSON view of its fields
fn describe(message: &MavMessage) -> (&'static str, Value) {
    match message {
        MavMessage::Heartbeat(m) => (
            "HEARTBEAT",
            json!({
                "mav_type": m.mav_type,
                "autopilot": m.autopilot,
                "base_mode": m.base_mode,
                "custom_mode": m.custom_mode,
                "system_status": m.system_status,
                "armed": m.is_armed(),
            }),
        ),
        MavMessage::ParamValue(m) => (
            "PARAM_VALUE",
            json!({
                "param_id": m.param_id,
                "param_value": m.param_value,
                "param_type": m.param_type,
                "param_count": m.param_count,
                "param_index": m.param_index,
            }),
        ),
        MavMessage::CommandAck(m) => (
            "COMMAND_ACK",
            json!({
                "command": m.command,
                "result": m.result.as_u8(),
                "result_text": m.result.to_string(),
                "progress": m.progress,
            }),
        ),
        MavMessage::StatusText(m) => (
            "STATUSTEXT",
            json!({ "severity": m.severity.as_u8(), "text": m.text }),
        ),
        MavMessage::RcChannels(m) => (
            "RC_CHANNELS",
            json!({ "time_boot_ms": m.time_boot_ms, "channels": m.active(), "rssi": m.rssi }),
        ),
        MavMessage::RawImu(m) => (
            "RAW_IMU",
            json!({
                "time_usec": m.time_usec,
                "acc": [m.acc.x, m.acc.y, m.acc.z],
                "gyro": [m.gyro.x, m.gyro.y, m.gyro.z],
                "mag": [m.mag.x, m.mag.y, m.mag.z],
            }),
        ),
        MavMessage::ScaledImu(m) => (
            "SCALED_IMU",
            json!({
                "time_boot_ms": m.time_boot_ms,
                "acc": [m.acc.x, m.acc.y, m.acc.z],
                "gyro": [m.gyro.x, m.gyro.y, m.gyro.z],
                "mag": [m.mag.x, m.mag.y, m.mag.z],
            }),
        ),
        MavMessage::FileTransferProtocol(m) => (
            "FILE_TRANSFER_PROTOCOL",
            json!({ "target_system": m.target_system, "payload_len": m.payload.len() }),
        ),
    }
}

/// Append-only JSONL writer
#[derive(Debug, Clone)]
pub struct EventJournal {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl EventJournal {
    /// Open `path` for appending, creating it if needed
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn record(&self, source: &Source, message: &MavMessage) -> Result<()> {
        let line = serde_json::to_string(&JournalRecord::new(source, message))
            .map_err(|e| MavLinkError::Protocol(format!("Journal encoding failed: {}", e)))?;

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }

    /// Record every typed message the dispatcher sees
    ///
    /// Returns the listener ids so the caller can unsubscribe.
    pub fn attach(&self, dispatcher: &Dispatcher) -> Vec<ListenerId> {
        macro_rules! forward {
            ($method:ident, $variant:ident) => {{
                let journal = self.clone();
                dispatcher.$method(move |source, message| {
                    let message = MavMessage::$variant(message.clone());
                    if let Err(e) = journal.record(source, &message) {
                        warn!("Journal write failed: {}", e);
                    }
                })
            }};
        }

        vec![
            forward!(on_heartbeat, Heartbeat),
            forward!(on_param_value, ParamValue),
            forward!(on_command_ack, CommandAck),
            forward!(on_status_text, StatusText),
            forward!(on_rc_channels, RcChannels),
            forward!(on_raw_imu, RawImu),
            forward!(on_scaled_imu, ScaledImu),
            forward!(on_file_transfer, FileTransferProtocol),
        ]
    }
}
