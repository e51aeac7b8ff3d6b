//! # MAVLink Message Table
//!
//! Fixed binary layouts for the messages the link engine understands.
//!
//! Fields are little-endian and ordered by MAVLink wire order (largest type
//! first). MAVLink 2 senders may truncate trailing zero bytes, so V2 payloads
//! shorter than the full layout are zero-extended. A V1 payload shorter than
//! the base layout is malformed.

use std::fmt;

use bytes::{Buf, BufMut};

use super::protocol::*;
use crate::error::{MavLinkError, Result};

/// Length of `param_id` fields
pub const PARAM_ID_LEN: usize = 16;

/// Length of the STATUSTEXT text field
pub const STATUS_TEXT_LEN: usize = 50;

/// Length of the FILE_TRANSFER_PROTOCOL inner payload
pub const FTP_PAYLOAD_LEN: usize = 251;

/// Number of raw channels in RC_CHANNELS
pub const RC_CHANNEL_COUNT: usize = 18;

/// MAV_PARAM_TYPE_REAL32
pub const MAV_PARAM_TYPE_REAL32: u8 = 9;

/// MAV_MODE_FLAG_SAFETY_ARMED
pub const MAV_MODE_FLAG_SAFETY_ARMED: u8 = 0x80;

/// A message with a fixed wire layout
pub trait MavPayload: Sized {
    /// Message id on the wire
    const MESSAGE_ID: u32;

    /// Message name for logs
    const NAME: &'static str;

    /// Length of the MAVLink 1 fields
    const BASE_LEN: usize;

    /// Length including MAVLink 2 extension fields
    const FULL_LEN: usize = Self::BASE_LEN;

    /// Read every field from a buffer holding at least `FULL_LEN` bytes
    fn read_fields(buf: &mut &[u8]) -> Self;

    /// Append every field (base and extensions) to a buffer
    fn write_fields(&self, buf: &mut Vec<u8>);

    /// Decode a received payload
    ///
    /// # Errors
    ///
    /// Returns error if a V1 payload is shorter than the base layout
    fn decode(payload: &[u8], version: MavlinkVersion) -> Result<Self> {
        if version == MavlinkVersion::V1 && payload.len() < Self::BASE_LEN {
            return Err(MavLinkError::Protocol(format!(
                "{} payload too short: {} bytes (expected {})",
                Self::NAME,
                payload.len(),
                Self::BASE_LEN
            )));
        }

        let mut padded = payload.to_vec();
        if padded.len() < Self::FULL_LEN {
            padded.resize(Self::FULL_LEN, 0);
        }

        let mut cursor = padded.as_slice();
        Ok(Self::read_fields(&mut cursor))
    }

    /// Encode the full layout (base and extensions)
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::FULL_LEN);
        self.write_fields(&mut buf);
        buf
    }

    /// Encode for a framing version: V1 frames carry only the base fields
    fn encode_for(&self, version: MavlinkVersion) -> Vec<u8> {
        let mut buf = self.encode();
        if version == MavlinkVersion::V1 {
            buf.truncate(Self::BASE_LEN);
        }
        buf
    }
}

fn read_chars(buf: &mut &[u8], len: usize) -> String {
    let raw = &buf[..len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    let text = String::from_utf8_lossy(&raw[..end]).into_owned();
    buf.advance(len);
    text
}

fn write_chars(buf: &mut Vec<u8>, text: &str, len: usize) {
    let bytes = text.as_bytes();
    let used = bytes.len().min(len);
    buf.put_slice(&bytes[..used]);
    buf.put_bytes(0, len - used);
}

/// MAV_RESULT carried by COMMAND_ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MavResult {
    Accepted,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
    InProgress,
    Cancelled,
    Unknown(u8),
}

impl MavResult {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MavResult::Accepted,
            1 => MavResult::TemporarilyRejected,
            2 => MavResult::Denied,
            3 => MavResult::Unsupported,
            4 => MavResult::Failed,
            5 => MavResult::InProgress,
            6 => MavResult::Cancelled,
            other => MavResult::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MavResult::Accepted => 0,
            MavResult::TemporarilyRejected => 1,
            MavResult::Denied => 2,
            MavResult::Unsupported => 3,
            MavResult::Failed => 4,
            MavResult::InProgress => 5,
            MavResult::Cancelled => 6,
            MavResult::Unknown(other) => other,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == MavResult::Accepted
    }

    /// `InProgress` means another ACK for the same command may follow
    pub fn is_final(self) -> bool {
        self != MavResult::InProgress
    }
}

impl fmt::Display for MavResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MavResult::Accepted => write!(f, "accepted"),
            MavResult::TemporarilyRejected => {
                write!(f, "temporarily rejected (vehicle may be armed or busy)")
            }
            MavResult::Denied => write!(f, "denied"),
            MavResult::Unsupported => write!(f, "unsupported"),
            MavResult::Failed => write!(f, "failed"),
            MavResult::InProgress => write!(f, "in progress"),
            MavResult::Cancelled => write!(f, "cancelled"),
            MavResult::Unknown(code) => write!(f, "unknown result {}", code),
        }
    }
}

/// MAV_SEVERITY carried by STATUSTEXT
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MavSeverity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl MavSeverity {
    /// Out-of-range values are treated as debug
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MavSeverity::Emergency,
            1 => MavSeverity::Alert,
            2 => MavSeverity::Critical,
            3 => MavSeverity::Error,
            4 => MavSeverity::Warning,
            5 => MavSeverity::Notice,
            6 => MavSeverity::Info,
            _ => MavSeverity::Debug,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// HEARTBEAT (0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    /// The heartbeat a ground station emits once per second
    pub fn ground_station() -> Self {
        Self {
            custom_mode: 0,
            mav_type: MAV_TYPE_GCS,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: 0,
            mavlink_version: MAVLINK_PROTOCOL_VERSION,
        }
    }

    pub fn is_ground_station(&self) -> bool {
        self.mav_type == MAV_TYPE_GCS
    }

    pub fn is_armed(&self) -> bool {
        self.base_mode & MAV_MODE_FLAG_SAFETY_ARMED != 0
    }
}

impl MavPayload for Heartbeat {
    const MESSAGE_ID: u32 = MSG_ID_HEARTBEAT;
    const NAME: &'static str = "HEARTBEAT";
    const BASE_LEN: usize = 9;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            custom_mode: buf.get_u32_le(),
            mav_type: buf.get_u8(),
            autopilot: buf.get_u8(),
            base_mode: buf.get_u8(),
            system_status: buf.get_u8(),
            mavlink_version: buf.get_u8(),
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.custom_mode);
        buf.put_u8(self.mav_type);
        buf.put_u8(self.autopilot);
        buf.put_u8(self.base_mode);
        buf.put_u8(self.system_status);
        buf.put_u8(self.mavlink_version);
    }
}

/// PARAM_REQUEST_READ (20)
///
/// `param_index` of -1 selects the parameter by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRequestRead {
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: String,
    pub param_index: i16,
}

impl MavPayload for ParamRequestRead {
    const MESSAGE_ID: u32 = MSG_ID_PARAM_REQUEST_READ;
    const NAME: &'static str = "PARAM_REQUEST_READ";
    const BASE_LEN: usize = 20;

    fn read_fields(buf: &mut &[u8]) -> Self {
        let param_index = buf.get_i16_le();
        let target_system = buf.get_u8();
        let target_component = buf.get_u8();
        let param_id = read_chars(buf, PARAM_ID_LEN);
        Self {
            target_system,
            target_component,
            param_id,
            param_index,
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_i16_le(self.param_index);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        write_chars(buf, &self.param_id, PARAM_ID_LEN);
    }
}

/// PARAM_REQUEST_LIST (21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRequestList {
    pub target_system: u8,
    pub target_component: u8,
}

impl MavPayload for ParamRequestList {
    const MESSAGE_ID: u32 = MSG_ID_PARAM_REQUEST_LIST;
    const NAME: &'static str = "PARAM_REQUEST_LIST";
    const BASE_LEN: usize = 2;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
    }
}

/// PARAM_VALUE (22)
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    pub param_id: String,
    pub param_value: f32,
    pub param_type: u8,
    pub param_count: u16,
    pub param_index: u16,
}

impl MavPayload for ParamValue {
    const MESSAGE_ID: u32 = MSG_ID_PARAM_VALUE;
    const NAME: &'static str = "PARAM_VALUE";
    const BASE_LEN: usize = 25;

    fn read_fields(buf: &mut &[u8]) -> Self {
        let param_value = buf.get_f32_le();
        let param_count = buf.get_u16_le();
        let param_index = buf.get_u16_le();
        let param_id = read_chars(buf, PARAM_ID_LEN);
        let param_type = buf.get_u8();
        Self {
            param_id,
            param_value,
            param_type,
            param_count,
            param_index,
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_f32_le(self.param_value);
        buf.put_u16_le(self.param_count);
        buf.put_u16_le(self.param_index);
        write_chars(buf, &self.param_id, PARAM_ID_LEN);
        buf.put_u8(self.param_type);
    }
}

/// PARAM_SET (23)
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: String,
    pub param_value: f32,
    pub param_type: u8,
}

impl MavPayload for ParamSet {
    const MESSAGE_ID: u32 = MSG_ID_PARAM_SET;
    const NAME: &'static str = "PARAM_SET";
    const BASE_LEN: usize = 23;

    fn read_fields(buf: &mut &[u8]) -> Self {
        let param_value = buf.get_f32_le();
        let target_system = buf.get_u8();
        let target_component = buf.get_u8();
        let param_id = read_chars(buf, PARAM_ID_LEN);
        let param_type = buf.get_u8();
        Self {
            target_system,
            target_component,
            param_id,
            param_value,
            param_type,
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_f32_le(self.param_value);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        write_chars(buf, &self.param_id, PARAM_ID_LEN);
        buf.put_u8(self.param_type);
    }
}

/// COMMAND_LONG (76)
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLong {
    pub target_system: u8,
    pub target_component: u8,
    pub command: u16,
    pub confirmation: u8,
    pub params: [f32; 7],
}

impl MavPayload for CommandLong {
    const MESSAGE_ID: u32 = MSG_ID_COMMAND_LONG;
    const NAME: &'static str = "COMMAND_LONG";
    const BASE_LEN: usize = 33;

    fn read_fields(buf: &mut &[u8]) -> Self {
        let mut params = [0f32; 7];
        for param in params.iter_mut() {
            *param = buf.get_f32_le();
        }
        Self {
            command: buf.get_u16_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
            confirmation: buf.get_u8(),
            params,
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        for param in &self.params {
            buf.put_f32_le(*param);
        }
        buf.put_u16_le(self.command);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        buf.put_u8(self.confirmation);
    }
}

/// COMMAND_ACK (77)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    pub command: u16,
    pub result: MavResult,
    pub progress: u8,
    pub result_param2: i32,
    pub target_system: u8,
    pub target_component: u8,
}

impl CommandAck {
    /// Plain acknowledgement without extension fields
    pub fn new(command: u16, result: MavResult) -> Self {
        Self {
            command,
            result,
            progress: 0,
            result_param2: 0,
            target_system: 0,
            target_component: 0,
        }
    }
}

impl MavPayload for CommandAck {
    const MESSAGE_ID: u32 = MSG_ID_COMMAND_ACK;
    const NAME: &'static str = "COMMAND_ACK";
    const BASE_LEN: usize = 3;
    const FULL_LEN: usize = 10;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            command: buf.get_u16_le(),
            result: MavResult::from_u8(buf.get_u8()),
            progress: buf.get_u8(),
            result_param2: buf.get_i32_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.command);
        buf.put_u8(self.result.as_u8());
        buf.put_u8(self.progress);
        buf.put_i32_le(self.result_param2);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
    }
}

/// STATUSTEXT (253)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub severity: MavSeverity,
    pub text: String,
    pub id: u16,
    pub chunk_seq: u8,
}

impl StatusText {
    pub fn new(severity: MavSeverity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            id: 0,
            chunk_seq: 0,
        }
    }
}

impl MavPayload for StatusText {
    const MESSAGE_ID: u32 = MSG_ID_STATUSTEXT;
    const NAME: &'static str = "STATUSTEXT";
    const BASE_LEN: usize = 51;
    const FULL_LEN: usize = 54;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            severity: MavSeverity::from_u8(buf.get_u8()),
            text: read_chars(buf, STATUS_TEXT_LEN),
            id: buf.get_u16_le(),
            chunk_seq: buf.get_u8(),
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.severity.as_u8());
        write_chars(buf, &self.text, STATUS_TEXT_LEN);
        buf.put_u16_le(self.id);
        buf.put_u8(self.chunk_seq);
    }
}

/// RC_CHANNELS (65)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcChannels {
    pub time_boot_ms: u32,
    pub channels: [u16; RC_CHANNEL_COUNT],
    pub chancount: u8,
    pub rssi: u8,
}

impl RcChannels {
    /// Channels the receiver actually reports
    pub fn active(&self) -> &[u16] {
        let count = (self.chancount as usize).min(RC_CHANNEL_COUNT);
        &self.channels[..count]
    }
}

impl MavPayload for RcChannels {
    const MESSAGE_ID: u32 = MSG_ID_RC_CHANNELS;
    const NAME: &'static str = "RC_CHANNELS";
    const BASE_LEN: usize = 42;

    fn read_fields(buf: &mut &[u8]) -> Self {
        let time_boot_ms = buf.get_u32_le();
        let mut channels = [0u16; RC_CHANNEL_COUNT];
        for channel in channels.iter_mut() {
            *channel = buf.get_u16_le();
        }
        Self {
            time_boot_ms,
            channels,
            chancount: buf.get_u8(),
            rssi: buf.get_u8(),
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.time_boot_ms);
        for channel in &self.channels {
            buf.put_u16_le(*channel);
        }
        buf.put_u8(self.chancount);
        buf.put_u8(self.rssi);
    }
}

/// Three-axis sensor reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Axes {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Axes {
    fn read(buf: &mut &[u8]) -> Self {
        Self {
            x: buf.get_i16_le(),
            y: buf.get_i16_le(),
            z: buf.get_i16_le(),
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_i16_le(self.x);
        buf.put_i16_le(self.y);
        buf.put_i16_le(self.z);
    }
}

/// RAW_IMU (27), sensor units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawImu {
    pub time_usec: u64,
    pub acc: Axes,
    pub gyro: Axes,
    pub mag: Axes,
    pub id: u8,
    pub temperature: i16,
}

impl MavPayload for RawImu {
    const MESSAGE_ID: u32 = MSG_ID_RAW_IMU;
    const NAME: &'static str = "RAW_IMU";
    const BASE_LEN: usize = 26;
    const FULL_LEN: usize = 29;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            time_usec: buf.get_u64_le(),
            acc: Axes::read(buf),
            gyro: Axes::read(buf),
            mag: Axes::read(buf),
            id: buf.get_u8(),
            temperature: buf.get_i16_le(),
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.time_usec);
        self.acc.write(buf);
        self.gyro.write(buf);
        self.mag.write(buf);
        buf.put_u8(self.id);
        buf.put_i16_le(self.temperature);
    }
}

/// SCALED_IMU (26): acceleration in mG, rates in mrad/s, field in mgauss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledImu {
    pub time_boot_ms: u32,
    pub acc: Axes,
    pub gyro: Axes,
    pub mag: Axes,
    pub temperature: i16,
}

impl MavPayload for ScaledImu {
    const MESSAGE_ID: u32 = MSG_ID_SCALED_IMU;
    const NAME: &'static str = "SCALED_IMU";
    const BASE_LEN: usize = 22;
    const FULL_LEN: usize = 24;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            time_boot_ms: buf.get_u32_le(),
            acc: Axes::read(buf),
            gyro: Axes::read(buf),
            mag: Axes::read(buf),
            temperature: buf.get_i16_le(),
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.time_boot_ms);
        self.acc.write(buf);
        self.gyro.write(buf);
        self.mag.write(buf);
        buf.put_i16_le(self.temperature);
    }
}

/// FILE_TRANSFER_PROTOCOL (110)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferProtocol {
    pub target_network: u8,
    pub target_system: u8,
    pub target_component: u8,
    /// Inner FTP packet, always `FTP_PAYLOAD_LEN` bytes once decoded
    pub payload: Vec<u8>,
}

impl MavPayload for FileTransferProtocol {
    const MESSAGE_ID: u32 = MSG_ID_FILE_TRANSFER_PROTOCOL;
    const NAME: &'static str = "FILE_TRANSFER_PROTOCOL";
    const BASE_LEN: usize = 3 + FTP_PAYLOAD_LEN;

    fn read_fields(buf: &mut &[u8]) -> Self {
        let target_network = buf.get_u8();
        let target_system = buf.get_u8();
        let target_component = buf.get_u8();
        let payload = buf[..FTP_PAYLOAD_LEN].to_vec();
        buf.advance(FTP_PAYLOAD_LEN);
        Self {
            target_network,
            target_system,
            target_component,
            payload,
        }
    }

    fn write_fields(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.target_network);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        let used = self.payload.len().min(FTP_PAYLOAD_LEN);
        buf.put_slice(&self.payload[..used]);
        buf.put_bytes(0, FTP_PAYLOAD_LEN - used);
    }
}

/// Every inbound message the link engine dispatches
#[derive(Debug, Clone, PartialEq)]
pub enum MavMessage {
    Heartbeat(Heartbeat),
    ParamValue(ParamValue),
    CommandAck(CommandAck),
    StatusText(StatusText),
    RcChannels(RcChannels),
    RawImu(RawImu),
    ScaledImu(ScaledImu),
    FileTransferProtocol(FileTransferProtocol),
}

impl MavMessage {
    /// Decode a validated frame into a typed message
    ///
    /// # Returns
    ///
    /// * `Ok(None)` for message ids without a typed record
    ///
    /// # Errors
    ///
    /// Returns error if the payload is malformed for its message id
    pub fn decode(frame: &Frame) -> Result<Option<Self>> {
        let payload = frame.payload.as_slice();
        let version = frame.version;

        let message = match frame.message_id {
            MSG_ID_HEARTBEAT => MavMessage::Heartbeat(Heartbeat::decode(payload, version)?),
            MSG_ID_PARAM_VALUE => MavMessage::ParamValue(ParamValue::decode(payload, version)?),
            MSG_ID_COMMAND_ACK => MavMessage::CommandAck(CommandAck::decode(payload, version)?),
            MSG_ID_STATUSTEXT => MavMessage::StatusText(StatusText::decode(payload, version)?),
            MSG_ID_RC_CHANNELS => MavMessage::RcChannels(RcChannels::decode(payload, version)?),
            MSG_ID_RAW_IMU => MavMessage::RawImu(RawImu::decode(payload, version)?),
            MSG_ID_SCALED_IMU => MavMessage::ScaledImu(ScaledImu::decode(payload, version)?),
            MSG_ID_FILE_TRANSFER_PROTOCOL => {
                MavMessage::FileTransferProtocol(FileTransferProtocol::decode(payload, version)?)
            }
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    pub fn message_id(&self) -> u32 {
        match self {
            MavMessage::Heartbeat(_) => MSG_ID_HEARTBEAT,
            MavMessage::ParamValue(_) => MSG_ID_PARAM_VALUE,
            MavMessage::CommandAck(_) => MSG_ID_COMMAND_ACK,
            MavMessage::StatusText(_) => MSG_ID_STATUSTEXT,
            MavMessage::RcChannels(_) => MSG_ID_RC_CHANNELS,
            MavMessage::RawImu(_) => MSG_ID_RAW_IMU,
            MavMessage::ScaledImu(_) => MSG_ID_SCALED_IMU,
            MavMessage::FileTransferProtocol(_) => MSG_ID_FILE_TRANSFER_PROTOCOL,
        }
    }
}
