//! # CRC-16/MCRF4XX Implementation
//!
//! X.25 checksum used by MAVLink, plus the per-message CRC-extra table.
//!
//! **Initial Value**: 0xFFFF
//! **Extra byte**: one per message id, folded in after the frame bytes

use super::protocol::*;

/// X.25 seed value
pub const X25_INIT_CRC: u16 = 0xFFFF;

/// Sentinel CRC-extra for message ids this crate does not know
pub const UNKNOWN_CRC_EXTRA: u8 = 0;

/// CRC-extra constants for the message ids this crate can validate
const KNOWN_CRC_EXTRAS: &[(u32, u8)] = &[
    (MSG_ID_HEARTBEAT, 50),
    (MSG_ID_SYS_STATUS, 124),
    (MSG_ID_SYSTEM_TIME, 137),
    (MSG_ID_PING, 237),
    (MSG_ID_PARAM_REQUEST_READ, 214),
    (MSG_ID_PARAM_REQUEST_LIST, 159),
    (MSG_ID_PARAM_VALUE, 220),
    (MSG_ID_PARAM_SET, 168),
    (MSG_ID_GPS_RAW_INT, 24),
    (MSG_ID_SCALED_IMU, 170),
    (MSG_ID_RAW_IMU, 144),
    (MSG_ID_SCALED_PRESSURE, 115),
    (MSG_ID_ATTITUDE, 39),
    (MSG_ID_GLOBAL_POSITION_INT, 104),
    (MSG_ID_RC_CHANNELS_RAW, 244),
    (MSG_ID_SERVO_OUTPUT_RAW, 222),
    (MSG_ID_MISSION_CURRENT, 28),
    (MSG_ID_NAV_CONTROLLER_OUTPUT, 183),
    (MSG_ID_RC_CHANNELS, 118),
    (MSG_ID_VFR_HUD, 20),
    (MSG_ID_COMMAND_LONG, 152),
    (MSG_ID_COMMAND_ACK, 143),
    (MSG_ID_FILE_TRANSFER_PROTOCOL, 84),
    (MSG_ID_TIMESYNC, 34),
    (MSG_ID_SCALED_IMU2, 76),
    (MSG_ID_POWER_STATUS, 203),
    (MSG_ID_BATTERY_STATUS, 154),
    (MSG_ID_MEMINFO, 208),
    (MSG_ID_AHRS, 127),
    (MSG_ID_AHRS2, 47),
    (MSG_ID_EKF_STATUS_REPORT, 71),
    (MSG_ID_VIBRATION, 90),
    (MSG_ID_HOME_POSITION, 104),
    (MSG_ID_EXTENDED_SYS_STATE, 130),
    (MSG_ID_STATUSTEXT, 83),
];

/// CRC-extra lookup table indexed by message id, built at compile time
const CRC_EXTRA_TABLE: [u8; 256] = generate_crc_extra_table();

/// Known-id bitmap so that a legitimate extra of 0 is never confused with the sentinel
const KNOWN_ID_TABLE: [bool; 256] = generate_known_id_table();

const fn generate_crc_extra_table() -> [u8; 256] {
    let mut table = [UNKNOWN_CRC_EXTRA; 256];
    let mut i = 0;

    while i < KNOWN_CRC_EXTRAS.len() {
        let (id, extra) = KNOWN_CRC_EXTRAS[i];
        table[id as usize] = extra;
        i += 1;
    }

    table
}

const fn generate_known_id_table() -> [bool; 256] {
    let mut table = [false; 256];
    let mut i = 0;

    while i < KNOWN_CRC_EXTRAS.len() {
        table[KNOWN_CRC_EXTRAS[i].0 as usize] = true;
        i += 1;
    }

    table
}

/// CRC-extra constant for a message id
///
/// Unknown ids return [`UNKNOWN_CRC_EXTRA`]; frames validated against it are
/// expected to fail and get dropped.
pub fn crc_extra(message_id: u32) -> u8 {
    if message_id < 256 {
        CRC_EXTRA_TABLE[message_id as usize]
    } else {
        UNKNOWN_CRC_EXTRA
    }
}

/// Whether the CRC-extra table has an entry for this message id
pub fn is_known_message(message_id: u32) -> bool {
    message_id < 256 && KNOWN_ID_TABLE[message_id as usize]
}

/// Incremental X.25 checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16(u16);

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    /// Start a new checksum at the X.25 seed
    pub const fn new() -> Self {
        Self(X25_INIT_CRC)
    }

    /// Fold one byte into the checksum
    #[inline]
    pub fn accumulate(&mut self, byte: u8) {
        let mut tmp = byte ^ (self.0 & 0xFF) as u8;
        tmp ^= tmp << 4;
        let tmp = tmp as u16;
        self.0 = (self.0 >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }

    /// Fold a byte range into the checksum
    pub fn accumulate_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.accumulate(byte);
        }
    }

    /// Current checksum value
    pub fn value(self) -> u16 {
        self.0
    }
}

/// Calculate the MAVLink checksum of a byte range plus its CRC-extra
///
/// # Arguments
///
/// * `data` - Frame bytes from the length field to the end of the payload
/// * `extra` - CRC-extra constant of the message
///
/// # Examples
///
/// ```
/// use mav_link_core::mavlink::crc::crc16;
///
/// let heartbeat = [0x09, 0xEF, 0x01, 0x01, 0x00, 0x05, 0x00, 0x00, 0x00, 0x02, 0x03, 0x59, 0x03, 0x03];
/// assert_eq!(crc16(&heartbeat, 50), 0xD7F1);
/// ```
pub fn crc16(data: &[u8], extra: u8) -> u16 {
    let mut crc = Crc16::new();
    crc.accumulate_bytes(data);
    crc.accumulate(extra);
    crc.value()
}
