//! # MAVLink Protocol Constants and Types
//!
//! Core wire-level definitions for MAVLink v1/v2 framing.

/// MAVLink v1 start-of-frame marker
pub const MAVLINK_STX_V1: u8 = 0xFE;

/// MAVLink v2 start-of-frame marker
pub const MAVLINK_STX_V2: u8 = 0xFD;

/// V1 header: stx, len, seq, sysid, compid, msgid
pub const MAVLINK_V1_HEADER_LEN: usize = 6;

/// V2 header: stx, len, incompat, compat, seq, sysid, compid, msgid(3)
pub const MAVLINK_V2_HEADER_LEN: usize = 10;

/// Trailing checksum size (both versions)
pub const MAVLINK_CHECKSUM_LEN: usize = 2;

/// Signature block appended to signed V2 frames
pub const MAVLINK_SIGNATURE_LEN: usize = 13;

/// V2 incompat flag: frame carries a signature
pub const MAVLINK_IFLAG_SIGNED: u8 = 0x01;

/// Largest payload either version can carry
pub const MAVLINK_MAX_PAYLOAD_LEN: usize = 255;

/// Largest possible frame (signed V2 with full payload)
pub const MAVLINK_MAX_FRAME_LEN: usize =
    MAVLINK_V2_HEADER_LEN + MAVLINK_MAX_PAYLOAD_LEN + MAVLINK_CHECKSUM_LEN + MAVLINK_SIGNATURE_LEN;

// Message ids
pub const MSG_ID_HEARTBEAT: u32 = 0;
pub const MSG_ID_SYS_STATUS: u32 = 1;
pub const MSG_ID_SYSTEM_TIME: u32 = 2;
pub const MSG_ID_PING: u32 = 4;
pub const MSG_ID_PARAM_REQUEST_READ: u32 = 20;
pub const MSG_ID_PARAM_REQUEST_LIST: u32 = 21;
pub const MSG_ID_PARAM_VALUE: u32 = 22;
pub const MSG_ID_PARAM_SET: u32 = 23;
pub const MSG_ID_GPS_RAW_INT: u32 = 24;
pub const MSG_ID_SCALED_IMU: u32 = 26;
pub const MSG_ID_RAW_IMU: u32 = 27;
pub const MSG_ID_SCALED_PRESSURE: u32 = 29;
pub const MSG_ID_ATTITUDE: u32 = 30;
pub const MSG_ID_GLOBAL_POSITION_INT: u32 = 33;
pub const MSG_ID_RC_CHANNELS_RAW: u32 = 35;
pub const MSG_ID_SERVO_OUTPUT_RAW: u32 = 36;
pub const MSG_ID_MISSION_CURRENT: u32 = 42;
pub const MSG_ID_NAV_CONTROLLER_OUTPUT: u32 = 62;
pub const MSG_ID_RC_CHANNELS: u32 = 65;
pub const MSG_ID_VFR_HUD: u32 = 74;
pub const MSG_ID_COMMAND_LONG: u32 = 76;
pub const MSG_ID_COMMAND_ACK: u32 = 77;
pub const MSG_ID_FILE_TRANSFER_PROTOCOL: u32 = 110;
pub const MSG_ID_TIMESYNC: u32 = 111;
pub const MSG_ID_SCALED_IMU2: u32 = 116;
pub const MSG_ID_POWER_STATUS: u32 = 125;
pub const MSG_ID_BATTERY_STATUS: u32 = 147;
pub const MSG_ID_MEMINFO: u32 = 152;
pub const MSG_ID_AHRS: u32 = 163;
pub const MSG_ID_AHRS2: u32 = 178;
pub const MSG_ID_EKF_STATUS_REPORT: u32 = 193;
pub const MSG_ID_VIBRATION: u32 = 241;
pub const MSG_ID_HOME_POSITION: u32 = 242;
pub const MSG_ID_EXTENDED_SYS_STATE: u32 = 245;
pub const MSG_ID_STATUSTEXT: u32 = 253;

// MAV_CMD ids used by the command builders
pub const MAV_CMD_DO_MOTOR_TEST: u16 = 209;
pub const MAV_CMD_PREFLIGHT_CALIBRATION: u16 = 241;
pub const MAV_CMD_PREFLIGHT_STORAGE: u16 = 245;
pub const MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN: u16 = 246;
pub const MAV_CMD_COMPONENT_ARM_DISARM: u16 = 400;
pub const MAV_CMD_ACCELCAL_VEHICLE_POS: u16 = 42429;

/// `param2` of COMPONENT_ARM_DISARM that bypasses pre-arm checks
pub const ARM_DISARM_FORCE_MAGIC: f32 = 21196.0;

/// ACCELCAL_VEHICLE_POS value reporting success
pub const ACCELCAL_VEHICLE_POS_SUCCESS: f32 = 16_777_215.0;

/// ACCELCAL_VEHICLE_POS value aborting the calibration
pub const ACCELCAL_VEHICLE_POS_FAILED: f32 = 16_777_216.0;

/// MAV_TYPE_GCS
pub const MAV_TYPE_GCS: u8 = 6;

/// MAV_AUTOPILOT_INVALID
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// Protocol version advertised in heartbeats
pub const MAVLINK_PROTOCOL_VERSION: u8 = 3;

/// Framing version of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MavlinkVersion {
    V1,
    V2,
}

impl MavlinkVersion {
    /// Start-of-frame marker for this version
    pub fn start_marker(self) -> u8 {
        match self {
            MavlinkVersion::V1 => MAVLINK_STX_V1,
            MavlinkVersion::V2 => MAVLINK_STX_V2,
        }
    }

    /// Header length for this version
    pub fn header_len(self) -> usize {
        match self {
            MavlinkVersion::V1 => MAVLINK_V1_HEADER_LEN,
            MavlinkVersion::V2 => MAVLINK_V2_HEADER_LEN,
        }
    }

    /// Version announced by a start-of-frame marker, if any
    pub fn from_start_marker(byte: u8) -> Option<Self> {
        match byte {
            MAVLINK_STX_V1 => Some(MavlinkVersion::V1),
            MAVLINK_STX_V2 => Some(MavlinkVersion::V2),
            _ => None,
        }
    }
}

/// Check whether a byte starts a MAVLink frame
#[inline]
pub fn is_start_marker(byte: u8) -> bool {
    byte == MAVLINK_STX_V1 || byte == MAVLINK_STX_V2
}

/// One validated MAVLink frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Framing version
    pub version: MavlinkVersion,

    /// Free-running sequence number of the sender
    pub sequence: u8,

    /// Sender system id
    pub system_id: u8,

    /// Sender component id
    pub component_id: u8,

    /// Message id (8-bit on V1, 24-bit on V2)
    pub message_id: u32,

    /// V2 incompatibility flags (zero on V1)
    pub incompat_flags: u8,

    /// V2 compatibility flags (zero on V1)
    pub compat_flags: u8,

    /// Raw payload bytes as received
    pub payload: Vec<u8>,

    /// Checksum carried by the frame
    pub checksum: u16,

    /// Signature block of signed V2 frames
    pub signature: Option<[u8; MAVLINK_SIGNATURE_LEN]>,
}

impl Frame {
    /// Payload length as carried in the length field
    pub fn payload_len(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Whether the frame carried a signature
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Total size of this frame on the wire
    pub fn wire_len(&self) -> usize {
        let signature = if self.is_signed() { MAVLINK_SIGNATURE_LEN } else { 0 };
        self.version.header_len() + self.payload.len() + MAVLINK_CHECKSUM_LEN + signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(MAVLINK_STX_V1, 0xFE);
        assert_eq!(MAVLINK_STX_V2, 0xFD);
        assert_eq!(MAVLINK_MAX_FRAME_LEN, 280);
    }

    #[test]
    fn test_start_markers() {
        assert!(is_start_marker(0xFE));
        assert!(is_start_marker(0xFD));
        assert!(!is_start_marker(0x55));
        assert_eq!(MavlinkVersion::from_start_marker(0xFD), Some(MavlinkVersion::V2));
        assert_eq!(MavlinkVersion::from_start_marker(0x00), None);
        assert_eq!(MavlinkVersion::V1.start_marker(), 0xFE);
    }

    #[test]
    fn test_wire_len() {
        let frame = Frame {
            version: MavlinkVersion::V2,
            sequence: 0,
            system_id: 1,
            component_id: 1,
            message_id: MSG_ID_HEARTBEAT,
            incompat_flags: MAVLINK_IFLAG_SIGNED,
            compat_flags: 0,
            payload: vec![0; 9],
            checksum: 0,
            signature: Some([0; MAVLINK_SIGNATURE_LEN]),
        };
        assert_eq!(frame.wire_len(), 10 + 9 + 2 + 13);
        assert_eq!(frame.payload_len(), 9);
    }
}
