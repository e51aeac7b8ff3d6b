//! # MAVLink Frame Decoder
//!
//! Validates and decodes one MAVLink v1/v2 frame at the front of a buffer.

use super::crc::{crc16, crc_extra};
use super::protocol::*;

/// Why a complete frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFrame {
    /// First byte is not a start-of-frame marker
    BadStartByte(u8),

    /// Recomputed checksum does not match the trailing bytes
    CrcMismatch { expected: u16, received: u16 },
}

/// Result of decoding the front of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The buffer does not hold a whole frame yet
    Incomplete,

    /// The bytes at the front are not a valid frame.
    /// `consumed` covers the rejected bytes so the caller always makes progress.
    Invalid { consumed: usize, reason: InvalidFrame },

    /// A validated frame and the number of bytes it occupied
    Frame { frame: Frame, consumed: usize },
}

/// Compute the total wire length of the frame starting at `buf[0]`
///
/// # Returns
///
/// * `None` if the buffer is too short to know the length or does not start with a marker
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    let version = MavlinkVersion::from_start_marker(*buf.first()?)?;
    let payload_len = *buf.get(1)? as usize;

    match version {
        MavlinkVersion::V1 => Some(MAVLINK_V1_HEADER_LEN + payload_len + MAVLINK_CHECKSUM_LEN),
        MavlinkVersion::V2 => {
            let incompat_flags = *buf.get(2)?;
            let signature = if incompat_flags & MAVLINK_IFLAG_SIGNED != 0 {
                MAVLINK_SIGNATURE_LEN
            } else {
                0
            };
            Some(MAVLINK_V2_HEADER_LEN + payload_len + MAVLINK_CHECKSUM_LEN + signature)
        }
    }
}

/// Decode the frame at the front of a buffer
///
/// Never reads past the computed frame length and never trusts the length
/// byte beyond what the buffer holds.
///
/// # Examples
///
/// ```
/// use mav_link_core::mavlink::decoder::{decode_frame, DecodeOutcome};
/// use mav_link_core::mavlink::encoder::encode_v1_frame;
///
/// let bytes = encode_v1_frame(0, &[0u8; 9], 3, 1, 1).unwrap();
/// match decode_frame(&bytes) {
///     DecodeOutcome::Frame { frame, consumed } => {
///         assert_eq!(frame.sequence, 3);
///         assert_eq!(consumed, bytes.len());
///     }
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
pub fn decode_frame(buf: &[u8]) -> DecodeOutcome {
    let Some(&start) = buf.first() else {
        return DecodeOutcome::Incomplete;
    };

    let Some(version) = MavlinkVersion::from_start_marker(start) else {
        return DecodeOutcome::Invalid {
            consumed: 1,
            reason: InvalidFrame::BadStartByte(start),
        };
    };

    let Some(total_len) = frame_length(buf) else {
        return DecodeOutcome::Incomplete;
    };

    if buf.len() < total_len {
        return DecodeOutcome::Incomplete;
    }

    let payload_len = buf[1] as usize;
    let header_len = version.header_len();

    let (incompat_flags, compat_flags, sequence, system_id, component_id, message_id) = match version {
        MavlinkVersion::V1 => (0, 0, buf[2], buf[3], buf[4], buf[5] as u32),
        MavlinkVersion::V2 => (
            buf[2],
            buf[3],
            buf[4],
            buf[5],
            buf[6],
            u32::from_le_bytes([buf[7], buf[8], buf[9], 0]),
        ),
    };

    let crc_end = header_len + payload_len;
    let received = u16::from_le_bytes([buf[crc_end], buf[crc_end + 1]]);
    let expected = crc16(&buf[1..crc_end], crc_extra(message_id));

    if expected != received {
        return DecodeOutcome::Invalid {
            consumed: total_len,
            reason: InvalidFrame::CrcMismatch { expected, received },
        };
    }

    let signature = if version == MavlinkVersion::V2 && incompat_flags & MAVLINK_IFLAG_SIGNED != 0 {
        let start = crc_end + MAVLINK_CHECKSUM_LEN;
        let mut block = [0u8; MAVLINK_SIGNATURE_LEN];
        block.copy_from_slice(&buf[start..start + MAVLINK_SIGNATURE_LEN]);
        Some(block)
    } else {
        None
    };

    DecodeOutcome::Frame {
        frame: Frame {
            version,
            sequence,
            system_id,
            component_id,
            message_id,
            incompat_flags,
            compat_flags,
            payload: buf[header_len..crc_end].to_vec(),
            checksum: received,
            signature,
        },
        consumed: total_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::{encode_v1_frame, encode_v2_frame};

    fn expect_frame(outcome: DecodeOutcome) -> (Frame, usize) {
        match outcome {
            DecodeOutcome::Frame { frame, consumed } => (frame, consumed),
            other => panic!("Expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_buffer() {
        assert_eq!(decode_frame(&[]), DecodeOutcome::Incomplete);
    }

    #[test]
    fn test_decode_invalid_start_byte() {
        let outcome = decode_frame(&[0x55, 0x09]);
        assert_eq!(
            outcome,
            DecodeOutcome::Invalid {
                consumed: 1,
                reason: InvalidFrame::BadStartByte(0x55)
            }
        );
    }

    #[test]
    fn test_decode_known_heartbeat() {
        let bytes = [
            0xFE, 0x09, 0xEF, 0x01, 0x01, 0x00, 0x05, 0x00, 0x00, 0x00, 0x02, 0x03, 0x59, 0x03,
            0x03, 0xF1, 0xD7,
        ];
        let (frame, consumed) = expect_frame(decode_frame(&bytes));

        assert_eq!(consumed, 17);
        assert_eq!(frame.version, MavlinkVersion::V1);
        assert_eq!(frame.sequence, 0xEF);
        assert_eq!(frame.system_id, 1);
        assert_eq!(frame.component_id, 1);
        assert_eq!(frame.message_id, MSG_ID_HEARTBEAT);
        assert_eq!(frame.payload, vec![0x05, 0x00, 0x00, 0x00, 0x02, 0x03, 0x59, 0x03, 0x03]);
        assert_eq!(frame.checksum, 0xD7F1);
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let bytes = encode_v1_frame(0, &[0u8; 9], 0, 1, 1).unwrap();

        for cut in 0..bytes.len() {
            assert_eq!(decode_frame(&bytes[..cut]), DecodeOutcome::Incomplete, "cut at {}", cut);
        }
    }

    #[test]
    fn test_decode_v2_round_trip() {
        let payload: Vec<u8> = (0..40).collect();
        let bytes = encode_v2_frame(MSG_ID_FILE_TRANSFER_PROTOCOL, &payload, 200, 255, 190).unwrap();
        let (frame, consumed) = expect_frame(decode_frame(&bytes));

        assert_eq!(consumed, bytes.len());
        assert_eq!(frame.version, MavlinkVersion::V2);
        assert_eq!(frame.message_id, MSG_ID_FILE_TRANSFER_PROTOCOL);
        assert_eq!(frame.sequence, 200);
        assert_eq!(frame.payload, payload);
        assert!(!frame.is_signed());
    }

    #[test]
    fn test_decode_signed_v2_frame() {
        let mut bytes = encode_v2_frame(MSG_ID_HEARTBEAT, &[0u8; 9], 1, 1, 1).unwrap();
        bytes[2] |= MAVLINK_IFLAG_SIGNED;

        // Checksum covers the flags, so recompute it
        let crc_end = bytes.len() - 2;
        let crc = crc16(&bytes[1..crc_end], crc_extra(MSG_ID_HEARTBEAT));
        bytes[crc_end..].copy_from_slice(&crc.to_le_bytes());

        // Without the signature block the frame is still incomplete
        assert_eq!(decode_frame(&bytes), DecodeOutcome::Incomplete);

        bytes.extend_from_slice(&[0xAA; MAVLINK_SIGNATURE_LEN]);
        let (frame, consumed) = expect_frame(decode_frame(&bytes));
        assert_eq!(consumed, bytes.len());
        assert_eq!(frame.signature, Some([0xAA; MAVLINK_SIGNATURE_LEN]));
    }

    #[test]
    fn test_decode_crc_mismatch_consumes_frame() {
        let mut bytes = encode_v1_frame(0, &[0u8; 9], 0, 1, 1).unwrap();
        let len = bytes.len();
        bytes[len - 1] ^= 0xFF;

        match decode_frame(&bytes) {
            DecodeOutcome::Invalid {
                consumed,
                reason: InvalidFrame::CrcMismatch { .. },
            } => assert_eq!(consumed, len),
            other => panic!("Expected CRC mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_any_payload_mutation_is_rejected() {
        for id in [
            MSG_ID_HEARTBEAT,
            MSG_ID_PARAM_VALUE,
            MSG_ID_COMMAND_ACK,
            MSG_ID_STATUSTEXT,
            MSG_ID_RC_CHANNELS,
            MSG_ID_RAW_IMU,
            MSG_ID_SCALED_IMU,
        ] {
            let payload: Vec<u8> = (0..20u8).map(|b| b.wrapping_mul(37)).collect();
            let bytes = encode_v1_frame(id as u8, &payload, 9, 1, 1).unwrap();

            for index in 6..6 + payload.len() {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= 0x01;
                assert!(
                    matches!(decode_frame(&corrupted), DecodeOutcome::Invalid { .. }),
                    "mutation at {} for id {} was accepted",
                    index,
                    id
                );
            }
        }
    }

    #[test]
    fn test_decode_unknown_message_fails_crc() {
        // Encoder folds in the sentinel extra; a real sender would not
        let mut bytes = encode_v1_frame(3, &[1, 2, 3], 0, 1, 1).unwrap();
        let len = bytes.len();
        let real = crc16(&bytes[1..len - 2], 77);
        bytes[len - 2..].copy_from_slice(&real.to_le_bytes());

        assert!(matches!(decode_frame(&bytes), DecodeOutcome::Invalid { .. }));
    }

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(&[0xFE]), None);
        assert_eq!(frame_length(&[0xFE, 9]), Some(17));
        assert_eq!(frame_length(&[0xFD, 9]), None);
        assert_eq!(frame_length(&[0xFD, 9, 0]), Some(21));
        assert_eq!(frame_length(&[0xFD, 9, 1]), Some(34));
        assert_eq!(frame_length(&[0x00, 9, 1]), None);
    }
}
