//! # MAVLink Frame Encoder
//!
//! Wraps a message payload into a complete V1 or V2 frame.

use super::crc::crc16;
use super::protocol::*;
use crate::error::{MavLinkError, Result};

/// Encode a payload into a complete frame of the given version
///
/// # Arguments
///
/// * `version` - Framing version to emit
/// * `message_id` - Message id (must fit 8 bits for V1, 24 bits for V2)
/// * `payload` - Message payload (at most 255 bytes)
/// * `sequence` - Sender sequence number
/// * `system_id` / `component_id` - Sender identity
///
/// # Errors
///
/// Returns error if the payload or the message id does not fit the framing.
pub fn encode_frame(
    version: MavlinkVersion,
    message_id: u32,
    payload: &[u8],
    sequence: u8,
    system_id: u8,
    component_id: u8,
) -> Result<Vec<u8>> {
    match version {
        MavlinkVersion::V1 => {
            let id = u8::try_from(message_id).map_err(|_| {
                MavLinkError::Protocol(format!("Message id {} does not fit a V1 frame", message_id))
            })?;
            encode_v1_frame(id, payload, sequence, system_id, component_id)
        }
        MavlinkVersion::V2 => encode_v2_frame(message_id, payload, sequence, system_id, component_id),
    }
}

/// Encode a payload into a MAVLink v1 frame
///
/// # Returns
///
/// * `Result<Vec<u8>>` - stx + 5 header bytes + payload + checksum
///
/// # Examples
///
/// ```
/// use mav_link_core::mavlink::encoder::encode_v1_frame;
///
/// let frame = encode_v1_frame(0, &[0u8; 9], 0, 255, 190).unwrap();
/// assert_eq!(frame.len(), 17);
/// assert_eq!(frame[0], 0xFE);
/// ```
pub fn encode_v1_frame(
    message_id: u8,
    payload: &[u8],
    sequence: u8,
    system_id: u8,
    component_id: u8,
) -> Result<Vec<u8>> {
    let len = checked_payload_len(payload)?;

    let mut frame = Vec::with_capacity(MAVLINK_V1_HEADER_LEN + payload.len() + MAVLINK_CHECKSUM_LEN);
    frame.push(MAVLINK_STX_V1);
    frame.push(len);
    frame.push(sequence);
    frame.push(system_id);
    frame.push(component_id);
    frame.push(message_id);
    frame.extend_from_slice(payload);

    // Checksum covers everything after the start marker
    let crc = crc16(&frame[1..], super::crc::crc_extra(message_id as u32));
    frame.extend_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

/// Encode a payload into an unsigned MAVLink v2 frame
///
/// The payload is sent as-is; trailing zero bytes are not truncated.
pub fn encode_v2_frame(
    message_id: u32,
    payload: &[u8],
    sequence: u8,
    system_id: u8,
    component_id: u8,
) -> Result<Vec<u8>> {
    let len = checked_payload_len(payload)?;

    if message_id > 0x00FF_FFFF {
        return Err(MavLinkError::Protocol(format!(
            "Message id {} does not fit 24 bits",
            message_id
        )));
    }

    let id = message_id.to_le_bytes();

    let mut frame = Vec::with_capacity(MAVLINK_V2_HEADER_LEN + payload.len() + MAVLINK_CHECKSUM_LEN);
    frame.push(MAVLINK_STX_V2);
    frame.push(len);
    frame.push(0); // incompat flags
    frame.push(0); // compat flags
    frame.push(sequence);
    frame.push(system_id);
    frame.push(component_id);
    frame.extend_from_slice(&id[..3]);
    frame.extend_from_slice(payload);

    let crc = crc16(&frame[1..], super::crc::crc_extra(message_id));
    frame.extend_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

fn checked_payload_len(payload: &[u8]) -> Result<u8> {
    u8::try_from(payload.len()).map_err(|_| {
        MavLinkError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            payload.len(),
            MAVLINK_MAX_PAYLOAD_LEN
        ))
    })
}
