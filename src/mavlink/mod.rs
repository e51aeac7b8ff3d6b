//! # MAVLink Wire Module
//!
//! Byte-level MAVLink v1/v2 support for the link engine.
//!
//! This module handles:
//! - CRC-16/MCRF4XX checksum with per-message CRC-extra
//! - Single-frame encode/decode for both framing versions
//! - Stream reassembly with resynchronization on garbage
//! - Typed layouts for the messages the link engine dispatches

pub mod protocol;
pub mod crc;
pub mod encoder;
pub mod decoder;
pub mod reassembler;
pub mod messages;
