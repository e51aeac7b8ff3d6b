//! # MAVLink FTP
//!
//! File access on the autopilot through FILE_TRANSFER_PROTOCOL frames.
//!
//! This module handles:
//! - FTP packet encoding and decoding
//! - Directory listing parsing
//! - Listing, download, delete and session reset with single-request discipline

pub mod protocol;
pub mod listing;
pub mod client;

pub use client::{FtpClient, FtpProgress, DEFAULT_FTP_TIMEOUT};
pub use listing::{FtpEntry, FtpEntryKind};
pub use protocol::{FtpNak, FtpOpcode, FtpPacket};
