//! # MAVLink FTP Packet Format
//!
//! Layout of the 251-byte payload carried by FILE_TRANSFER_PROTOCOL:
//!
//! ```text
//! [seq u16][session u8][opcode u8][size u8][req_opcode u8][burst_complete u8][pad u8][offset u32][data 239]
//! ```
//!
//! Multi-byte fields are little-endian.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{MavLinkError, Result};

/// Bytes before the data field
pub const FTP_HEADER_LEN: usize = 12;

/// Largest data field
pub const FTP_MAX_DATA_LEN: usize = 239;

/// FTP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FtpOpcode {
    None,
    TerminateSession,
    ResetSessions,
    ListDirectory,
    OpenFileRO,
    ReadFile,
    CreateFile,
    WriteFile,
    RemoveFile,
    CreateDirectory,
    RemoveDirectory,
    OpenFileWO,
    TruncateFile,
    Rename,
    CalcFileCrc32,
    BurstReadFile,
    Ack,
    Nak,
    Unknown(u8),
}

impl FtpOpcode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FtpOpcode::None,
            1 => FtpOpcode::TerminateSession,
            2 => FtpOpcode::ResetSessions,
            3 => FtpOpcode::ListDirectory,
            4 => FtpOpcode::OpenFileRO,
            5 => FtpOpcode::ReadFile,
            6 => FtpOpcode::CreateFile,
            7 => FtpOpcode::WriteFile,
            8 => FtpOpcode::RemoveFile,
            9 => FtpOpcode::CreateDirectory,
            10 => FtpOpcode::RemoveDirectory,
            11 => FtpOpcode::OpenFileWO,
            12 => FtpOpcode::TruncateFile,
            13 => FtpOpcode::Rename,
            14 => FtpOpcode::CalcFileCrc32,
            15 => FtpOpcode::BurstReadFile,
            128 => FtpOpcode::Ack,
            129 => FtpOpcode::Nak,
            other => FtpOpcode::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FtpOpcode::None => 0,
            FtpOpcode::TerminateSession => 1,
            FtpOpcode::ResetSessions => 2,
            FtpOpcode::ListDirectory => 3,
            FtpOpcode::OpenFileRO => 4,
            FtpOpcode::ReadFile => 5,
            FtpOpcode::CreateFile => 6,
            FtpOpcode::WriteFile => 7,
            FtpOpcode::RemoveFile => 8,
            FtpOpcode::CreateDirectory => 9,
            FtpOpcode::RemoveDirectory => 10,
            FtpOpcode::OpenFileWO => 11,
            FtpOpcode::TruncateFile => 12,
            FtpOpcode::Rename => 13,
            FtpOpcode::CalcFileCrc32 => 14,
            FtpOpcode::BurstReadFile => 15,
            FtpOpcode::Ack => 128,
            FtpOpcode::Nak => 129,
            FtpOpcode::Unknown(other) => other,
        }
    }
}

/// Error carried by a NAK response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpNak {
    None,
    Fail,
    /// Remote errno in the second data byte
    FailErrno(u8),
    InvalidDataSize,
    InvalidSession,
    NoSessionsAvailable,
    /// End of file or end of directory listing
    Eof,
    UnknownCommand,
    FileExists,
    FileProtected,
    FileNotFound,
    Unknown(u8),
}

impl FtpNak {
    /// Decode from a NAK data field
    pub fn from_data(data: &[u8]) -> Self {
        match data.first().copied() {
            None => FtpNak::Fail,
            Some(0) => FtpNak::None,
            Some(1) => FtpNak::Fail,
            Some(2) => FtpNak::FailErrno(data.get(1).copied().unwrap_or(0)),
            Some(3) => FtpNak::InvalidDataSize,
            Some(4) => FtpNak::InvalidSession,
            Some(5) => FtpNak::NoSessionsAvailable,
            Some(6) => FtpNak::Eof,
            Some(7) => FtpNak::UnknownCommand,
            Some(8) => FtpNak::FileExists,
            Some(9) => FtpNak::FileProtected,
            Some(10) => FtpNak::FileNotFound,
            Some(other) => FtpNak::Unknown(other),
        }
    }

    pub fn to_data(self) -> Vec<u8> {
        match self {
            FtpNak::None => vec![0],
            FtpNak::Fail => vec![1],
            FtpNak::FailErrno(errno) => vec![2, errno],
            FtpNak::InvalidDataSize => vec![3],
            FtpNak::InvalidSession => vec![4],
            FtpNak::NoSessionsAvailable => vec![5],
            FtpNak::Eof => vec![6],
            FtpNak::UnknownCommand => vec![7],
            FtpNak::FileExists => vec![8],
            FtpNak::FileProtected => vec![9],
            FtpNak::FileNotFound => vec![10],
            FtpNak::Unknown(code) => vec![code],
        }
    }
}

impl fmt::Display for FtpNak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpNak::None => write!(f, "no error"),
            FtpNak::Fail => write!(f, "failed"),
            FtpNak::FailErrno(errno) => write!(f, "failed with errno {}", errno),
            FtpNak::InvalidDataSize => write!(f, "invalid data size"),
            FtpNak::InvalidSession => write!(f, "invalid session"),
            FtpNak::NoSessionsAvailable => write!(f, "no sessions available"),
            FtpNak::Eof => write!(f, "end of file"),
            FtpNak::UnknownCommand => write!(f, "unknown command"),
            FtpNak::FileExists => write!(f, "file exists"),
            FtpNak::FileProtected => write!(f, "file protected"),
            FtpNak::FileNotFound => write!(f, "file not found"),
            FtpNak::Unknown(code) => write!(f, "unknown error {}", code),
        }
    }
}

/// One FTP request or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpPacket {
    pub seq: u16,
    pub session: u8,
    pub opcode: FtpOpcode,
    /// Meaning depends on the opcode; usually the data length
    pub size: u8,
    /// Opcode of the request a response answers
    pub req_opcode: FtpOpcode,
    pub burst_complete: bool,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl FtpPacket {
    /// Build a request whose size field is the data length
    pub fn request(seq: u16, session: u8, opcode: FtpOpcode, offset: u32, data: &[u8]) -> Result<Self> {
        if data.len() > FTP_MAX_DATA_LEN {
            return Err(MavLinkError::Protocol(format!(
                "FTP data of {} bytes exceeds {}",
                data.len(),
                FTP_MAX_DATA_LEN
            )));
        }
        Ok(Self {
            seq,
            session,
            opcode,
            size: data.len() as u8,
            req_opcode: FtpOpcode::None,
            burst_complete: false,
            offset,
            data: data.to_vec(),
        })
    }

    /// Error code of a NAK response
    pub fn nak(&self) -> FtpNak {
        FtpNak::from_data(&self.data)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FTP_HEADER_LEN + self.data.len());
        buf.put_u16_le(self.seq);
        buf.put_u8(self.session);
        buf.put_u8(self.opcode.as_u8());
        buf.put_u8(self.size);
        buf.put_u8(self.req_opcode.as_u8());
        buf.put_u8(self.burst_complete as u8);
        buf.put_u8(0);
        buf.put_u32_le(self.offset);
        buf.put_slice(&self.data[..self.data.len().min(FTP_MAX_DATA_LEN)]);
        buf
    }

    /// Decode from the FILE_TRANSFER_PROTOCOL payload
    ///
    /// The data field is cut to `size`, never past the bytes present.
    ///
    /// # Errors
    ///
    /// Returns error if the header is incomplete
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < FTP_HEADER_LEN {
            return Err(MavLinkError::Protocol(format!(
                "FTP payload too short: {} bytes",
                payload.len()
            )));
        }

        let mut buf = payload;
        let seq = buf.get_u16_le();
        let session = buf.get_u8();
        let opcode = FtpOpcode::from_u8(buf.get_u8());
        let size = buf.get_u8();
        let req_opcode = FtpOpcode::from_u8(buf.get_u8());
        let burst_complete = buf.get_u8() != 0;
        buf.advance(1);
        let offset = buf.get_u32_le();

        let len = (size as usize).min(FTP_MAX_DATA_LEN).min(buf.len());
        Ok(Self {
            seq,
            session,
            opcode,
            size,
            req_opcode,
            burst_complete,
            offset,
            data: buf[..len].to_vec(),
        })
    }
}
