//! Scripted autopilot on the far end of an in-memory stream.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use mav_link_core::ftp::{FtpNak, FtpOpcode, FtpPacket};
use mav_link_core::link::{LinkConfig, MavLink};
use mav_link_core::mavlink::encoder::encode_frame;
use mav_link_core::mavlink::messages::{FileTransferProtocol, Heartbeat, MavPayload};
use mav_link_core::mavlink::protocol::{Frame, MavlinkVersion};
use mav_link_core::mavlink::reassembler::Reassembler;

pub const VEHICLE_SYSTEM: u8 = 1;
pub const VEHICLE_COMPONENT: u8 = 1;

/// Link config with a heartbeat that never gets in the way
pub fn quiet_config() -> LinkConfig {
    LinkConfig {
        heartbeat_interval: Duration::from_secs(3600),
        ..LinkConfig::default()
    }
}

/// Open a link and the autopilot on the other side of it
pub fn connect() -> (MavLink, FakeAutopilot) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let link = MavLink::open(local, quiet_config());
    (link, FakeAutopilot::new(remote))
}

/// Open a link whose target is already known
pub async fn connect_to_vehicle() -> (MavLink, FakeAutopilot) {
    let (link, mut vehicle) = connect();
    vehicle.heartbeat().await;
    tokio::time::timeout(Duration::from_secs(5), link.handle().wait_for_target())
        .await
        .expect("target learned")
        .expect("link open");
    (link, vehicle)
}

pub struct FakeAutopilot {
    stream: DuplexStream,
    reassembler: Reassembler,
    inbox: VecDeque<Frame>,
    sequence: u8,
}

impl FakeAutopilot {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            reassembler: Reassembler::new(),
            inbox: VecDeque::new(),
            sequence: 0,
        }
    }

    pub async fn send<M: MavPayload>(&mut self, message: &M) {
        self.send_as(MavlinkVersion::V1, message).await;
    }

    pub async fn send_as<M: MavPayload>(&mut self, version: MavlinkVersion, message: &M) {
        let bytes = encode_frame(
            version,
            M::MESSAGE_ID,
            &message.encode_for(version),
            self.sequence,
            VEHICLE_SYSTEM,
            VEHICLE_COMPONENT,
        )
        .unwrap();
        self.sequence = self.sequence.wrapping_add(1);
        self.write_raw(&bytes).await;
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Quadrotor running ArduPilot
    pub async fn heartbeat(&mut self) {
        self.send(&Heartbeat {
            custom_mode: 0,
            mav_type: 2,
            autopilot: 3,
            base_mode: 0,
            system_status: 3,
            mavlink_version: 3,
        })
        .await;
    }

    pub async fn next_frame(&mut self) -> Frame {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = self.inbox.pop_front() {
                return frame;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "link closed the stream");
            self.inbox.extend(self.reassembler.push(&buf[..n]));
        }
    }

    /// Next frame of type `M`, skipping everything else
    pub async fn expect<M: MavPayload>(&mut self) -> M {
        loop {
            let frame = self.next_frame().await;
            if frame.message_id == M::MESSAGE_ID {
                return M::decode(&frame.payload, frame.version).unwrap();
            }
        }
    }

    /// Like `expect`, but gives up after `wait`
    pub async fn try_expect<M: MavPayload>(&mut self, wait: Duration) -> Option<M> {
        tokio::time::timeout(wait, self.expect::<M>()).await.ok()
    }

    pub async fn expect_ftp(&mut self) -> FtpPacket {
        let message: FileTransferProtocol = self.expect().await;
        FtpPacket::decode(&message.payload).unwrap()
    }

    pub async fn reply_ftp(&mut self, packet: &FtpPacket) {
        let message = FileTransferProtocol {
            target_network: 0,
            target_system: 255,
            target_component: 190,
            payload: packet.encode(),
        };
        self.send_as(MavlinkVersion::V2, &message).await;
    }

    /// Stop answering and close the stream
    pub fn hang_up(self) {
        drop(self);
    }
}

pub fn ftp_ack(request: &FtpPacket, session: u8, data: &[u8]) -> FtpPacket {
    FtpPacket {
        seq: request.seq.wrapping_add(1),
        session,
        opcode: FtpOpcode::Ack,
        size: data.len() as u8,
        req_opcode: request.opcode,
        burst_complete: false,
        offset: request.offset,
        data: data.to_vec(),
    }
}

pub fn ftp_nak(request: &FtpPacket, nak: FtpNak) -> FtpPacket {
    let data = nak.to_data();
    FtpPacket {
        seq: request.seq.wrapping_add(1),
        session: request.session,
        opcode: FtpOpcode::Nak,
        size: data.len() as u8,
        req_opcode: request.opcode,
        burst_complete: false,
        offset: 0,
        data,
    }
}
