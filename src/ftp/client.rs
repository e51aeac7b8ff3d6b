//! # FTP Client
//!
//! Request/response client for the MAVLink FTP sub-protocol.
//!
//! One request is in flight at a time. A response belongs to a request when
//! its `req_opcode` matches and its `seq` is the request's `seq + 1`.
//! Multi-request operations (listing, download) hold the channel for their
//! whole duration so no other request can interleave.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::listing::{parse_listing, FtpEntry};
use super::protocol::{FtpNak, FtpOpcode, FtpPacket, FTP_MAX_DATA_LEN};
use crate::correlator::pending::{await_reply, PendingSlot};
use crate::error::{MavLinkError, Result};
use crate::link::{LinkHandle, ListenerId};
use crate::mavlink::messages::FileTransferProtocol;

/// Default wait for each FTP response
pub const DEFAULT_FTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Download progress after each received chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtpProgress {
    pub bytes_transferred: u64,
    /// Size reported when the file was opened, if any
    pub total_size: Option<u64>,
}

impl FtpProgress {
    /// Completed fraction in 0.0..=1.0, when the size is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_size {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// MAVLink FTP client bound to one link
pub struct FtpClient {
    link: LinkHandle,
    slot: Arc<PendingSlot<FtpPacket>>,
    channel: tokio::sync::Mutex<()>,
    seq: Arc<AtomicU16>,
    listener: ListenerId,
    timeout: Duration,
}

impl std::fmt::Debug for FtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FtpClient {
    pub fn new(link: LinkHandle, timeout: Duration) -> Self {
        let slot = Arc::new(PendingSlot::new());
        let offer = Arc::clone(&slot);
        let local = link.local();

        let listener = link.dispatcher().on_file_transfer(move |_, message| {
            if message.target_system != 0 && message.target_system != local.system_id {
                return;
            }
            match FtpPacket::decode(&message.payload) {
                Ok(packet) if matches!(packet.opcode, FtpOpcode::Ack | FtpOpcode::Nak) => {
                    offer.offer(&packet);
                }
                Ok(_) => {}
                Err(e) => warn!("Dropping FTP payload: {}", e),
            }
        });

        Self {
            link,
            slot,
            channel: tokio::sync::Mutex::new(()),
            seq: Arc::new(AtomicU16::new(0)),
            listener,
            timeout,
        }
    }

    /// List a remote directory
    ///
    /// Keeps requesting at increasing entry offsets until the remote reports
    /// end of listing. A missing directory yields an empty list.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<FtpEntry>> {
        let _channel = self.channel.lock().await;
        let mut entries = Vec::new();
        let mut offset = 0u32;

        loop {
            let request = self.request(0, FtpOpcode::ListDirectory, offset, path.as_bytes())?;
            match self.exchange(request).await {
                Ok(reply) => {
                    let listing = parse_listing(path, &reply.data);
                    if listing.raw_count == 0 {
                        break;
                    }
                    offset += listing.raw_count;
                    entries.extend(listing.entries);
                }
                Err(MavLinkError::Ftp(FtpNak::Eof)) => break,
                Err(MavLinkError::Ftp(FtpNak::FileNotFound)) => {
                    debug!("{} not found", path);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!("Listed {}: {} entries", path, entries.len());
        Ok(entries)
    }

    /// Download a remote file into `sink`
    ///
    /// Progress is reported after every chunk. The remote session is always
    /// terminated: explicitly on every return path, and from a drop guard if
    /// the future itself is dropped mid-transfer.
    ///
    /// # Returns
    ///
    /// * `Result<u64>` - Number of bytes written to the sink
    ///
    /// # Errors
    ///
    /// * `Cancelled` when `cancel` fires
    /// * `Ftp` when the remote refuses the open or a read
    /// * `Timeout` when a response does not arrive in time
    pub async fn download<W, P>(
        &self,
        path: &str,
        sink: &mut W,
        mut progress: P,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
        P: FnMut(FtpProgress) + Send,
    {
        let _channel = self.channel.lock().await;

        let open = self.request(0, FtpOpcode::OpenFileRO, 0, path.as_bytes())?;
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MavLinkError::Cancelled),
            reply = self.exchange(open) => reply?,
        };

        let session = opened.session;
        let total_size = match opened.data.get(..4) {
            Some(size) => Some(u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as u64),
            None => None,
        };
        info!("Downloading {} (session {}, size {:?})", path, session, total_size);

        let mut guard = SessionGuard {
            link: self.link.clone(),
            seq: Arc::clone(&self.seq),
            session,
            armed: true,
        };

        let result = self.read_session(session, total_size, sink, &mut progress, cancel).await;

        guard.armed = false;
        if let Err(e) = self.terminate_session(session).await {
            warn!("Failed to terminate FTP session {}: {}", session, e);
        }

        match &result {
            Ok(bytes) => info!("Downloaded {} ({} bytes)", path, bytes),
            Err(e) => warn!("Download of {} stopped: {}", path, e),
        }
        result
    }

    /// Delete a remote file
    pub async fn delete(&self, path: &str) -> Result<()> {
        let _channel = self.channel.lock().await;
        let request = self.request(0, FtpOpcode::RemoveFile, 0, path.as_bytes())?;
        self.exchange(request).await?;
        info!("Deleted {}", path);
        Ok(())
    }

    /// Drop every open session on the remote
    pub async fn reset_sessions(&self) -> Result<()> {
        let _channel = self.channel.lock().await;
        let request = self.request(0, FtpOpcode::ResetSessions, 0, &[])?;
        self.exchange(request).await?;
        debug!("FTP sessions reset");
        Ok(())
    }

    async fn read_session<W, P>(
        &self,
        session: u8,
        total_size: Option<u64>,
        sink: &mut W,
        progress: &mut P,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
        P: FnMut(FtpProgress) + Send,
    {
        let mut offset = 0u32;
        let mut transferred = 0u64;

        loop {
            let mut request = self.request(session, FtpOpcode::ReadFile, offset, &[])?;
            request.size = FTP_MAX_DATA_LEN as u8;

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MavLinkError::Cancelled),
                reply = self.exchange(request) => reply,
            };

            let chunk = match reply {
                Ok(reply) => reply.data,
                Err(MavLinkError::Ftp(FtpNak::Eof)) => break,
                Err(e) => return Err(e),
            };
            if chunk.is_empty() {
                break;
            }

            sink.write_all(&chunk).await?;
            offset += chunk.len() as u32;
            transferred += chunk.len() as u64;

            progress(FtpProgress {
                bytes_transferred: transferred,
                total_size,
            });
        }

        sink.flush().await?;
        Ok(transferred)
    }

    async fn terminate_session(&self, session: u8) -> Result<()> {
        let request = self.request(session, FtpOpcode::TerminateSession, 0, &[])?;
        self.exchange(request).await.map(|_| ())
    }

    fn request(&self, session: u8, opcode: FtpOpcode, offset: u32, data: &[u8]) -> Result<FtpPacket> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        FtpPacket::request(seq, session, opcode, offset, data)
    }

    /// One round trip; caller holds the channel
    async fn exchange(&self, request: FtpPacket) -> Result<FtpPacket> {
        let expected_seq = request.seq.wrapping_add(1);
        let opcode = request.opcode;

        let rx = self.slot.arm(move |reply: &FtpPacket| {
            reply.seq == expected_seq && reply.req_opcode == opcode
        });

        if let Err(e) = self.link.send_message_v2(&wrap(&self.link, &request)).await {
            self.slot.clear();
            return Err(e);
        }

        let reply = match await_reply(rx, self.timeout, &self.link, "FTP response").await {
            Ok(reply) => reply,
            Err(e) => {
                self.slot.clear();
                return Err(e);
            }
        };

        match reply.opcode {
            FtpOpcode::Ack => Ok(reply),
            _ => {
                let nak = reply.nak();
                debug!("FTP {:?} refused: {}", opcode, nak);
                Err(MavLinkError::Ftp(nak))
            }
        }
    }
}

impl Drop for FtpClient {
    fn drop(&mut self) {
        self.link.dispatcher().unsubscribe(self.listener);
    }
}

fn wrap(link: &LinkHandle, packet: &FtpPacket) -> FileTransferProtocol {
    let target = link.target();
    FileTransferProtocol {
        target_network: 0,
        target_system: target.system_id,
        target_component: target.component_id,
        payload: packet.encode(),
    }
}

/// Terminates a session whose download future was dropped
struct SessionGuard {
    link: LinkHandle,
    seq: Arc<AtomicU16>,
    session: u8,
    armed: bool,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let Ok(packet) = FtpPacket::request(seq, self.session, FtpOpcode::TerminateSession, 0, &[]) else {
            return;
        };
        let message = wrap(&self.link, &packet);
        let link = self.link.clone();
        let session = self.session;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = link.send_message_v2(&message).await {
                        warn!("Failed to terminate abandoned FTP session {}: {}", session, e);
                    }
                });
            }
            Err(_) => warn!("FTP session {} left open: no runtime", session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let progress = FtpProgress {
            bytes_transferred: 50,
            total_size: Some(200),
        };
        assert_eq!(progress.fraction(), Some(0.25));

        let unknown = FtpProgress {
            bytes_transferred: 50,
            total_size: None,
        };
        assert_eq!(unknown.fraction(), None);

        let empty = FtpProgress {
            bytes_transferred: 0,
            total_size: Some(0),
        };
        assert_eq!(empty.fraction(), Some(1.0));
    }
}
