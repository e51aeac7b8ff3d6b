//! # Link Engine
//!
//! Owns one duplex byte stream to an autopilot.
//!
//! This module handles:
//! - Feeding inbound bytes through the reassembler and message table
//! - Dispatching typed messages to registered listeners
//! - Sending the ground-station heartbeat once per interval
//! - Serializing outbound frame writes
//! - Learning the target system/component from its heartbeat
//! - Bounded, best-effort shutdown

pub mod dispatch;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{MavLinkError, Result};
use crate::mavlink::encoder::encode_frame;
use crate::mavlink::messages::{Heartbeat, MavMessage, MavPayload};
use crate::mavlink::protocol::MavlinkVersion;
use crate::mavlink::reassembler::{Reassembler, ReassemblerStats, DEFAULT_REASSEMBLY_CAPACITY};

pub use dispatch::{Dispatcher, ListenerId, Source};

/// Tunables of one link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Our system id on the wire
    pub system_id: u8,

    /// Our component id on the wire
    pub component_id: u8,

    /// Period of the ground-station heartbeat
    pub heartbeat_interval: Duration,

    /// Reassembly buffer capacity in bytes
    pub reassembly_capacity: usize,

    /// Size of each read from the stream
    pub read_chunk_size: usize,

    /// Pause after a zero-length read
    pub idle_read_backoff: Duration,

    /// How long `close` waits for each background task
    pub close_grace: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            system_id: 255,
            component_id: 190,
            heartbeat_interval: Duration::from_secs(1),
            reassembly_capacity: DEFAULT_REASSEMBLY_CAPACITY,
            read_chunk_size: 1024,
            idle_read_backoff: Duration::from_millis(10),
            close_grace: Duration::from_secs(2),
        }
    }
}

/// Lifecycle of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closed,
    ConnectionLost,
}

/// Remote autopilot addressed by outbound commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetIdentity {
    pub system_id: u8,
    pub component_id: u8,
}

impl Default for TargetIdentity {
    /// Conventional autopilot address used until a heartbeat is seen
    fn default() -> Self {
        Self {
            system_id: 1,
            component_id: 1,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct LinkShared {
    config: LinkConfig,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    sequence: AtomicU8,
    reassembler: Mutex<Reassembler>,
    dispatcher: Dispatcher,
    target: watch::Sender<Option<TargetIdentity>>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl LinkShared {
    /// Reassemble, decode and dispatch one inbound chunk
    fn ingest(&self, chunk: &[u8]) {
        // Listeners run outside the reassembler lock
        let frames = self
            .reassembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk);

        for frame in frames {
            let source = Source::of(&frame);
            match MavMessage::decode(&frame) {
                Ok(Some(message)) => {
                    trace!(
                        "Dispatching message {} from {}/{}",
                        frame.message_id,
                        source.system_id,
                        source.component_id
                    );
                    if let MavMessage::Heartbeat(heartbeat) = &message {
                        if !heartbeat.is_ground_station() {
                            self.learn_target(source);
                        }
                    }
                    self.dispatcher.dispatch(&source, &message);
                }
                Ok(None) => trace!("Ignoring message id {}", frame.message_id),
                Err(e) => warn!("Dropping message {}: {}", frame.message_id, e),
            }
        }
    }

    fn learn_target(&self, source: Source) {
        self.target.send_if_modified(|target| {
            if target.is_some() {
                return false;
            }
            info!(
                "Autopilot detected: system {} component {}",
                source.system_id, source.component_id
            );
            *target = Some(TargetIdentity {
                system_id: source.system_id,
                component_id: source.component_id,
            });
            true
        });
    }

    /// Move out of `Open` and wake every waiter
    fn terminate(&self, state: LinkState) {
        self.state.send_if_modified(|current| {
            if *current == LinkState::Open {
                *current = state;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();
    }
}

/// Cloneable sending side of a link, shared by every client
#[derive(Clone)]
pub struct LinkHandle {
    shared: Arc<LinkShared>,
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("state", &self.state())
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

impl LinkHandle {
    /// Send a message in V1 framing
    ///
    /// # Errors
    ///
    /// Returns error if the link is not open or the write fails
    pub async fn send_message<M: MavPayload + Sync>(&self, message: &M) -> Result<()> {
        let payload = message.encode_for(MavlinkVersion::V1);
        self.send_frame(MavlinkVersion::V1, M::MESSAGE_ID, &payload).await
    }

    /// Send a message in V2 framing
    pub async fn send_message_v2<M: MavPayload + Sync>(&self, message: &M) -> Result<()> {
        let payload = message.encode_for(MavlinkVersion::V2);
        self.send_frame(MavlinkVersion::V2, M::MESSAGE_ID, &payload).await
    }

    /// Frame and write a raw payload
    ///
    /// The sequence number is taken under the writer lock, so frames hit the
    /// wire in sequence order and never interleave.
    pub async fn send_frame(&self, version: MavlinkVersion, message_id: u32, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let cancel = &self.shared.cancel;

        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.closed_error()),
            guard = self.shared.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(MavLinkError::LinkClosed)?;

        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_frame(
            version,
            message_id,
            payload,
            sequence,
            self.shared.config.system_id,
            self.shared.config.component_id,
        )?;

        // A transport that stops draining must not outlive the link
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Abandoning write of message {}: link stopped", message_id);
                return Err(self.closed_error());
            }
            written = async {
                writer.write_all(&bytes).await?;
                writer.flush().await
            } => written,
        };
        if let Err(e) = written {
            error!("Write failed, connection lost: {}", e);
            self.shared.terminate(LinkState::ConnectionLost);
            return Err(MavLinkError::ConnectionLost);
        }

        trace!("Sent message {} seq {} ({} bytes)", message_id, sequence, bytes.len());
        Ok(())
    }

    /// Autopilot address, or the conventional 1/1 before any heartbeat
    pub fn target(&self) -> TargetIdentity {
        self.shared.target.borrow().unwrap_or_default()
    }

    /// Whether a non-GCS heartbeat has been seen
    pub fn target_known(&self) -> bool {
        self.shared.target.borrow().is_some()
    }

    /// Wait until the autopilot has announced itself
    ///
    /// # Errors
    ///
    /// Returns error if the link closes first
    pub async fn wait_for_target(&self) -> Result<TargetIdentity> {
        let mut rx = self.shared.target.subscribe();
        tokio::select! {
            found = rx.wait_for(Option::is_some) => match found {
                Ok(target) => {
                    let found = *target;
                    found.ok_or_else(|| self.closed_error())
                }
                Err(_) => Err(self.closed_error()),
            },
            _ = self.shared.cancel.cancelled() => Err(self.closed_error()),
        }
    }

    /// Our own system/component id on the wire
    pub fn local(&self) -> Source {
        Source {
            system_id: self.shared.config.system_id,
            component_id: self.shared.config.component_id,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Token cancelled when the link closes or the connection is lost
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Error describing why the link stopped
    pub fn closed_error(&self) -> MavLinkError {
        match self.state() {
            LinkState::ConnectionLost => MavLinkError::ConnectionLost,
            _ => MavLinkError::LinkClosed,
        }
    }

    pub fn reassembler_stats(&self) -> ReassemblerStats {
        self.shared
            .reassembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            LinkState::Open => Ok(()),
            LinkState::Closed => Err(MavLinkError::LinkClosed),
            LinkState::ConnectionLost => Err(MavLinkError::ConnectionLost),
        }
    }
}

/// Problems met while closing a link
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub issues: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// An open MAVLink connection and its background tasks
pub struct MavLink {
    handle: LinkHandle,
    read_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for MavLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MavLink").field("handle", &self.handle).finish_non_exhaustive()
    }
}

impl MavLink {
    /// Start a link over an already connected stream
    ///
    /// Spawns the read task and the heartbeat task on the current runtime.
    ///
    /// # Examples
    ///
    /// ```
    /// use mav_link_core::link::{LinkConfig, LinkState, MavLink};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let (stream, _autopilot) = tokio::io::duplex(4096);
    /// let mut link = MavLink::open(stream, LinkConfig::default());
    /// assert_eq!(link.handle().state(), LinkState::Open);
    ///
    /// let report = link.close().await;
    /// assert!(report.is_clean());
    /// # }
    /// ```
    pub fn open<S>(stream: S, config: LinkConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (target, _) = watch::channel(None);
        let (state, _) = watch::channel(LinkState::Open);

        let shared = Arc::new(LinkShared {
            reassembler: Mutex::new(Reassembler::with_capacity(config.reassembly_capacity)),
            config,
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            sequence: AtomicU8::new(0),
            dispatcher: Dispatcher::new(),
            target,
            state,
            cancel: CancellationToken::new(),
        });

        let handle = LinkHandle { shared };
        let read_task = tokio::spawn(read_loop(Arc::clone(&handle.shared), reader));
        let heartbeat_task = tokio::spawn(heartbeat_loop(handle.clone()));

        info!("MAVLink link opened");

        Self {
            handle,
            read_task: Some(read_task),
            heartbeat_task: Some(heartbeat_task),
        }
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Stop both tasks and release the stream
    ///
    /// Never fails: anything that does not shut down cleanly within the grace
    /// period is recorded in the report.
    pub async fn close(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let shared = &self.handle.shared;
        let grace = shared.config.close_grace;

        shared.terminate(LinkState::Closed);

        for (name, task) in [("read", self.read_task.take()), ("heartbeat", self.heartbeat_task.take())] {
            let Some(mut task) = task else { continue };
            match timeout(grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => report.issues.push(format!("{} task failed: {}", name, e)),
                Err(_) => {
                    task.abort();
                    report
                        .issues
                        .push(format!("{} task did not stop within {:?}", name, grace));
                }
            }
        }

        let writer = match timeout(grace, shared.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                report
                    .issues
                    .push(format!("writer still busy after {:?}", grace));
                None
            }
        };
        if let Some(mut writer) = writer {
            match timeout(grace, writer.shutdown()).await {
                Ok(Ok(())) => {}
                // The peer may already be gone
                Ok(Err(e)) => debug!("Writer shutdown: {}", e),
                Err(_) => report.issues.push("writer shutdown timed out".to_string()),
            }
        }

        // A lost connection keeps its state; a clean close ends Closed
        shared.state.send_if_modified(|state| {
            if *state == LinkState::Open {
                *state = LinkState::Closed;
                true
            } else {
                false
            }
        });

        if report.is_clean() {
            info!("MAVLink link closed");
        } else {
            warn!("MAVLink link closed with issues: {:?}", report.issues);
        }

        report
    }
}

impl Drop for MavLink {
    fn drop(&mut self) {
        self.handle.shared.terminate(LinkState::Closed);
    }
}

async fn read_loop<R>(shared: Arc<LinkShared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; shared.config.read_chunk_size.max(1)];

    loop {
        let read = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };

        match read {
            // No data yet; the stream stays open
            Ok(0) => {
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = sleep(shared.config.idle_read_backoff) => {}
                }
            }
            Ok(n) => shared.ingest(&buf[..n]),
            Err(e) => {
                error!("Connection lost: {}", e);
                shared.terminate(LinkState::ConnectionLost);
                break;
            }
        }
    }

    debug!("Read task stopped");
}

async fn heartbeat_loop(link: LinkHandle) {
    let mut ticker = interval(link.shared.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeat = Heartbeat::ground_station();
    let cancel = link.shutdown_token();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = link.send_message(&heartbeat).await {
                    warn!("Failed to send heartbeat: {}", e);
                }
            }
        }
    }

    debug!("Heartbeat task stopped");
}
