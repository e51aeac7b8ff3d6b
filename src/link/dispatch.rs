//! # Message Dispatch
//!
//! Typed listener lists, one per inbound message type.
//!
//! Listeners run on the read task in registration order. They must not block;
//! anything slow should forward into a channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::mavlink::messages::*;
use crate::mavlink::protocol::Frame;

/// Sender of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Source {
    pub system_id: u8,
    pub component_id: u8,
}

impl Source {
    pub fn of(frame: &Frame) -> Self {
        Self {
            system_id: frame.system_id,
            component_id: frame.component_id,
        }
    }
}

/// Handle returned by every `on_*` registration, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&Source, &T) + Send + Sync>;

/// Ordered listener list for one message type
pub struct Listeners<T> {
    entries: RwLock<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Listeners<T> {
    fn add(&self, id: ListenerId, callback: Callback<T>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Invoke every listener in registration order
    ///
    /// The list is snapshotted first, so a listener may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, source: &Source, message: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(source, message);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

macro_rules! listener_methods {
    ($($method:ident => $field:ident : $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Register a listener for `", stringify!($ty), "`")]
            pub fn $method<F>(&self, callback: F) -> ListenerId
            where
                F: Fn(&Source, &$ty) + Send + Sync + 'static,
            {
                let id = self.next_id();
                self.$field.add(id, Arc::new(callback));
                id
            }
        )*

        /// Remove a listener from whichever list holds it
        pub fn unsubscribe(&self, id: ListenerId) -> bool {
            false $(|| self.$field.remove(id))*
        }
    };
}

/// Dispatch table keyed by message type
#[derive(Default)]
pub struct Dispatcher {
    next: AtomicU64,
    heartbeat: Listeners<Heartbeat>,
    param_value: Listeners<ParamValue>,
    command_ack: Listeners<CommandAck>,
    status_text: Listeners<StatusText>,
    rc_channels: Listeners<RcChannels>,
    raw_imu: Listeners<RawImu>,
    scaled_imu: Listeners<ScaledImu>,
    file_transfer: Listeners<FileTransferProtocol>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("heartbeat", &self.heartbeat.len())
            .field("param_value", &self.param_value.len())
            .field("command_ack", &self.command_ack.len())
            .field("status_text", &self.status_text.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    listener_methods! {
        on_heartbeat => heartbeat: Heartbeat,
        on_param_value => param_value: ParamValue,
        on_command_ack => command_ack: CommandAck,
        on_status_text => status_text: StatusText,
        on_rc_channels => rc_channels: RcChannels,
        on_raw_imu => raw_imu: RawImu,
        on_scaled_imu => scaled_imu: ScaledImu,
        on_file_transfer => file_transfer: FileTransferProtocol,
    }

    /// Route a decoded message to the listeners of its type
    pub fn dispatch(&self, source: &Source, message: &MavMessage) {
        match message {
            MavMessage::Heartbeat(m) => self.heartbeat.emit(source, m),
            MavMessage::ParamValue(m) => self.param_value.emit(source, m),
            MavMessage::CommandAck(m) => self.command_ack.emit(source, m),
            MavMessage::StatusText(m) => self.status_text.emit(source, m),
            MavMessage::RcChannels(m) => self.rc_channels.emit(source, m),
            MavMessage::RawImu(m) => self.raw_imu.emit(source, m),
            MavMessage::ScaledImu(m) => self.scaled_imu.emit(source, m),
            MavMessage::FileTransferProtocol(m) => self.file_transfer.emit(source, m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const SOURCE: Source = Source {
        system_id: 1,
        component_id: 1,
    };

    #[test]
    fn test_listeners_run_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.on_heartbeat(move |_, _| order.lock().unwrap().push(tag));
        }

        dispatcher.dispatch(&SOURCE, &MavMessage::Heartbeat(Heartbeat::ground_station()));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_dispatch_only_reaches_matching_type() {
        let dispatcher = Dispatcher::new();
        let acks = Arc::new(Mutex::new(0));
        let texts = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&acks);
        dispatcher.on_command_ack(move |_, _| *counter.lock().unwrap() += 1);
        let counter = Arc::clone(&texts);
        dispatcher.on_status_text(move |_, _| *counter.lock().unwrap() += 1);

        dispatcher.dispatch(
            &SOURCE,
            &MavMessage::CommandAck(CommandAck::new(241, MavResult::Accepted)),
        );

        assert_eq!(*acks.lock().unwrap(), 1);
        assert_eq!(*texts.lock().unwrap(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&hits);
        let id = dispatcher.on_status_text(move |_, _| *counter.lock().unwrap() += 1);

        let message = MavMessage::StatusText(StatusText::new(MavSeverity::Info, "hello"));
        dispatcher.dispatch(&SOURCE, &message);
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        dispatcher.dispatch(&SOURCE, &message);

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let dispatcher = Arc::new(Dispatcher::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&dispatcher);
        let own = Arc::clone(&slot);
        let id = dispatcher.on_heartbeat(move |_, _| {
            if let Some(id) = own.lock().unwrap().take() {
                inner.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        dispatcher.dispatch(&SOURCE, &MavMessage::Heartbeat(Heartbeat::ground_station()));
        assert!(dispatcher.heartbeat.is_empty());
    }

    #[test]
    fn test_source_is_passed_through() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&seen);
        dispatcher.on_rc_channels(move |source, rc| {
            *slot.lock().unwrap() = Some((*source, rc.chancount));
        });

        let rc = RcChannels {
            time_boot_ms: 0,
            channels: [1500; RC_CHANNEL_COUNT],
            chancount: 16,
            rssi: 0,
        };
        let source = Source {
            system_id: 7,
            component_id: 9,
        };
        dispatcher.dispatch(&source, &MavMessage::RcChannels(rc));

        assert_eq!(*seen.lock().unwrap(), Some((source, 16)));
    }
}
