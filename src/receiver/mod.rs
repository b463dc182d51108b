//! The prefix receiver capability set (spec §4.B, §9 "dynamic dispatch
//! across receiver variants"). Modeled as tagged variants rather than a
//! trait object — `start`/`stop`/`events`/`current_prefix`/`source` are a
//! fixed capability set, and every concrete receiver is async internally,
//! so an enum dispatching to inherent methods is simpler than an
//! object-safe async trait.

pub mod composite;
pub mod dhcpv6;
pub mod factory;
pub mod ra;
pub mod registry;

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ReceiverError;
use crate::prefix::{Prefix, ReceiverEvent, SourceTag};

/// Bounded event buffer size. Spec requires "a bounded buffer of >= 10
/// events"; producers never block on send, so overflow silently drops the
/// oldest-pending send rather than the receiver's most recent state.
pub const EVENT_BUFFER: usize = 16;

/// Shared, thread-safe event channel used by every receiver variant. Send
/// is always non-blocking — `try_send` drops the event on a full buffer
/// instead of blocking the producer, per spec's event-channel drop policy.
pub struct EventChannel {
    tx: mpsc::Sender<ReceiverEvent>,
    rx: Mutex<mpsc::Receiver<ReceiverEvent>>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender(self.tx.clone())
    }

    /// Drains every event currently buffered without blocking. Consumers
    /// must re-read `current_prefix()` after waking, since events may have
    /// been dropped on overflow before this call.
    pub fn poll(&self) -> Vec<ReceiverEvent> {
        let mut rx = self.rx.lock().expect("event channel mutex poisoned");
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct EventSender(mpsc::Sender<ReceiverEvent>);

impl EventSender {
    pub fn send(&self, event: ReceiverEvent) {
        if self.0.try_send(event).is_err() {
            tracing::debug!("receiver event buffer full, dropping event");
        }
    }
}

/// Holds the authoritative "latest prefix" value behind a read-write lock,
/// shared between a receiver's background task and any thread calling
/// `current_prefix()`.
#[derive(Default)]
pub struct CurrentPrefix(RwLock<Option<Prefix>>);

impl CurrentPrefix {
    pub fn get(&self) -> Option<Prefix> {
        self.0.read().expect("current prefix lock poisoned").clone()
    }

    pub fn set(&self, prefix: Option<Prefix>) {
        *self.0.write().expect("current prefix lock poisoned") = prefix;
    }
}

/// A receiver variant, dispatched by tag. All variants are `Send + Sync`
/// and may be queried from any thread at any time.
pub enum Receiver {
    Ra(ra::RaReceiver),
    Dhcpv6Pd(dhcpv6::Dhcpv6PdReceiver),
    Composite(Box<composite::CompositeReceiver>),
    Mock(Arc<MockReceiver>),
}

impl Receiver {
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ReceiverError> {
        match self {
            Receiver::Ra(r) => r.start(cancel).await,
            Receiver::Dhcpv6Pd(r) => r.start(cancel).await,
            Receiver::Composite(r) => r.start(cancel).await,
            Receiver::Mock(r) => r.start(cancel).await,
        }
    }

    pub async fn stop(&self) -> Result<(), ReceiverError> {
        match self {
            Receiver::Ra(r) => r.stop().await,
            Receiver::Dhcpv6Pd(r) => r.stop().await,
            Receiver::Composite(r) => r.stop().await,
            Receiver::Mock(r) => r.stop().await,
        }
    }

    /// Drains pending events without blocking.
    pub fn events(&self) -> Vec<ReceiverEvent> {
        match self {
            Receiver::Ra(r) => r.events(),
            Receiver::Dhcpv6Pd(r) => r.events(),
            Receiver::Composite(r) => r.events(),
            Receiver::Mock(r) => r.events(),
        }
    }

    pub fn current_prefix(&self) -> Option<Prefix> {
        match self {
            Receiver::Ra(r) => r.current_prefix(),
            Receiver::Dhcpv6Pd(r) => r.current_prefix(),
            Receiver::Composite(r) => r.current_prefix(),
            Receiver::Mock(r) => r.current_prefix(),
        }
    }

    pub fn source(&self) -> SourceTag {
        match self {
            Receiver::Ra(r) => r.source(),
            Receiver::Dhcpv6Pd(r) => r.source(),
            Receiver::Composite(r) => r.source(),
            Receiver::Mock(r) => r.source(),
        }
    }
}

/// A test/fixture receiver whose prefix is set directly by the caller,
/// with no network I/O. Used by controller unit tests and by anything
/// exercising the reconcile loop without real sockets.
pub struct MockReceiver {
    current: CurrentPrefix,
    events: EventChannel,
    source: RwLock<SourceTag>,
    running: std::sync::atomic::AtomicBool,
}

impl MockReceiver {
    pub fn new(source: SourceTag) -> Arc<Self> {
        Arc::new(Self {
            current: CurrentPrefix::default(),
            events: EventChannel::new(),
            source: RwLock::new(source),
            running: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Test hook: push a new prefix through the same classify-and-emit
    /// path a real receiver uses.
    pub fn push(&self, prefix: Prefix) {
        let previous = self.current.get();
        let event = crate::prefix::classify_update(previous.as_ref(), prefix.clone());
        self.current.set(Some(prefix));
        self.events.sender().send(event);
    }

    pub fn push_failed(&self, message: impl Into<String>) {
        self.events.sender().send(ReceiverEvent::Failed(message.into()));
    }

    pub fn push_expired(&self) {
        self.current.set(None);
        self.events.sender().send(ReceiverEvent::Expired);
    }

    pub async fn start(&self, _cancel: CancellationToken) -> Result<(), ReceiverError> {
        self.running.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ReceiverError> {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub fn events(&self) -> Vec<ReceiverEvent> {
        self.events.poll()
    }

    pub fn current_prefix(&self) -> Option<Prefix> {
        self.current.get()
    }

    pub fn source(&self) -> SourceTag {
        *self.source.read().expect("mock source lock poisoned")
    }
}
