//! Transport facade
//!
//! [`BlueTransport`] is the one object the application talks to. It wraps a
//! [`SerialDevice`] with the required/optional write policy and a retry
//! timer, and forwards link events to channel subscribers.

use crate::domain::events::{EventHub, LinkEvent, LinkListener, TransportEvent};
use crate::domain::link::SerialDevice;
use crate::domain::settings::Settings;
use crate::domain::state::ConnectionState;
use crate::domain::write_queue::{WriteDisposition, WriteQueue};
use crate::error::{Result, TransportError};
use crate::infrastructure::retry_timer::{RetryTimer, TimerHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Configuration for the transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Delay between retries of a queued required write
    pub retry_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl TransportConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry_interval: settings.retry_interval(),
        }
    }
}

pub struct BlueTransport {
    inner: Arc<TransportInner>,
    _timer: RetryTimer,
}

struct TransportInner {
    device: Arc<dyn SerialDevice>,
    queue: Mutex<QueueSlot>,
    /// Bumped on every state change; a queue that saw an older value is stale.
    epoch: AtomicU64,
    timer: TimerHandle,
    events: EventHub,
}

#[derive(Default)]
struct QueueSlot {
    queue: WriteQueue,
    epoch: u64,
}

impl QueueSlot {
    fn reconcile(&mut self, epoch: u64) {
        if self.epoch != epoch {
            let cleared = self.queue.clear();
            if cleared > 0 {
                debug!("Queue emptied on state change ({} writes)", cleared);
            }
            self.epoch = epoch;
        }
    }
}

impl BlueTransport {
    /// Wrap `device`, subscribing to its events and starting the retry timer.
    pub fn new(device: Arc<dyn SerialDevice>, config: TransportConfig) -> Result<Self> {
        let timer = TimerHandle::new();
        let inner = Arc::new(TransportInner {
            device,
            queue: Mutex::new(QueueSlot::default()),
            epoch: AtomicU64::new(0),
            timer: timer.clone(),
            events: EventHub::new(),
        });

        inner.device.add_listener(Arc::new(TransportListener {
            inner: Arc::downgrade(&inner),
        }));

        let weak = Arc::downgrade(&inner);
        let retry = RetryTimer::start(timer, config.retry_interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_retry_tick();
            }
        })?;

        Ok(Self {
            inner,
            _timer: retry,
        })
    }

    /// Connect to the remote device by name.
    pub fn connect(&self, name: &str) {
        self.inner.device.connect(name);
    }

    /// Disconnect from the device, dropping any queued writes.
    pub fn disconnect(&self) {
        self.inner.device.disconnect();
        self.inner.timer.disarm();
        self.inner.lock_queue().queue.clear();
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.device.state()
    }

    /// True if the device is in a state where connection is possible.
    pub fn can_connect(&self) -> bool {
        self.inner.device.can_connect()
    }

    /// Description of the last failed connection attempt.
    pub fn error_message(&self) -> Option<String> {
        self.inner.device.error_message()
    }

    pub fn byte_available(&self) -> bool {
        self.inner.device.byte_available()
    }

    /// Next received byte. Check [`byte_available`](Self::byte_available) first.
    pub fn get_byte(&self) -> Result<u8> {
        self.inner
            .device
            .get_byte()
            .ok_or(TransportError::NoInputAvailable)
    }

    /// Every received byte not yet read.
    pub fn read_available(&self) -> Vec<u8> {
        self.inner.device.read_available()
    }

    /// Write a payload to the device.
    ///
    /// Nothing happens unless the link is connected. `required` payloads are
    /// retried in order until they go through; optional ones are dropped if
    /// the link refuses them or required ones are already waiting. The
    /// caller is not told which of these happened.
    pub fn write(&self, payload: impl AsRef<[u8]>, required: bool) {
        self.inner.submit(payload.as_ref().to_vec(), required);
    }

    pub fn write_str(&self, data: &str, required: bool) {
        self.write(data.as_bytes(), required);
    }

    /// Number of required writes waiting for a retry.
    pub fn pending_writes(&self) -> usize {
        let mut slot = self.inner.lock_queue();
        slot.reconcile(self.inner.epoch.load(Ordering::SeqCst));
        slot.queue.len()
    }

    /// Receive state changes and input notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}

impl TransportInner {
    fn lock_queue(&self) -> MutexGuard<'_, QueueSlot> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, payload: Vec<u8>, required: bool) {
        let mut slot = self.lock_queue();
        let epoch = self.epoch.load(Ordering::SeqCst);
        slot.reconcile(epoch);

        let connected = self.device.state().is_connected();
        let disposition = slot
            .queue
            .submit(payload, required, connected, |data| self.device.write_bytes(data));

        let now = self.epoch.load(Ordering::SeqCst);
        if now != epoch {
            // The link changed state while we were writing.
            slot.reconcile(now);
            return;
        }
        if disposition == WriteDisposition::Queued {
            self.timer.arm();
        }
    }

    fn on_retry_tick(&self) {
        let mut slot = self.lock_queue();
        let epoch = self.epoch.load(Ordering::SeqCst);
        slot.reconcile(epoch);

        let connected = self.device.state().is_connected();
        let outcome = slot
            .queue
            .tick(connected, |data| self.device.write_bytes(data));
        trace!("Retry tick: {:?}", outcome);

        let now = self.epoch.load(Ordering::SeqCst);
        if now != epoch {
            slot.reconcile(now);
            return;
        }
        if outcome.needs_retry() {
            self.timer.arm();
        }
    }

    fn on_state_change(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.timer.disarm();
        // A writer holding the queue reconciles as soon as its write returns.
        if let Ok(mut slot) = self.queue.try_lock() {
            slot.reconcile(epoch);
        }
    }
}

struct TransportListener {
    inner: Weak<TransportInner>,
}

impl LinkListener for TransportListener {
    fn on_link_event(&self, event: LinkEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if let LinkEvent::StateChange(_) = event {
            inner.on_state_change();
        }
        inner.events.publish(event);
    }
}
