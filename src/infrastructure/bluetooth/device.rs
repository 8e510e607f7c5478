//! Connection state machine.
//!
//! [`BleDevice`] drives a [`GattBackend`] through the connection lifecycle
//! and turns its platform callbacks into state transitions, buffered input
//! and listener notifications.

use crate::domain::events::{LinkEvent, LinkListener};
use crate::domain::input_buffer::InputBuffer;
use crate::domain::link::SerialDevice;
use crate::domain::state::ConnectionState;
use crate::infrastructure::bluetooth::backend::{
    DeviceEvents, DiscoveredPeer, EventSink, GattBackend, WriteError,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, trace, warn};

/// Serial link to one named BLE device.
pub struct BleDevice<B: GattBackend> {
    shared: Arc<Shared<B>>,
}

struct Shared<B> {
    backend: B,
    core: Mutex<Core>,
    input: Mutex<InputBuffer>,
    listeners: Mutex<Vec<Arc<dyn LinkListener>>>,
    /// Held while state changes are published so listeners see them in order.
    emit: Mutex<()>,
    self_ref: Weak<Shared<B>>,
}

#[derive(Default)]
struct Core {
    state: ConnectionState,
    target: Option<String>,
    error: Option<String>,
    peer: Option<DiscoveredPeer>,
    /// Bumped on every connect and disconnect; stale callbacks carry an old value.
    session: u64,
    /// Releases in progress. A connect made meanwhile waits for them.
    teardowns: u32,
    deferred_scan: Option<(u64, String)>,
    changes: Vec<ConnectionState>,
}

impl Core {
    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.changes.push(state);
        }
    }

    /// Finish one release, returning a scan that was waiting for it.
    fn end_teardown(&mut self) -> Option<(u64, String)> {
        self.teardowns = self.teardowns.saturating_sub(1);
        if self.teardowns > 0 {
            return None;
        }
        let (session, target) = self.deferred_scan.take()?;
        (self.session == session && self.state == ConnectionState::Searching)
            .then_some((session, target))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: GattBackend> BleDevice<B> {
    pub fn new(backend: B) -> Self {
        let shared = Arc::new_cyclic(|self_ref| Shared {
            backend,
            core: Mutex::new(Core::default()),
            input: Mutex::new(InputBuffer::new()),
            listeners: Mutex::new(Vec::new()),
            emit: Mutex::new(()),
            self_ref: self_ref.clone(),
        });
        Self { shared }
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Name given to the most recent `connect`.
    pub fn target(&self) -> Option<String> {
        lock(&self.shared.core).target.clone()
    }
}

impl<B: GattBackend> SerialDevice for BleDevice<B> {
    fn connect(&self, name: &str) {
        let shared = &self.shared;
        let started = shared.update(|core| {
            if !core.state.can_connect() {
                return Err(core.state);
            }
            core.session += 1;
            core.target = Some(name.to_string());
            core.error = None;
            core.peer = None;
            core.set_state(ConnectionState::Searching);
            if core.teardowns > 0 {
                core.deferred_scan = Some((core.session, name.to_string()));
                return Ok(None);
            }
            Ok(Some(core.session))
        });

        match started {
            Ok(Some(session)) => shared.start_scan(session, name),
            Ok(None) => debug!("Scan for {:?} waits for the previous link to be released", name),
            Err(state) => warn!("Connect to {:?} ignored while {}", name, state),
        }
    }

    fn disconnect(&self) {
        self.shared.disconnect();
    }

    fn state(&self) -> ConnectionState {
        lock(&self.shared.core).state
    }

    fn error_message(&self) -> Option<String> {
        lock(&self.shared.core).error.clone()
    }

    fn byte_available(&self) -> bool {
        lock(&self.shared.input).byte_available()
    }

    fn get_byte(&self) -> Option<u8> {
        lock(&self.shared.input).next_byte()
    }

    fn read_available(&self) -> Vec<u8> {
        lock(&self.shared.input).drain()
    }

    fn write_bytes(&self, data: &[u8]) -> bool {
        let shared = &self.shared;
        if !lock(&shared.core).state.is_connected() {
            return false;
        }

        match shared.backend.write(data) {
            Ok(()) => true,
            Err(WriteError::LinkLost) => {
                error!("Unexpected disconnection during write");
                shared.disconnect();
                false
            }
            Err(e) => {
                debug!("{}", e);
                false
            }
        }
    }

    fn add_listener(&self, listener: Arc<dyn LinkListener>) {
        lock(&self.shared.listeners).push(listener);
    }
}

impl<B: GattBackend> Drop for BleDevice<B> {
    fn drop(&mut self) {
        // No listeners are told; the last owner may be one of them.
        let active = {
            let mut core = lock(&self.shared.core);
            core.session += 1;
            !core.state.can_connect()
        };
        if active {
            self.shared.backend.stop_scan();
            self.shared.backend.release();
        }
    }
}

impl<B: GattBackend> Shared<B> {
    fn events(&self, session: u64) -> DeviceEvents {
        let sink: Weak<dyn EventSink> = self.self_ref.clone();
        DeviceEvents::new(sink, session)
    }

    fn start_scan(&self, session: u64, target: &str) {
        info!("Searching for device {:?}", target);
        if let Err(e) = self.backend.start_scan(target, self.events(session)) {
            error!("Failed to start scan: {}", e);
            self.fail(session, e.to_string());
        }
    }

    fn end_teardown(&self, session: u64) {
        let resume = self.update(|core| {
            if core.session == session {
                core.set_state(ConnectionState::Disconnected);
            }
            core.end_teardown()
        });
        if let Some((session, target)) = resume {
            self.start_scan(session, &target);
        }
    }

    /// Mutate the core under its lock, then publish any state changes it
    /// recorded once the lock is released.
    fn update<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let _order = lock(&self.emit);
        let (result, changes) = {
            let mut core = lock(&self.core);
            let result = f(&mut *core);
            (result, std::mem::take(&mut core.changes))
        };
        for state in changes {
            info!("State change: {}", state);
            self.notify(LinkEvent::StateChange(state));
        }
        result
    }

    fn notify(&self, event: LinkEvent) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_link_event(event);
        }
    }

    /// Record why the attempt failed and tear it down.
    fn fail(&self, session: u64, message: String) {
        let current = self.update(|core| {
            if core.session != session {
                return false;
            }
            core.error = Some(message);
            true
        });
        if current {
            self.disconnect();
        }
    }

    fn disconnect(&self) {
        let session = self.update(|core| {
            if core.state.can_connect() {
                return None;
            }
            core.session += 1;
            core.teardowns += 1;
            Some(core.session)
        });
        let Some(session) = session else {
            return;
        };

        self.backend.stop_scan();
        self.update(|core| {
            if core.session == session {
                core.peer = None;
                core.set_state(ConnectionState::Disconnecting);
            }
        });

        self.backend.release();
        self.end_teardown(session);
    }
}

impl<B: GattBackend> EventSink for Shared<B> {
    fn peer_found(&self, session: u64, peer: DiscoveredPeer) {
        let accepted = self.update(|core| {
            let wanted = core.session == session
                && core.state == ConnectionState::Searching
                && core.peer.is_none()
                && core.target.as_deref() == Some(peer.name.as_str());
            if wanted {
                core.peer = Some(peer.clone());
            }
            wanted
        });
        if !accepted {
            trace!("Ignoring advertisement from {:?}", peer.name);
            return;
        }

        info!("Found device {:?} ({:#X})", peer.name, peer.address);
        self.backend.stop_scan();

        let proceed = self.update(|core| {
            if core.session != session {
                return false;
            }
            core.set_state(ConnectionState::Found);
            core.set_state(ConnectionState::Connecting);
            true
        });
        if !proceed {
            return;
        }

        match self.backend.open(&peer, self.events(session)) {
            Ok(()) => {
                let outcome = self.update(|core| {
                    if core.session == session && core.state == ConnectionState::Connecting {
                        core.set_state(ConnectionState::Connected);
                        return Ok(());
                    }
                    let idle = core.state.can_connect();
                    if idle {
                        core.teardowns += 1;
                    }
                    Err(idle)
                });
                match outcome {
                    Ok(()) => info!("Connected to {:?}", peer.name),
                    Err(idle) => {
                        debug!("Setup finished after the attempt was abandoned");
                        if idle {
                            self.backend.release();
                            self.end_teardown(session);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Setup of {:?} failed: {}", peer.name, e);
                self.fail(session, e.to_string());
            }
        }
    }

    fn scan_completed(&self, session: u64) {
        let unmatched = |core: &Core| {
            core.session == session
                && core.state == ConnectionState::Searching
                && core.peer.is_none()
        };
        if !unmatched(&*lock(&self.core)) {
            return;
        }

        self.backend.stop_scan();
        self.update(|core| {
            if unmatched(core) {
                info!("Scan finished without finding {:?}", core.target);
                core.set_state(ConnectionState::NotFound);
            }
        });
    }

    fn data_received(&self, session: u64, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        let _order = lock(&self.emit);
        if lock(&self.core).session != session {
            trace!("Dropping {} bytes from a previous connection", data.len());
            return;
        }
        trace!("Received {} bytes", data.len());
        lock(&self.input).push(data);
        self.notify(LinkEvent::InputAvailable);
    }

    fn link_lost(&self, session: u64) {
        let connected = {
            let core = lock(&self.core);
            core.session == session && core.state == ConnectionState::Connected
        };
        if connected {
            warn!("Device connection lost");
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::backend::{ScanError, SetupError};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that finds the device on the first scan result and opens it,
    /// unless told to fail setup.
    #[derive(Default)]
    struct InstantBackend {
        fail_setup: AtomicBool,
        released: AtomicBool,
    }

    impl GattBackend for InstantBackend {
        fn start_scan(&self, target: &str, events: DeviceEvents) -> Result<(), ScanError> {
            events.peer_found(DiscoveredPeer {
                name: target.to_string(),
                address: 0xAB,
            });
            Ok(())
        }

        fn stop_scan(&self) {}

        fn open(&self, _peer: &DiscoveredPeer, _events: DeviceEvents) -> Result<(), SetupError> {
            if self.fail_setup.load(Ordering::SeqCst) {
                Err(SetupError::ServiceNotFound("Unreachable".into()))
            } else {
                Ok(())
            }
        }

        fn write(&self, _data: &[u8]) -> Result<(), WriteError> {
            Ok(())
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_connect_reaches_connected() {
        let device = BleDevice::new(InstantBackend::default());
        device.connect("Slider1");
        assert_eq!(device.state(), ConnectionState::Connected);
        assert_eq!(device.target().as_deref(), Some("Slider1"));
        assert!(device.error_message().is_none());
    }

    #[test]
    fn test_setup_failure_records_message_and_disconnects() {
        let backend = InstantBackend::default();
        backend.fail_setup.store(true, Ordering::SeqCst);
        let device = BleDevice::new(backend);

        device.connect("Slider1");

        assert_eq!(device.state(), ConnectionState::Disconnected);
        assert_eq!(
            device.error_message().as_deref(),
            Some("Can't find service: Unreachable")
        );
        assert!(device.backend().released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_connect_clears_previous_error() {
        let backend = InstantBackend::default();
        backend.fail_setup.store(true, Ordering::SeqCst);
        let device = BleDevice::new(backend);
        device.connect("Slider1");
        assert!(device.error_message().is_some());

        device.backend().fail_setup.store(false, Ordering::SeqCst);
        device.connect("Slider1");
        assert!(device.error_message().is_none());
        assert_eq!(device.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_write_refused_when_not_connected() {
        let device = BleDevice::new(InstantBackend::default());
        assert!(!device.write_str("A"));
    }
}
