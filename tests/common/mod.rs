//! Scripted GATT backend and helpers shared by the integration tests.

#![allow(dead_code)]

use ble_serial::domain::events::{LinkEvent, LinkListener};
use ble_serial::infrastructure::bluetooth::backend::{
    DeviceEvents, DiscoveredPeer, GattBackend, ScanError, SetupError, WriteError,
};
use ble_serial::ConnectionState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How a scan behaves once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanScript {
    /// Report the target as the first advertisement.
    Match,
    /// Finish without seeing anything.
    Empty,
    /// Wait for the test to call `advertise` or `finish_scan`.
    Manual,
}

type Hook = Box<dyn FnOnce() + Send>;

pub struct ScriptedBackend {
    state: Mutex<Script>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
}

/// Holds writes inside the backend until the test lets them go.
#[derive(Default)]
struct Gate {
    closed: bool,
    waiting: usize,
}

struct Script {
    scan: ScanScript,
    setup: Result<(), SetupError>,
    /// Outcomes for upcoming writes; writes succeed once it runs dry.
    write_results: VecDeque<Result<(), WriteError>>,
    attempts: Vec<Vec<u8>>,
    delivered: Vec<Vec<u8>>,
    scan_events: Option<DeviceEvents>,
    link: Option<DeviceEvents>,
    scans: usize,
    releases: usize,
    on_stop_scan: Option<Hook>,
    on_release: Option<Hook>,
}

impl ScriptedBackend {
    pub fn new(scan: ScanScript) -> Self {
        Self {
            state: Mutex::new(Script {
                scan,
                setup: Ok(()),
                write_results: VecDeque::new(),
                attempts: Vec::new(),
                delivered: Vec::new(),
                scan_events: None,
                link: None,
                scans: 0,
                releases: 0,
                on_stop_scan: None,
                on_release: None,
            }),
            gate: Mutex::new(Gate::default()),
            gate_changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.state.lock().unwrap()
    }

    pub fn fail_setup(&self, error: SetupError) {
        self.lock().setup = Err(error);
    }

    pub fn succeed_setup(&self) {
        self.lock().setup = Ok(());
    }

    pub fn script_writes(&self, results: impl IntoIterator<Item = Result<(), WriteError>>) {
        self.lock().write_results.extend(results);
    }

    pub fn refuse_writes(&self, count: usize) {
        self.script_writes((0..count).map(|_| Err(WriteError::Rejected("busy".to_string()))));
    }

    pub fn accept_writes(&self) {
        self.lock().write_results.clear();
    }

    /// Run `hook` inside the next `stop_scan`.
    pub fn on_next_stop_scan(&self, hook: impl FnOnce() + Send + 'static) {
        self.lock().on_stop_scan = Some(Box::new(hook));
    }

    /// Run `hook` inside the next `release`, before the link is dropped.
    pub fn on_next_release(&self, hook: impl FnOnce() + Send + 'static) {
        self.lock().on_release = Some(Box::new(hook));
    }

    /// Block every write after its outcome is decided, until `release_writes`.
    pub fn hold_writes(&self) {
        self.gate.lock().unwrap().closed = true;
    }

    pub fn release_writes(&self) {
        self.gate.lock().unwrap().closed = false;
        self.gate_changed.notify_all();
    }

    /// Writes currently blocked by `hold_writes`.
    pub fn writes_waiting(&self) -> usize {
        self.gate.lock().unwrap().waiting
    }

    fn pass_gate(&self) {
        let mut gate = self.gate.lock().unwrap();
        gate.waiting += 1;
        while gate.closed {
            gate = self.gate_changed.wait(gate).unwrap();
        }
        gate.waiting -= 1;
    }

    pub fn attempts(&self) -> Vec<Vec<u8>> {
        self.lock().attempts.clone()
    }

    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.lock().delivered.clone()
    }

    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    /// Events handle of the currently open link.
    pub fn link_events(&self) -> Option<DeviceEvents> {
        self.lock().link.clone()
    }

    pub fn scan_events(&self) -> Option<DeviceEvents> {
        self.lock().scan_events.clone()
    }

    pub fn advertise(&self, name: &str) {
        if let Some(events) = self.scan_events() {
            events.peer_found(DiscoveredPeer {
                name: name.to_string(),
                address: 0x1234,
            });
        }
    }

    pub fn finish_scan(&self) {
        if let Some(events) = self.scan_events() {
            events.scan_completed();
        }
    }

    pub fn push_data(&self, data: &[u8]) {
        if let Some(events) = self.link_events() {
            events.data_received(data.to_vec());
        }
    }

    pub fn lose_link(&self) {
        if let Some(events) = self.link_events() {
            events.link_lost();
        }
    }
}

impl GattBackend for ScriptedBackend {
    fn start_scan(&self, target: &str, events: DeviceEvents) -> Result<(), ScanError> {
        let scan = {
            let mut state = self.lock();
            state.scans += 1;
            state.scan_events = Some(events.clone());
            state.scan
        };
        match scan {
            ScanScript::Match => events.peer_found(DiscoveredPeer {
                name: target.to_string(),
                address: 0x1234,
            }),
            ScanScript::Empty => events.scan_completed(),
            ScanScript::Manual => {}
        }
        Ok(())
    }

    fn stop_scan(&self) {
        let hook = self.lock().on_stop_scan.take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn open(&self, _peer: &DiscoveredPeer, events: DeviceEvents) -> Result<(), SetupError> {
        let mut state = self.lock();
        state.setup.clone()?;
        state.link = Some(events);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        let result = {
            let mut state = self.lock();
            if state.link.is_none() {
                return Err(WriteError::NotOpen);
            }
            state.attempts.push(data.to_vec());
            let result = state.write_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                state.delivered.push(data.to_vec());
            }
            result
        };
        self.pass_gate();
        result
    }

    fn release(&self) {
        let hook = self.lock().on_release.take();
        if let Some(hook) = hook {
            hook();
        }
        let mut state = self.lock();
        state.releases += 1;
        state.link = None;
        state.scan_events = None;
    }
}

/// Listener recording every event it sees.
#[derive(Default)]
pub struct Recorder {
    states: Mutex<Vec<ConnectionState>>,
    inputs: AtomicUsize,
}

impl Recorder {
    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.states.lock().unwrap().clear();
        self.inputs.store(0, Ordering::SeqCst);
    }

    pub fn inputs(&self) -> usize {
        self.inputs.load(Ordering::SeqCst)
    }
}

impl LinkListener for Recorder {
    fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::StateChange(state) => self.states.lock().unwrap().push(state),
            LinkEvent::InputAvailable => {
                self.inputs.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
