//! In-process loopback peripheral.
//!
//! Behaves like a serial BLE device that echoes every write back as a
//! notification. Useful on hosts without a supported radio and for
//! exercising the transport end to end.

use crate::infrastructure::bluetooth::backend::{
    DeviceEvents, DiscoveredPeer, GattBackend, ScanError, SetupError, WriteError,
};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

pub struct LoopbackBackend {
    name: String,
    address: u64,
    state: Mutex<LoopbackState>,
}

#[derive(Default)]
struct LoopbackState {
    scanning: bool,
    link: Option<DeviceEvents>,
    /// Upcoming writes to refuse, simulating a congested link.
    refuse_writes: u32,
    written: Vec<Vec<u8>>,
}

impl LoopbackBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: 0x00C0_FFEE_0001,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `count` writes.
    pub fn refuse_writes(&self, count: u32) {
        self.lock().refuse_writes = count;
    }

    /// Every payload the peripheral accepted, oldest first.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn is_open(&self) -> bool {
        self.lock().link.is_some()
    }

    /// Push unsolicited data from the peripheral.
    pub fn inject(&self, data: &[u8]) {
        let link = self.lock().link.clone();
        if let Some(link) = link {
            link.data_received(data.to_vec());
        }
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self) {
        let link = self.lock().link.take();
        if let Some(link) = link {
            info!("Loopback peripheral dropped the link");
            link.link_lost();
        }
    }
}

impl GattBackend for LoopbackBackend {
    fn start_scan(&self, target: &str, events: DeviceEvents) -> Result<(), ScanError> {
        self.lock().scanning = true;
        debug!("Loopback scan for {:?}", target);

        if target == self.name {
            events.peer_found(DiscoveredPeer {
                name: self.name.clone(),
                address: self.address,
            });
        } else {
            events.scan_completed();
        }
        Ok(())
    }

    fn stop_scan(&self) {
        self.lock().scanning = false;
    }

    fn open(&self, peer: &DiscoveredPeer, events: DeviceEvents) -> Result<(), SetupError> {
        if peer.address != self.address {
            return Err(SetupError::DeviceUnavailable(format!("{:#X}", peer.address)));
        }
        self.lock().link = Some(events);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        let link = {
            let mut state = self.lock();
            let Some(link) = state.link.clone() else {
                return Err(WriteError::NotOpen);
            };
            if state.refuse_writes > 0 {
                state.refuse_writes -= 1;
                return Err(WriteError::Rejected("Congested".into()));
            }
            state.written.push(data.to_vec());
            link
        };
        link.data_received(data.to_vec());
        Ok(())
    }

    fn release(&self) {
        self.lock().link = None;
    }
}
