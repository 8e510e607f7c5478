//! Platform BLE backend seam.
//!
//! A [`GattBackend`] performs the raw platform work: scanning, opening the
//! serial service, writing to TX and tearing everything down. It knows
//! nothing about connection states; it reports what the platform tells it
//! through a [`DeviceEvents`] handle and [`BleDevice`](super::BleDevice)
//! decides what that means.

use std::fmt;
use std::sync::Weak;
use thiserror::Error;

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub name: String,
    pub address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharRole {
    Tx,
    Rx,
}

impl fmt::Display for CharRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => f.write_str("TX"),
            Self::Rx => f.write_str("RX"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Bluetooth adapter not available: {0}")]
    AdapterUnavailable(String),

    #[error("Failed to start scan: {0}")]
    Platform(String),
}

/// Failure while turning a discovered peer into an open serial link.
/// The `Display` text is what the application sees as the error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("Device not available because the Bluetooth radio is not on")]
    RadioOff,

    #[error("Could not open device: {0}")]
    DeviceUnavailable(String),

    #[error("Can't find service: {0}")]
    ServiceNotFound(String),

    #[error("Error accessing service: {0}")]
    AccessDenied(String),

    #[error("Error getting {role} characteristic: {status}")]
    CharacteristicMissing { role: CharRole, status: String },

    #[error("Error setting RX notify: {0}")]
    NotifyRejected(String),

    #[error("Exception setting RX notify: {0}")]
    NotifyFailed(String),

    #[error("Setup failed: {0}")]
    Platform(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Refused this time (congestion, busy); may succeed later.
    #[error("Write failed: {0}")]
    Rejected(String),

    /// The characteristic claims to be writable but is not.
    #[error("Write not permitted: {0}")]
    NotPermitted(String),

    #[error("No TX characteristic")]
    NotOpen,

    /// The peripheral went away mid-write.
    #[error("Unexpected disconnection during write")]
    LinkLost,
}

/// Platform primitive under a [`BleDevice`](super::BleDevice).
///
/// All methods may block. None of them is ever called while the device
/// holds one of its own locks, so implementations are free to call back
/// into [`DeviceEvents`] synchronously.
pub trait GattBackend: Send + Sync + 'static {
    /// Begin scanning. Report every advertisement with
    /// [`DeviceEvents::peer_found`] and the end of the scan with
    /// [`DeviceEvents::scan_completed`].
    fn start_scan(&self, target: &str, events: DeviceEvents) -> Result<(), ScanError>;

    /// Stop an active scan. Must be harmless when no scan is running.
    fn stop_scan(&self);

    /// Open the device, locate the serial service and both
    /// characteristics, enable notifications on RX and subscribe to
    /// value changes and connection status.
    fn open(&self, peer: &DiscoveredPeer, events: DeviceEvents) -> Result<(), SetupError>;

    /// Write one buffer to TX and wait for the outcome.
    fn write(&self, data: &[u8]) -> Result<(), WriteError>;

    /// Unsubscribe and drop every native handle. Must be harmless when
    /// nothing is open.
    fn release(&self);
}

pub(crate) trait EventSink: Send + Sync {
    fn peer_found(&self, session: u64, peer: DiscoveredPeer);
    fn scan_completed(&self, session: u64);
    fn data_received(&self, session: u64, data: Vec<u8>);
    fn link_lost(&self, session: u64);
}

/// Callback handle given to a backend for one connection attempt.
///
/// Once the attempt is over (disconnect or a new connect) the handle goes
/// stale and its reports are ignored, so a backend may keep firing late
/// platform callbacks without harm.
#[derive(Clone)]
pub struct DeviceEvents {
    sink: Weak<dyn EventSink>,
    session: u64,
}

impl DeviceEvents {
    pub(crate) fn new(sink: Weak<dyn EventSink>, session: u64) -> Self {
        Self { sink, session }
    }

    pub fn peer_found(&self, peer: DiscoveredPeer) {
        if let Some(sink) = self.sink.upgrade() {
            sink.peer_found(self.session, peer);
        }
    }

    pub fn scan_completed(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.scan_completed(self.session);
        }
    }

    pub fn data_received(&self, data: Vec<u8>) {
        if let Some(sink) = self.sink.upgrade() {
            sink.data_received(self.session, data);
        }
    }

    pub fn link_lost(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.link_lost(self.session);
        }
    }
}

impl fmt::Debug for DeviceEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEvents")
            .field("session", &self.session)
            .finish()
    }
}
