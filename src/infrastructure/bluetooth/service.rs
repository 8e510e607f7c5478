//! Bluetooth Service Module
//!
//! WinRT implementation of [`GattBackend`], coordinating the advertisement
//! scanner and the open GATT link.

use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::backend::{
    DeviceEvents, DiscoveredPeer, GattBackend, ScanError, SetupError, WriteError,
};
use crate::infrastructure::bluetooth::connection::{self, OpenLink};
use crate::infrastructure::bluetooth::protocol::{GattProfile, ProtocolError};
use crate::infrastructure::bluetooth::scanner::BleScanner;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

/// Windows Bluetooth LE backend
pub struct WinRtBackend {
    profile: GattProfile,
    scan_timeout: Duration,
    scanner: Mutex<BleScanner>,
    link: Mutex<Option<OpenLink>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WinRtBackend {
    pub fn new(profile: GattProfile, scan_timeout: Duration) -> Self {
        Self {
            profile,
            scan_timeout,
            scanner: Mutex::new(BleScanner::new()),
            link: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            GattProfile::from_settings(settings)?,
            settings.scan_timeout(),
        ))
    }
}

impl GattBackend for WinRtBackend {
    fn start_scan(&self, target: &str, events: DeviceEvents) -> Result<(), ScanError> {
        lock(&self.scanner)
            .start(target, self.scan_timeout, events)
            .map_err(|e| ScanError::Platform(e.message()))
    }

    fn stop_scan(&self) {
        lock(&self.scanner).stop();
    }

    fn open(&self, peer: &DiscoveredPeer, events: DeviceEvents) -> Result<(), SetupError> {
        let link = connection::open_link(peer.address, &self.profile, events)?;
        if let Some(previous) = lock(&self.link).replace(link) {
            previous.close();
        }
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        match lock(&self.link).as_ref() {
            Some(link) => link.write(data),
            None => Err(WriteError::NotOpen),
        }
    }

    fn release(&self) {
        let link = lock(&self.link).take();
        if let Some(link) = link {
            link.close();
            info!("Disconnected from device");
        }
    }
}
