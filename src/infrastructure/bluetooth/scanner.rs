//! BLE Scanner Module
//!
//! Watches BLE advertisements for a device with the target local name.

use crate::infrastructure::bluetooth::backend::{DeviceEvents, DiscoveredPeer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use windows::core::Result;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

/// Advertisement watcher for one connection attempt at a time.
pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    /// Set when the current scan ends so its timeout does not fire late.
    finished: Arc<AtomicBool>,
}

impl BleScanner {
    pub fn new() -> Self {
        Self {
            watcher: None,
            finished: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start scanning for `target`, reporting the scan as complete after
    /// `timeout` if the device has not been seen.
    pub fn start(&mut self, target: &str, timeout: Duration, events: DeviceEvents) -> Result<()> {
        // Stop any existing scan
        self.stop();

        info!("Starting BLE scan for {:?}", target);

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let finished = Arc::new(AtomicBool::new(false));
        let target_name = target.to_string();
        let reported = Arc::new(AtomicBool::new(false));
        let found_events = events.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    if name != target_name || reported.swap(true, Ordering::SeqCst) {
                        return Ok(());
                    }
                    let address = args.BluetoothAddress()?;
                    debug!("Advertisement from {:?} ({:#X})", name, address);

                    // Setup blocks on GATT calls; keep it off the watcher's callback thread.
                    let events = found_events.clone();
                    std::thread::spawn(move || events.peer_found(DiscoveredPeer { name, address }));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);
        self.finished = finished.clone();

        std::thread::spawn(move || {
            std::thread::sleep(timeout);
            if !finished.swap(true, Ordering::SeqCst) {
                events.scan_completed();
            }
        });

        Ok(())
    }

    /// Stop scanning
    pub fn stop(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            let _ = watcher.Stop();
        }
    }
}

impl Default for BleScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.stop();
    }
}
