//! Bluetooth Module
//!
//! Serial communication with the slider controller over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       BleDevice                          │
//! │   (connection state machine, input buffer, listeners)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ GattBackend
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────┐          ┌────────────────┐
//! │ WinRtBackend  │          │ LoopbackBackend│
//! │ - Scanner     │          │ - echo device  │
//! │ - Connection  │          │   in process   │
//! └───────────────┘          └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Serial profile UUIDs
//! - [`backend`] - Platform backend trait, callbacks and errors
//! - [`device`] - Connection state machine
//! - [`loopback`] - In-process echo peripheral
//! - `scanner`, `connection`, `service` - WinRT backend (Windows only)

pub mod backend;
pub mod device;
pub mod loopback;
pub mod protocol;

#[cfg(windows)]
pub mod connection;
#[cfg(windows)]
pub mod scanner;
#[cfg(windows)]
pub mod service;

pub use backend::{DeviceEvents, DiscoveredPeer, GattBackend, ScanError, SetupError, WriteError};
pub use device::BleDevice;
pub use loopback::LoopbackBackend;

#[cfg(windows)]
pub use service::WinRtBackend;
