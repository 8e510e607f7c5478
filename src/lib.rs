//! Serial-over-BLE transport for the camera slider controller.
//!
//! [`BlueTransport`] finds a named device, opens its serial service and
//! exposes it as a byte stream with buffered input and retried writes.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod transport;

pub use domain::events::TransportEvent;
pub use domain::link::SerialDevice;
pub use domain::state::ConnectionState;
pub use error::TransportError;
pub use infrastructure::bluetooth::{BleDevice, LoopbackBackend};
pub use transport::{BlueTransport, TransportConfig};
