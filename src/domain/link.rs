//! The serial device capability the transport is built on.

use crate::domain::events::LinkListener;
use crate::domain::state::ConnectionState;
use std::sync::Arc;

/// A byte-stream link to one remote device, found and opened by name.
///
/// `connect` and `disconnect` return immediately; progress is reported
/// through state-change events to registered listeners.
pub trait SerialDevice: Send + Sync {
    /// Start looking for the named device and connect to it.
    fn connect(&self, name: &str);

    /// Tear down the connection and release native resources.
    /// Does nothing if a connection attempt could already be started.
    fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn can_connect(&self) -> bool {
        self.state().can_connect()
    }

    /// Description of the last failed connection attempt.
    fn error_message(&self) -> Option<String>;

    fn byte_available(&self) -> bool;

    /// Next received byte, or `None` if nothing is buffered.
    fn get_byte(&self) -> Option<u8>;

    /// Every buffered byte at once.
    fn read_available(&self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(byte) = self.get_byte() {
            out.push(byte);
        }
        out
    }

    /// Write one buffer, blocking until the link confirms or refuses it.
    fn write_bytes(&self, data: &[u8]) -> bool;

    fn write_str(&self, data: &str) -> bool {
        self.write_bytes(data.as_bytes())
    }

    fn add_listener(&self, listener: Arc<dyn LinkListener>);
}
