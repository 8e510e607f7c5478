//! Serial-over-BLE profile
//!
//! The slider controller exposes the Nordic UART Service: one characteristic
//! the host writes to (TX) and one the device notifies on (RX).

use crate::domain::settings::Settings;
use thiserror::Error;

/// Nordic UART Service UUID
pub const SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

/// TX Characteristic UUID - host writes commands here
pub const TX_CHAR_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// RX Characteristic UUID - device notifies responses here
pub const RX_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Client Characteristic Configuration descriptor, written to enable notify on RX
pub const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid UUID format: {0}")]
    InvalidUuid(String),
}

/// Resolved UUIDs for one serial profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service: u128,
    pub tx: u128,
    pub rx: u128,
}

impl GattProfile {
    pub fn from_settings(settings: &Settings) -> Result<Self, ProtocolError> {
        Ok(Self {
            service: parse_uuid(&settings.service_uuid)?,
            tx: parse_uuid(&settings.tx_char_uuid)?,
            rx: parse_uuid(&settings.rx_char_uuid)?,
        })
    }
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: 0x6e400001_b5a3_f393_e0a9_e50e24dcca9e,
            tx: 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e,
            rx: 0x6e400003_b5a3_f393_e0a9_e50e24dcca9e,
        }
    }
}

/// Parse a hyphenated or plain 32-digit UUID string.
pub fn parse_uuid(uuid_str: &str) -> Result<u128, ProtocolError> {
    let hex = uuid_str.trim().replace('-', "");

    if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidUuid(uuid_str.to_string()));
    }

    u128::from_str_radix(&hex, 16).map_err(|_| ProtocolError::InvalidUuid(uuid_str.to_string()))
}
