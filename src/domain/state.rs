//! Connection lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the serial BLE connection.
///
/// ```text
/// Disconnected ─connect─▶ Searching ─match─▶ Found ─▶ Connecting ─▶ Connected
///      ▲                      │                           │             │
///      │                      └─scan done─▶ NotFound      └──failure────┤
///      └──────────── Disconnecting ◀──────── disconnect ◀───────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Searching,
    Found,
    NotFound,
}

impl ConnectionState {
    /// Every state, in declaration order.
    pub const ALL: [ConnectionState; 7] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Disconnecting,
        Self::Searching,
        Self::Found,
        Self::NotFound,
    ];

    /// True if a new connection attempt may be started from this state.
    pub fn can_connect(self) -> bool {
        match self {
            Self::Disconnected | Self::Disconnecting | Self::NotFound => true,
            Self::Connected | Self::Connecting | Self::Searching | Self::Found => false,
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Searching => "Searching",
            Self::Found => "Found",
            Self::NotFound => "Not found",
        };
        f.write_str(label)
    }
}
