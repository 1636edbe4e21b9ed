/*
[INPUT]:  Venue wire schema and serde requirements
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for venue communication
[UPDATE]: When the wire schema changes or new types added
*/

use serde::{Deserialize, Serialize};

/// Direction of a binary-options order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Call,
    Put,
}

/// Account mode reported by the venue (`isDemo` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountMode {
    Demo,
    Real,
}

impl AccountMode {
    /// Map the venue's numeric `isDemo` flag
    pub fn from_is_demo(is_demo: u8) -> Self {
        if is_demo == 0 {
            AccountMode::Real
        } else {
            AccountMode::Demo
        }
    }
}

/// Connection lifecycle state, owned by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Authenticated,
    /// Terminal: the venue rejected the session, no reconnects follow
    AuthRejected,
}

impl ConnectionStatus {
    /// Whether the session is live and authenticated
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionStatus::Authenticated)
    }

    /// Whether a handshake is in progress (sends are queued, not rejected)
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::AwaitingHandshake
        )
    }
}
