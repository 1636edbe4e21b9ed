/*
[INPUT]:  Venue wire schema and serde requirements
[OUTPUT]: Typed Rust request structs with serialization support
[POS]:    Data layer - type definitions for venue communication
[UPDATE]: When the wire schema changes or new types added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::Direction;
use crate::error::Result;

/// Typed session credentials for the `auth` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAuth {
    pub session: String,
    #[serde(rename = "isDemo")]
    pub is_demo: u8,
    pub uid: u64,
    pub platform: u8,
}

impl SessionAuth {
    /// Credentials for a demo account on the web platform
    pub fn demo(session: impl Into<String>, uid: u64) -> Self {
        Self {
            session: session.into(),
            is_demo: 1,
            uid,
            platform: 2,
        }
    }

    /// Credentials for a real account on the web platform
    pub fn real(session: impl Into<String>, uid: u64) -> Self {
        Self {
            session: session.into(),
            is_demo: 0,
            uid,
            platform: 2,
        }
    }
}

/// The authentication event sent after the namespace ack.
///
/// The venue hands sessions out through its web frontend, so callers usually
/// already hold the full `42["auth",{...}]` string; `Raw` sends it verbatim
/// without inspecting its fields. `Session` builds the same envelope from
/// typed credentials.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthPayload {
    Raw(String),
    Session(SessionAuth),
}

impl AuthPayload {
    /// Render the outgoing authentication message
    pub fn to_message(&self) -> Result<String> {
        match self {
            AuthPayload::Raw(raw) => Ok(raw.clone()),
            AuthPayload::Session(auth) => {
                let body = serde_json::to_string(&("auth", auth))?;
                Ok(format!("42{body}"))
            }
        }
    }

    /// Whether the credentials target a demo account.
    ///
    /// For `Raw` payloads this is sniffed from the string, since the payload
    /// is otherwise opaque to the client.
    pub fn is_demo(&self) -> bool {
        match self {
            AuthPayload::Raw(raw) => raw.contains("\"isDemo\":1"),
            AuthPayload::Session(auth) => auth.is_demo != 0,
        }
    }
}

impl From<SessionAuth> for AuthPayload {
    fn from(auth: SessionAuth) -> Self {
        AuthPayload::Session(auth)
    }
}

impl From<String> for AuthPayload {
    fn from(raw: String) -> Self {
        AuthPayload::Raw(raw)
    }
}

/// Body of the `changeSymbol` event (subscribe to a quote stream)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSymbolRequest {
    pub asset: String,
    pub period: u32,
}

/// Body of the `loadHistoryPeriod` event (request a candle batch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadHistoryPeriodRequest {
    pub asset: String,
    pub period: u32,
    /// Number of seconds of history to return
    pub count: u32,
    /// End time of the requested window, seconds since epoch
    pub time: i64,
}

/// Body of the `openOrder` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderRequest {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub action: Direction,
    #[serde(rename = "isDemo")]
    pub is_demo: u8,
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Expiry in seconds
    pub time: u32,
}

impl OpenOrderRequest {
    /// New order with an auto-generated correlation id
    pub fn new(asset: impl Into<String>, amount: Decimal, action: Direction, expiry: u32) -> Self {
        Self {
            asset: asset.into(),
            amount,
            action,
            is_demo: 1,
            request_id: Uuid::new_v4().to_string(),
            time: expiry,
        }
    }

    /// Override the correlation id (the venue echoes it back verbatim)
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}
