/*
[INPUT]:  Raw WebSocket message text/bytes
[OUTPUT]: Decoded protocol frames / encoded event envelopes
[POS]:    WebSocket layer - wire framing codec
[UPDATE]: When the venue changes control codes or payload shapes
*/

use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PocketOptionError, Result};
use crate::types::BalanceUpdate;

/// Control code answering the session-open frame
pub(crate) const HANDSHAKE_ACK: &str = "40";
/// Control code answering a heartbeat probe
pub(crate) const HEARTBEAT_ACK: &str = "3";
/// Application event envelope prefix
const EVENT_PREFIX: &str = "42";
/// Binary-attachment event envelope prefix
const BINARY_EVENT_PREFIX: &str = "451-";

/// Substring marking a payout-table snapshot.
///
/// The venue pushes the table as an untagged JSON array; the only stable way
/// to recognize it is this leading row. Reverse-engineered from the live
/// wire (there is no formal schema) - revalidate against the venue if
/// payout frames stop arriving.
pub(crate) const PAYOUT_MARKER: &str = "[[5,\"#AAPL\",\"Apple\",\"stock";

/// One decoded unit of protocol communication
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Session opened; must be answered with `40`
    Open { sid: String },
    /// Heartbeat probe; must be answered with `3`
    Ping,
    /// Heartbeat answer from the server
    Pong,
    /// Namespace ack; must be answered with the authentication payload
    NamespaceAck,
    /// Tagged application event (`42[...]` / `451-[...]` envelope)
    Event { tag: String, payload: Value },
    /// Balance push sniffed out of a binary frame
    Balance(BalanceUpdate),
    /// Correlated reply sniffed out of a binary frame by its `requestId`
    OrderReply { request_id: String, payload: Value },
    /// Payout-table snapshot, kept raw (heterogeneous rows)
    PayoutTable(String),
    /// Untagged JSON object, routed by the dispatcher's signal latches
    Object(Value),
    /// Untagged JSON array, routed by the dispatcher's signal latches
    Array(Value),
}

/// Decode a text frame.
///
/// Rules, in priority order: heartbeat codes, session open, namespace ack,
/// event envelopes. Anything else is a decode failure (logged and dropped by
/// the listener; the connection survives).
pub fn decode_text(text: &str) -> Result<Frame> {
    match text {
        "2" => return Ok(Frame::Ping),
        "3" => return Ok(Frame::Pong),
        _ => {}
    }

    if let Some(body) = text.strip_prefix('0')
        && text.contains("sid")
    {
        #[derive(serde::Deserialize)]
        struct OpenPayload {
            sid: String,
        }
        let open: OpenPayload = serde_json::from_str(body)
            .map_err(|e| PocketOptionError::decode(format!("malformed open frame: {e}")))?;
        return Ok(Frame::Open { sid: open.sid });
    }

    if let Some(body) = text.strip_prefix(EVENT_PREFIX) {
        // "42" sorts under "40"-prefix checks otherwise
        if body.starts_with('[') {
            return event_from_array(body);
        }
    }

    if text.starts_with(HANDSHAKE_ACK) {
        return Ok(Frame::NamespaceAck);
    }

    if let Some(body) = text.strip_prefix(BINARY_EVENT_PREFIX) {
        return event_from_array(body);
    }

    Err(PocketOptionError::decode(format!(
        "unrecognized text frame: {}",
        preview(text)
    )))
}

/// Decode a binary frame: UTF-8, then JSON (optionally percent-encoded),
/// then content sniffing.
///
/// The sniffing order is load-bearing and mirrors the wire behavior:
/// a `balance` field wins, then a `requestId` correlation field, then the
/// payout-table marker; leftover objects/arrays are handed to the
/// dispatcher's latches.
pub fn decode_binary(bytes: &[u8]) -> Result<Frame> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PocketOptionError::decode(format!("binary frame is not UTF-8: {e}")))?;
    let value = parse_json_relaxed(text)?;

    if let Some(object) = value.as_object() {
        if object.contains_key("balance") {
            let update: BalanceUpdate = serde_json::from_value(value.clone())
                .map_err(|e| PocketOptionError::decode(format!("malformed balance frame: {e}")))?;
            return Ok(Frame::Balance(update));
        }
        if let Some(request_id) = object.get("requestId").and_then(Value::as_str) {
            return Ok(Frame::OrderReply {
                request_id: request_id.to_string(),
                payload: value,
            });
        }
    }

    if text.contains(PAYOUT_MARKER) {
        return Ok(Frame::PayoutTable(text.to_string()));
    }

    match value {
        Value::Object(_) => Ok(Frame::Object(value)),
        Value::Array(_) => Ok(Frame::Array(value)),
        other => Err(PocketOptionError::decode(format!(
            "unexpected JSON scalar in binary frame: {other}"
        ))),
    }
}

/// Wrap an application payload in the outgoing event envelope
pub fn encode_event<T: Serialize>(tag: &str, payload: &T) -> Result<String> {
    let body = serde_json::to_string(&(tag, payload))?;
    Ok(format!("{EVENT_PREFIX}{body}"))
}

/// Envelope for a payload-less event such as the keep-alive
pub fn encode_bare_event(tag: &str) -> String {
    format!("{EVENT_PREFIX}[{}]", Value::String(tag.to_string()))
}

fn event_from_array(body: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PocketOptionError::decode(format!("malformed event envelope: {e}")))?;
    let Value::Array(mut items) = value else {
        return Err(PocketOptionError::decode("event envelope is not an array"));
    };
    if items.is_empty() {
        return Err(PocketOptionError::decode("event envelope is empty"));
    }
    let tag = items.remove(0);
    let Some(tag) = tag.as_str() else {
        return Err(PocketOptionError::decode("event tag is not a string"));
    };
    let payload = match items.len() {
        0 => Value::Null,
        1 => items.swap_remove(0),
        _ => Value::Array(items),
    };
    Ok(Frame::Event {
        tag: tag.to_string(),
        payload,
    })
}

fn parse_json_relaxed(text: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    let decoded = percent_decode_str(text)
        .decode_utf8()
        .map_err(|e| PocketOptionError::decode(format!("percent-decoding failed: {e}")))?;
    serde_json::from_str(&decoded)
        .map_err(|e| PocketOptionError::decode(format!("binary frame is not JSON: {e}")))
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(64)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}
