//! Wire event names and data shapes for the FDv2 protocol.
//!
//! Events arrive as `{event, data}` pairs: named JSON objects over SSE or
//! inside the `events` array of a polling response body. Multi-word field
//! names are camelCase on the wire, event names and intent codes kebab-case.

use serde::Deserialize;
use serde_json::Value;

pub const EVENT_NAME_SERVER_INTENT: &str = "server-intent";
pub const EVENT_NAME_PUT_OBJECT: &str = "put-object";
pub const EVENT_NAME_DELETE_OBJECT: &str = "delete-object";
pub const EVENT_NAME_PAYLOAD_TRANSFERRED: &str = "payload-transferred";
pub const EVENT_NAME_GOODBYE: &str = "goodbye";
pub const EVENT_NAME_ERROR: &str = "error";
pub const EVENT_NAME_HEART_BEAT: &str = "heart-beat";

// =============================================================================
// Event names
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    ServerIntent,
    PutObject,
    DeleteObject,
    PayloadTransferred,
    Goodbye,
    Error,
    HeartBeat,
}

impl EventName {
    /// All FDv2 event names, in the order a streaming transport should
    /// register listeners for them.
    pub const ALL: [EventName; 7] = [
        Self::ServerIntent,
        Self::PutObject,
        Self::DeleteObject,
        Self::PayloadTransferred,
        Self::Goodbye,
        Self::Error,
        Self::HeartBeat,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            EVENT_NAME_SERVER_INTENT => Some(Self::ServerIntent),
            EVENT_NAME_PUT_OBJECT => Some(Self::PutObject),
            EVENT_NAME_DELETE_OBJECT => Some(Self::DeleteObject),
            EVENT_NAME_PAYLOAD_TRANSFERRED => Some(Self::PayloadTransferred),
            EVENT_NAME_GOODBYE => Some(Self::Goodbye),
            EVENT_NAME_ERROR => Some(Self::Error),
            EVENT_NAME_HEART_BEAT => Some(Self::HeartBeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerIntent => EVENT_NAME_SERVER_INTENT,
            Self::PutObject => EVENT_NAME_PUT_OBJECT,
            Self::DeleteObject => EVENT_NAME_DELETE_OBJECT,
            Self::PayloadTransferred => EVENT_NAME_PAYLOAD_TRANSFERRED,
            Self::Goodbye => EVENT_NAME_GOODBYE,
            Self::Error => EVENT_NAME_ERROR,
            Self::HeartBeat => EVENT_NAME_HEART_BEAT,
        }
    }
}

// =============================================================================
// SERVER_INTENT
// =============================================================================

/// Intent codes the server may declare for an upcoming transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IntentCode {
    /// Client state already matches the target; nothing will be sent.
    #[serde(rename = "none")]
    None,
    /// A full snapshot replacing the entire local state.
    #[serde(rename = "xfer-full")]
    TransferFull,
    /// A delta applied atop the last full baseline.
    #[serde(rename = "xfer-changes")]
    TransferChanges,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerIntentData {
    pub payloads: Vec<IntentPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentPayload {
    pub id: String,
    pub target: u64,
    #[serde(rename = "intentCode")]
    pub intent_code: IntentCode,
    #[serde(default)]
    pub reason: Option<String>,
}

// =============================================================================
// PUT_OBJECT / DELETE_OBJECT
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PutObjectData {
    pub kind: String,
    pub key: String,
    pub version: u64,
    pub object: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteObjectData {
    pub kind: String,
    pub key: String,
    pub version: u64,
}

// =============================================================================
// PAYLOAD_TRANSFERRED
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadTransferredData {
    /// Opaque resumption token; becomes the `basis` of the next request.
    pub state: String,
    pub version: u64,
}

// =============================================================================
// GOODBYE / ERROR
// =============================================================================

/// Server-initiated disconnect notice. Always terminal for the current
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Goodbye {
    pub reason: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub catastrophe: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub reason: String,
}

// =============================================================================
// Assembled payloads
// =============================================================================

/// The kind of state change a completed transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Replace the entire local state.
    Full,
    /// Apply deltas atop the last full baseline.
    Partial,
    /// No change.
    None,
}

/// A single object change within a payload.
///
/// `deleted` and `object` are mutually exclusive: a delete is a versioned
/// tombstone with no object body.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub kind: String,
    pub key: String,
    pub version: u64,
    pub object: Option<Value>,
    pub deleted: bool,
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub id: String,
    pub version: u64,
    /// Resumption token from `payload-transferred`, absent for synthetic
    /// no-change payloads.
    pub state: Option<String>,
    pub payload_type: PayloadType,
    pub updates: Vec<Update>,
}

impl Payload {
    /// A synthetic no-change payload (304 responses, `intentCode: none`).
    pub fn none() -> Self {
        Self {
            id: String::new(),
            version: 0,
            state: None,
            payload_type: PayloadType::None,
            updates: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_round_trip() {
        for name in EventName::ALL {
            assert_eq!(EventName::parse(name.as_str()), Some(name));
        }
        assert_eq!(EventName::parse("ping"), None);
        assert_eq!(EventName::parse("no-such-event"), None);
    }

    #[test]
    fn test_server_intent_decode() {
        let data: ServerIntentData = serde_json::from_str(
            r#"{"payloads":[{"id":"p1","target":3,"intentCode":"xfer-full","reason":"stale"}]}"#,
        )
        .unwrap();
        let intent = &data.payloads[0];
        assert_eq!(intent.id, "p1");
        assert_eq!(intent.target, 3);
        assert_eq!(intent.intent_code, IntentCode::TransferFull);
        assert_eq!(intent.reason.as_deref(), Some("stale"));
    }

    #[test]
    fn test_unknown_intent_code_rejected() {
        let result: Result<ServerIntentData, _> = serde_json::from_str(
            r#"{"payloads":[{"id":"p1","target":1,"intentCode":"xfer-other"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_goodbye_defaults() {
        let goodbye: Goodbye = serde_json::from_str(r#"{"reason":"restarting"}"#).unwrap();
        assert_eq!(goodbye.reason, "restarting");
        assert!(!goodbye.silent);
        assert!(!goodbye.catastrophe);
    }

    #[test]
    fn test_put_object_requires_object() {
        let result: Result<PutObjectData, _> =
            serde_json::from_str(r#"{"kind":"flagEval","key":"a","version":1}"#);
        assert!(result.is_err());
    }
}
