//! Protocol event engine: assembles named wire events into payloads.
//!
//! The engine holds at most one active transfer. A `server-intent` opens it,
//! `put-object`/`delete-object` accumulate into it, and `payload-transferred`
//! seals it into a [`Payload`]. The transfer is discarded whenever a new
//! intent arrives or the transport reconnects, so updates are never stitched
//! across a connection boundary.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::event::{
    DeleteObjectData, ErrorData, EventName, Goodbye, IntentCode, IntentPayload, Payload,
    PayloadTransferredData, PayloadType, PutObjectData, ServerIntentData, Update,
};

// =============================================================================
// Actions
// =============================================================================

/// The action an event produces. `Payload`, `Goodbye`, `ServerError`, and
/// actionable `Error`s are final for the current event sequence; `None` and
/// non-actionable errors mean "keep consuming".
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// A completed transfer (or an immediate no-change payload).
    Payload(Payload),
    /// Server-initiated disconnect notice.
    Goodbye(Goodbye),
    /// Server-pushed `error` event, distinct from transport/HTTP errors.
    ServerError { reason: String },
    /// A protocol violation; check [`ProtocolError::is_actionable`].
    Error(ProtocolError),
    /// Nothing to surface (intents, accumulated objects, heart-beats).
    None,
}

/// Protocol violations detected while consuming events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// An object or transfer-completion event arrived with no active transfer.
    #[error("{0}")]
    MissingPayload(String),
    /// Event data could not be decoded into the expected shape.
    #[error("{0}")]
    Malformed(String),
    /// An event name this engine does not recognize.
    #[error("unrecognized event '{0}'")]
    UnknownEvent(String),
}

impl ProtocolError {
    /// Actionable errors end the current event sequence; non-actionable ones
    /// are logged and skipped.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::UnknownEvent(_))
    }
}

// =============================================================================
// Active transfer
// =============================================================================

/// Transfer in progress between `server-intent` and `payload-transferred`.
/// Updates are keyed by (kind, key): the last write per key wins, keeping the
/// position of the first.
#[derive(Debug)]
struct ActiveTransfer {
    payload_id: String,
    target_version: u64,
    payload_type: PayloadType,
    updates: Vec<Update>,
    by_key: HashMap<(String, String), usize>,
}

impl ActiveTransfer {
    fn new(intent: &IntentPayload, payload_type: PayloadType) -> Self {
        Self {
            payload_id: intent.id.clone(),
            target_version: intent.target,
            payload_type,
            updates: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    fn upsert(&mut self, update: Update) {
        let key = (update.kind.clone(), update.key.clone());
        match self.by_key.get(&key) {
            Some(&index) => self.updates[index] = update,
            None => {
                self.by_key.insert(key, self.updates.len());
                self.updates.push(update);
            }
        }
    }

    fn finalize(self, data: PayloadTransferredData) -> Payload {
        Payload {
            id: self.payload_id,
            version: data.version,
            state: Some(data.state),
            payload_type: self.payload_type,
            updates: self.updates,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Consumes ordered `{event, data}` pairs and emits [`EngineAction`]s.
///
/// All state is instance-scoped; polling creates a fresh engine per request,
/// streaming keeps one per connection and calls [`EventEngine::reset`] on
/// every (re)connect.
#[derive(Debug, Default)]
pub struct EventEngine {
    transfer: Option<ActiveTransfer>,
}

impl EventEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards any in-progress transfer. Called on transport reconnect so a
    /// half-received transfer is never stitched onto the new connection.
    pub fn reset(&mut self) {
        if self.transfer.take().is_some() {
            debug!("discarding unfinished transfer on reset");
        }
    }

    /// Handles one named event and returns the action it produces.
    pub fn handle_event(&mut self, name: &str, data: &Value) -> EngineAction {
        let Some(name) = EventName::parse(name) else {
            warn!(event = name, "ignoring unrecognized event");
            return EngineAction::Error(ProtocolError::UnknownEvent(name.to_string()));
        };

        match name {
            EventName::ServerIntent => self.handle_server_intent(data),
            EventName::PutObject => self.handle_put_object(data),
            EventName::DeleteObject => self.handle_delete_object(data),
            EventName::PayloadTransferred => self.handle_payload_transferred(data),
            EventName::Goodbye => handle_goodbye(data),
            EventName::Error => handle_error(data),
            EventName::HeartBeat => EngineAction::None,
        }
    }

    fn handle_server_intent(&mut self, data: &Value) -> EngineAction {
        let intent: ServerIntentData = match serde_json::from_value(data.clone()) {
            Ok(intent) => intent,
            Err(e) => return malformed(EventName::ServerIntent, e),
        };
        // Only the first payload entry is used; multi-payload intents are not
        // part of the current protocol.
        let Some(payload) = intent.payloads.first() else {
            return EngineAction::Error(ProtocolError::Malformed(
                "server-intent event contained no payloads".to_string(),
            ));
        };

        match payload.intent_code {
            IntentCode::None => EngineAction::Payload(Payload {
                id: payload.id.clone(),
                version: payload.target,
                state: None,
                payload_type: PayloadType::None,
                updates: Vec::new(),
            }),
            IntentCode::TransferFull => {
                self.open_transfer(payload, PayloadType::Full);
                EngineAction::None
            }
            IntentCode::TransferChanges => {
                self.open_transfer(payload, PayloadType::Partial);
                EngineAction::None
            }
        }
    }

    fn open_transfer(&mut self, intent: &IntentPayload, payload_type: PayloadType) {
        if self.transfer.is_some() {
            warn!(
                payload_id = %intent.id,
                "new server-intent discards unfinished transfer"
            );
        }
        debug!(
            payload_id = %intent.id,
            target = intent.target,
            ?payload_type,
            "transfer opened"
        );
        self.transfer = Some(ActiveTransfer::new(intent, payload_type));
    }

    fn handle_put_object(&mut self, data: &Value) -> EngineAction {
        let put: PutObjectData = match serde_json::from_value(data.clone()) {
            Ok(put) => put,
            Err(e) => return malformed(EventName::PutObject, e),
        };
        let Some(transfer) = self.transfer.as_mut() else {
            return EngineAction::Error(ProtocolError::MissingPayload(
                "put-object event with no active transfer".to_string(),
            ));
        };
        transfer.upsert(Update {
            kind: put.kind,
            key: put.key,
            version: put.version,
            object: Some(put.object),
            deleted: false,
        });
        EngineAction::None
    }

    fn handle_delete_object(&mut self, data: &Value) -> EngineAction {
        let delete: DeleteObjectData = match serde_json::from_value(data.clone()) {
            Ok(delete) => delete,
            Err(e) => return malformed(EventName::DeleteObject, e),
        };
        let Some(transfer) = self.transfer.as_mut() else {
            return EngineAction::Error(ProtocolError::MissingPayload(
                "delete-object event with no active transfer".to_string(),
            ));
        };
        transfer.upsert(Update {
            kind: delete.kind,
            key: delete.key,
            version: delete.version,
            object: None,
            deleted: true,
        });
        EngineAction::None
    }

    fn handle_payload_transferred(&mut self, data: &Value) -> EngineAction {
        let transferred: PayloadTransferredData = match serde_json::from_value(data.clone()) {
            Ok(transferred) => transferred,
            Err(e) => return malformed(EventName::PayloadTransferred, e),
        };
        let Some(transfer) = self.transfer.take() else {
            return EngineAction::Error(ProtocolError::MissingPayload(
                "payload-transferred event with no active transfer".to_string(),
            ));
        };
        if transferred.version != transfer.target_version {
            debug!(
                target = transfer.target_version,
                actual = transferred.version,
                "transfer completed at a different version than the intent target"
            );
        }
        EngineAction::Payload(transfer.finalize(transferred))
    }
}

fn handle_goodbye(data: &Value) -> EngineAction {
    let goodbye: Goodbye = match serde_json::from_value(data.clone()) {
        Ok(goodbye) => goodbye,
        Err(e) => return malformed(EventName::Goodbye, e),
    };
    if !goodbye.silent {
        warn!(reason = %goodbye.reason, catastrophe = goodbye.catastrophe, "server sent goodbye");
    }
    EngineAction::Goodbye(goodbye)
}

fn handle_error(data: &Value) -> EngineAction {
    let error: ErrorData = match serde_json::from_value(data.clone()) {
        Ok(error) => error,
        Err(e) => return malformed(EventName::Error, e),
    };
    EngineAction::ServerError {
        reason: error.reason,
    }
}

fn malformed(name: EventName, e: serde_json::Error) -> EngineAction {
    EngineAction::Error(ProtocolError::Malformed(format!(
        "unable to decode {} event data: {}",
        name.as_str(),
        e
    )))
}

// =============================================================================
// Tests
// =============================================================================
