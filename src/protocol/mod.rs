//! FDv2 protocol layer.
//!
//! Two-phase transfer model:
//! 1. `server-intent` declares the kind of transfer about to occur
//! 2. `put-object`/`delete-object` accumulate into the active transfer
//! 3. `payload-transferred` seals the transfer into a [`Payload`]
//!
//! The engine is transport-agnostic: the polling and streaming layers feed it
//! the same named events and translate the resulting actions into results.

pub mod engine;
pub mod event;

pub use engine::{EngineAction, EventEngine, ProtocolError};
pub use event::{
    EventName, Goodbye, IntentCode, Payload, PayloadType, Update, EVENT_NAME_DELETE_OBJECT,
    EVENT_NAME_ERROR, EVENT_NAME_GOODBYE, EVENT_NAME_HEART_BEAT, EVENT_NAME_PAYLOAD_TRANSFERRED,
    EVENT_NAME_PUT_OBJECT, EVENT_NAME_SERVER_INTENT,
};
