//! One poll request -> protocol engine -> result.
//!
//! Error recoverability depends on the lifecycle mode: a one-shot poll treats
//! every failure as terminal, a continuous poll downgrades recoverable ones
//! to `Interrupted` and lets the caller retry.

use serde_json::Value;
use tracing::debug;

use crate::protocol::{EngineAction, EventEngine};
use crate::result::{ErrorInfo, SourceResult};
use crate::transport::{
    fallback_from_header, is_recoverable_status, Requestor, HEADER_ENVIRONMENT_ID,
    HEADER_FDV1_FALLBACK,
};

const MSG_MALFORMED_JSON: &str = "Malformed JSON in polling response";
const MSG_MISSING_EVENTS: &str = "Polling response missing events";
const MSG_UNEXPECTED_END: &str = "Unexpected end of polling response";

/// Runs one poll and classifies the outcome. Every result produced from the
/// response carries the fallback and environment-id headers of that response.
pub async fn poll(requestor: &dyn Requestor, basis: Option<&str>, one_shot: bool) -> SourceResult {
    let response = match requestor.poll(basis).await {
        Ok(response) => response,
        Err(e) => {
            let info = ErrorInfo::from_network_error(e.to_string());
            return if one_shot {
                SourceResult::terminal_error(info)
            } else {
                SourceResult::interrupted(info)
            };
        }
    };

    let fallback = fallback_from_header(response.header(HEADER_FDV1_FALLBACK));
    let environment_id = response.header(HEADER_ENVIRONMENT_ID).map(str::to_string);
    let tag = |result: SourceResult| {
        result
            .with_fallback(fallback)
            .with_environment_id(environment_id.clone())
    };

    if response.status == 304 {
        debug!("poll returned 304, no changes");
        return tag(SourceResult::change_set(crate::protocol::Payload::none()));
    }

    if !(200..300).contains(&response.status) {
        let info = ErrorInfo::from_http_error(
            response.status,
            format!("polling request failed with status {}", response.status),
        );
        return tag(if one_shot || !is_recoverable_status(response.status) {
            SourceResult::terminal_error(info)
        } else {
            SourceResult::interrupted(info)
        });
    }

    if response.body.is_empty() {
        return tag(invalid_data("Empty polling response body", one_shot));
    }

    let body: Value = match serde_json::from_str(&response.body) {
        Ok(body) => body,
        Err(_) => return tag(invalid_data(MSG_MALFORMED_JSON, one_shot)),
    };
    let Some(events) = body.get("events").and_then(Value::as_array) else {
        return tag(invalid_data(MSG_MISSING_EVENTS, one_shot));
    };

    let mut engine = EventEngine::new();
    for event in events {
        let (Some(name), Some(data)) = (
            event.get("event").and_then(Value::as_str),
            event.get("data"),
        ) else {
            return tag(invalid_data("Malformed event in polling response", one_shot));
        };

        match engine.handle_event(name, data) {
            EngineAction::Payload(payload) => {
                return tag(SourceResult::change_set(payload));
            }
            EngineAction::Goodbye(goodbye) => {
                return tag(SourceResult::goodbye(goodbye.reason));
            }
            // Server-pushed errors are recoverable even in one-shot mode,
            // unlike HTTP errors; see DESIGN.md.
            EngineAction::ServerError { reason } => {
                return tag(SourceResult::interrupted(ErrorInfo::from_unknown(reason)));
            }
            EngineAction::Error(e) if e.is_actionable() => {
                return tag(invalid_data(e.to_string(), one_shot));
            }
            EngineAction::Error(_) | EngineAction::None => {}
        }
    }

    tag(invalid_data(MSG_UNEXPECTED_END, one_shot))
}

fn invalid_data(message: impl Into<String>, one_shot: bool) -> SourceResult {
    let info = ErrorInfo::from_invalid_data(message);
    if one_shot {
        SourceResult::terminal_error(info)
    } else {
        SourceResult::interrupted(info)
    }
}

// =============================================================================
// Tests
// =============================================================================
