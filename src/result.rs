//! Uniform result envelope produced by every data source.
//!
//! Errors never cross the driver boundary as `Err`: transport, HTTP, and
//! protocol failures all surface as [`SourceResult::Status`] values so the
//! consuming data manager can map them to connectivity state with a single
//! exhaustive match.

use chrono::{DateTime, Utc};

use crate::protocol::Payload;

// =============================================================================
// Error info
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself failed (DNS, connect, reset).
    NetworkError,
    /// The service returned a non-success HTTP status.
    ErrorResponse,
    /// The response arrived but could not be understood.
    InvalidData,
    Unknown,
}

/// Details of a failure, stamped with the time it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub time: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn from_http_error(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ErrorResponse,
            message: message.into(),
            status_code: Some(status),
            time: Utc::now(),
        }
    }

    pub fn from_network_error(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NetworkError,
            message: message.into(),
            status_code: None,
            time: Utc::now(),
        }
    }

    pub fn from_invalid_data(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidData,
            message: message.into(),
            status_code: None,
            time: Utc::now(),
        }
    }

    pub fn from_unknown(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            message: message.into(),
            status_code: None,
            time: Utc::now(),
        }
    }
}

// =============================================================================
// Source results
// =============================================================================

/// Lifecycle states a source can report instead of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    /// Recoverable; the source keeps retrying on its own.
    Interrupted,
    /// The consumer closed the source. Never produced spontaneously.
    Shutdown,
    /// Unrecoverable; the source has stopped.
    TerminalError,
    /// Server-initiated disconnect.
    Goodbye,
}

/// Everything a data source can hand to its consumer: a change set or a
/// status. Exactly one of `payload` / `error_info` is meaningful per branch.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult {
    ChangeSet {
        payload: Payload,
        /// Signal to switch to the legacy (FDv1) protocol.
        fdv1_fallback: Option<bool>,
        environment_id: Option<String>,
    },
    Status {
        state: StatusState,
        error_info: Option<ErrorInfo>,
        reason: Option<String>,
        fdv1_fallback: Option<bool>,
    },
}

impl SourceResult {
    pub fn change_set(payload: Payload) -> Self {
        Self::ChangeSet {
            payload,
            fdv1_fallback: None,
            environment_id: None,
        }
    }

    pub fn interrupted(error_info: ErrorInfo) -> Self {
        Self::status(StatusState::Interrupted, Some(error_info))
    }

    pub fn shutdown() -> Self {
        Self::status(StatusState::Shutdown, None)
    }

    pub fn terminal_error(error_info: ErrorInfo) -> Self {
        Self::status(StatusState::TerminalError, Some(error_info))
    }

    pub fn goodbye(reason: impl Into<String>) -> Self {
        Self::Status {
            state: StatusState::Goodbye,
            error_info: None,
            reason: Some(reason.into()),
            fdv1_fallback: None,
        }
    }

    fn status(state: StatusState, error_info: Option<ErrorInfo>) -> Self {
        Self::Status {
            state,
            error_info,
            reason: None,
            fdv1_fallback: None,
        }
    }

    /// Attaches the fallback signal to either branch.
    pub fn with_fallback(mut self, fallback: Option<bool>) -> Self {
        match &mut self {
            Self::ChangeSet { fdv1_fallback, .. } | Self::Status { fdv1_fallback, .. } => {
                *fdv1_fallback = fallback;
            }
        }
        self
    }

    /// Attaches the environment id; meaningful for change sets only.
    pub fn with_environment_id(mut self, id: Option<String>) -> Self {
        if let Self::ChangeSet { environment_id, .. } = &mut self {
            *environment_id = id;
        }
        self
    }

    pub fn fdv1_fallback(&self) -> Option<bool> {
        match self {
            Self::ChangeSet { fdv1_fallback, .. } | Self::Status { fdv1_fallback, .. } => {
                *fdv1_fallback
            }
        }
    }

    /// True only for unrecoverable errors; a goodbye or interruption is not
    /// terminal for the source.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Status {
                state: StatusState::TerminalError,
                ..
            }
        )
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            Self::Status {
                state: StatusState::Shutdown,
                ..
            }
        )
    }
}
