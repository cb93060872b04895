//! Error types for the push bridge
//!
//! Three layers of errors exist:
//!
//! - [`DecodeError`] - returned by the pure push decoder
//! - [`TransitionError`] - returned by the call state machine
//! - [`BridgeError`] - the crate-wide error surfaced by the coordinator,
//!   the session store, the token registry and the configuration layer
//!
//! Most bridge errors are *ignorable*: duplicate or late signals are a normal
//! operating condition of push and native call-UI infrastructure, so the
//! coordinator records them and moves on. Only [`BridgeError::StoreCorrupted`]
//! indicates that in-flight calls were dropped.

use thiserror::Error;

use crate::call::{CallSignal, CallState};
use crate::push::CallId;

/// Result type for bridge operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Errors produced while decoding an inbound push payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is not a well-formed incoming-call push
    #[error("Malformed push payload: {reason}")]
    Malformed { reason: String },

    /// The payload is a push, but not an incoming-call push
    #[error("Unsupported push payload (type: {})", kind.as_deref().unwrap_or("none"))]
    Unsupported { kind: Option<String> },
}

impl DecodeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }

    pub fn unsupported(kind: Option<&str>) -> Self {
        Self::Unsupported { kind: kind.map(str::to_string) }
    }

    /// Unsupported payloads are expected: not every push is a call push
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Errors produced by the call state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The signal is not valid from the current state (duplicate or late)
    #[error("Invalid transition: {signal:?} is not valid in state {state:?}")]
    Invalid { state: CallState, signal: CallSignal },

    /// The session is already terminal; the signal has no effect
    #[error("Stale transition ignored: {signal:?} after terminal state {state:?}")]
    Stale { state: CallState, signal: CallSignal },
}

impl TransitionError {
    pub fn state(&self) -> CallState {
        match self {
            Self::Invalid { state, .. } | Self::Stale { state, .. } => *state,
        }
    }

    pub fn signal(&self) -> CallSignal {
        match self {
            Self::Invalid { signal, .. } | Self::Stale { signal, .. } => *signal,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Crate-wide error type
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Push token was empty or otherwise unusable
    #[error("Invalid push token: {reason}")]
    InvalidToken { reason: String },

    /// Push payload could not be decoded
    #[error("Malformed push payload: {reason}")]
    MalformedPayload { reason: String },

    /// Push payload is not an incoming-call push
    #[error("Unsupported push payload (type: {})", kind.as_deref().unwrap_or("none"))]
    UnsupportedPayload { kind: Option<String> },

    /// Native call UI capability is absent; the call was marked missed
    #[error("Call presenter unavailable for call {call_id}")]
    PresenterUnavailable { call_id: CallId },

    /// Signal not valid in the session's current state
    #[error("Invalid transition for call {call_id}: {signal:?} in state {state:?}")]
    InvalidTransition {
        call_id: CallId,
        state: CallState,
        signal: CallSignal,
    },

    /// No session exists for the call
    #[error("Call session not found: {call_id}")]
    SessionNotFound { call_id: CallId },

    /// Removal attempted on a session that has not reached a terminal state
    #[error("Call session {call_id} is not terminal (state {state:?})")]
    SessionNotTerminal { call_id: CallId, state: CallState },

    /// Session store lock was poisoned; all in-flight sessions were dropped
    #[error("Call session store corrupted and reset: {reason}")]
    StoreCorrupted { reason: String },

    /// Configuration value rejected
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Logging subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl BridgeError {
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken { reason: reason.into() }
    }

    pub fn session_not_found(call_id: &CallId) -> Self {
        Self::SessionNotFound { call_id: call_id.clone() }
    }

    pub fn store_corrupted(reason: impl Into<String>) -> Self {
        Self::StoreCorrupted { reason: reason.into() }
    }

    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the embedding application can safely drop this error
    ///
    /// Unsupported pushes and invalid transitions are a normal consequence of
    /// at-least-once delivery.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPayload { .. } | Self::InvalidTransition { .. }
        )
    }

    /// Short category name, used as a structured logging field
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidToken { .. } => "token",
            Self::MalformedPayload { .. } | Self::UnsupportedPayload { .. } => "payload",
            Self::PresenterUnavailable { .. } => "presenter",
            Self::InvalidTransition { .. } => "transition",
            Self::SessionNotFound { .. } | Self::SessionNotTerminal { .. } => "session",
            Self::StoreCorrupted { .. } => "store",
            Self::InvalidConfiguration { .. } => "config",
            Self::Logging(_) => "logging",
        }
    }

    pub(crate) fn from_transition(call_id: &CallId, err: TransitionError) -> Self {
        Self::InvalidTransition {
            call_id: call_id.clone(),
            state: err.state(),
            signal: err.signal(),
        }
    }
}

impl From<DecodeError> for BridgeError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Malformed { reason } => Self::MalformedPayload { reason },
            DecodeError::Unsupported { kind } => Self::UnsupportedPayload { kind },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_conversion() {
        let err: BridgeError = DecodeError::malformed("missing call_id").into();
        assert!(matches!(err, BridgeError::MalformedPayload { ref reason } if reason == "missing call_id"));
        assert!(!err.is_ignorable());

        let err: BridgeError = DecodeError::unsupported(Some("message")).into();
        assert!(err.is_ignorable());
        assert_eq!(err.to_string(), "Unsupported push payload (type: message)");
    }

    #[test]
    fn test_unsupported_without_kind_display() {
        assert_eq!(
            DecodeError::unsupported(None).to_string(),
            "Unsupported push payload (type: none)"
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(BridgeError::invalid_token("empty").category(), "token");
        assert_eq!(BridgeError::store_corrupted("poisoned").category(), "store");
        assert_eq!(
            BridgeError::invalid_configuration("ring_timeout_secs", "must be positive").category(),
            "config"
        );
    }

    #[test]
    fn test_transition_error_accessors() {
        let err = TransitionError::Stale {
            state: CallState::Ended,
            signal: CallSignal::UserEnded,
        };
        assert!(err.is_stale());
        assert_eq!(err.state(), CallState::Ended);
        assert_eq!(err.signal(), CallSignal::UserEnded);
    }
}
