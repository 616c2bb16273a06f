//! Error kinds reported by the session engine.
//!
//! Every public operation returns an [`AsyncResult`](crate::AsyncResult) whose error
//! side is a [`SessionError`]. Precondition failures are delivered through that
//! result rather than raised, so the type is `Clone` and carries only owned data.

use thiserror::Error;

use crate::types::TransportState;

/// Errors surfaced through session operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The operation is not valid in the current lifecycle state.
    #[error("invalid state: expected {expected}, actual {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: TransportState,
        /// State the session was in.
        actual: TransportState,
    },

    /// `connect` was called while an earlier connection is still alive.
    #[error("previous connection still active")]
    PreviousConnectionStillActive,

    /// Pending work was torn down (connection end, release, shutdown).
    #[error("operation cancelled")]
    OperationCancelled,

    /// The authorization request failed.
    #[error("http error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http {
        /// Response status, if a response was received.
        status: Option<u16>,
        /// Response body or transport failure description.
        message: String,
    },

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The backend answered a request with an error.
    #[error("error response: {0}")]
    ErrorResponse(String),

    /// A helper was used or removed without being registered.
    #[error("helper not registered")]
    HelperNotRegistered,

    /// The transport failed to carry out an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a catch-all error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error came from forced teardown.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::OperationCancelled)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "invalid_state",
            Self::PreviousConnectionStillActive => "previous_connection_still_active",
            Self::OperationCancelled => "operation_cancelled",
            Self::Http { .. } => "http_error",
            Self::Decode(_) => "decode_error",
            Self::ErrorResponse(_) => "error_response",
            Self::HelperNotRegistered => "helper_not_registered",
            Self::Transport(_) => "transport_error",
            Self::Other(_) => "other_error",
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A result's execution context shut down before the result settled.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("result abandoned before completion")]
pub struct Abandoned;

impl From<Abandoned> for SessionError {
    fn from(_: Abandoned) -> Self {
        Self::OperationCancelled
    }
}
