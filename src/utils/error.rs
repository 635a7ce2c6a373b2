//! The `error` module defines the crate-wide error type.
//!
//! Every fallible operation in `fcmpush` returns `FcmError`. The retrier does
//! not match on variants directly; it asks the `Temporary` trait whether an
//! error is worth another attempt.

use std::time::Duration;

use thiserror::Error;

use crate::message::ValidationError;
use crate::response::Response;

/// Retry classification of a failure.
pub trait Temporary {
    /// Whether another attempt may succeed.
    fn is_temporary(&self) -> bool;

    /// Whether the failure was a timeout or unreachable peer.
    fn is_timeout(&self) -> bool;

    /// Delay the peer asked for before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Error)]
pub enum FcmError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("client API key is invalid")]
    InvalidApiKey,

    /// The request never got a response: connect failure, reset, timeout.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The backend answered with a non-200 status. `response` carries the
    /// status and `Retry-After` hint that were parsed before giving up.
    #[error("{status} error: {reason}")]
    Server {
        status: u16,
        reason: String,
        response: Box<Response>,
    },

    #[error("failed to decode JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stream error: {0}")]
    Stream(#[from] tungstenite::Error),

    #[error("no stream connection is open")]
    NotConnected,

    #[error("client is closed")]
    ClientClosed,

    /// Another send with the same message id is still waiting for its
    /// acknowledgment.
    #[error("message id {0} is already awaiting an acknowledgment")]
    DuplicateMessageId(String),

    /// The stream is down and too many messages are already waiting for it.
    #[error("resend queue is full ({0} messages waiting for a connection)")]
    ResendQueueFull(usize),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FcmError {
    pub fn connection(message: impl Into<String>) -> Self {
        FcmError::Connection {
            message: message.into(),
        }
    }

    /// The partial response a server error carries.
    pub fn response(&self) -> Option<&Response> {
        match self {
            FcmError::Server { response, .. } => Some(response),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FcmError {
    fn from(err: reqwest::Error) -> Self {
        FcmError::connection(err.to_string())
    }
}

impl Temporary for FcmError {
    fn is_temporary(&self) -> bool {
        matches!(
            self,
            FcmError::Connection { .. }
                | FcmError::Server { .. }
                | FcmError::Stream(_)
                | FcmError::NotConnected
                | FcmError::ResendQueueFull(_)
        )
    }

    fn is_timeout(&self) -> bool {
        matches!(self, FcmError::Connection { .. } | FcmError::NotConnected)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.response().and_then(Response::retry_after)
    }
}
