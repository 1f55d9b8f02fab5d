//! # Error Taxonomy
//!
//! Every failure the request pipeline can surface. Response-classified errors
//! carry the HTTP status and a masked, serialized copy of the body so callers
//! can decide whether to back off, skip or abort.

use thiserror::Error;

use crate::configs::nepse_config::ConfigError;
use crate::retrieve::ky_http::{TransportFailure, TransportKind};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NepseError>;

/// Errors produced by the NEPSE request pipeline.
#[derive(Debug, Error)]
pub enum NepseError {
    /// HTTP 400.
    #[error("Client Error {status}: {body}")]
    Client { status: u16, body: String },

    /// HTTP 401, or a refresh that could not obtain new credentials.
    #[error("Unauthorized ({status}): {body}")]
    Authentication { status: u16, body: String },

    /// HTTP 502.
    #[error("Bad Gateway ({status}): {body}")]
    BadGateway { status: u16, body: String },

    /// HTTP 500-599 other than 502.
    #[error("Server Error {status}: {body}")]
    Server { status: u16, body: String },

    /// Any status code outside the classified ranges.
    #[error("Unexpected HTTP status code {status}: {body}")]
    Network { status: u16, body: String },

    /// Connection-level failure before a response was received.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportFailure),

    /// A recoverable failure kept recurring until the attempt budget ran out.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<NepseError> },

    /// The caller's cancellation token fired.
    #[error("Request cancelled")]
    Cancelled,

    /// The response did not have the structure the caller asked for.
    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    /// Symbol absent from the security list.
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Dummy id {id} is outside the dummy data table of {len} entries")]
    DummyIdOutOfRange { id: i64, len: usize },

    #[error("Salts must hold at least 4 entries, got {0}")]
    InsufficientSalts(usize),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl NepseError {
    /// Status code carried by response-classified errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. }
            | Self::Authentication { status, .. }
            | Self::BadGateway { status, .. }
            | Self::Server { status, .. }
            | Self::Network { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Masked body carried by response-classified errors.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Client { body, .. }
            | Self::Authentication { body, .. }
            | Self::BadGateway { body, .. }
            | Self::Server { body, .. }
            | Self::Network { body, .. } => Some(body),
            Self::RetriesExhausted { last, .. } => last.body(),
            _ => None,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// True for the failures the dispatcher heals locally: retryable transport
    /// kinds and authorization failures.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(failure) => failure.kind.is_retryable(),
            Self::Authentication { .. } => true,
            _ => false,
        }
    }

    /// The underlying error once retry bookkeeping is stripped.
    pub fn root(&self) -> &NepseError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Transport kind of the root error, if it is a transport failure.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        match self.root() {
            Self::Transport(failure) => Some(failure.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_error_exposes_the_last_status() {
        let err = NepseError::RetriesExhausted {
            attempts: 3,
            last: Box::new(NepseError::Authentication {
                status: 401,
                body: "{}".into(),
            }),
        };
        assert_eq!(err.status(), Some(401));
        assert!(err.root().is_authentication());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn only_retryable_transport_kinds_are_recoverable() {
        let reset = NepseError::Transport(TransportFailure::new(TransportKind::Read, "reset"));
        let slow = NepseError::Transport(TransportFailure::new(TransportKind::Timeout, "slow"));
        assert!(reset.is_recoverable());
        assert!(!slow.is_recoverable());
        assert!(!NepseError::Server { status: 500, body: String::new() }.is_recoverable());
    }
}
