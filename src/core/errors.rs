// src/core/errors.rs

//! Defines the primary error type for the transport and session layer.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure this layer can surface.
///
/// Transport failures (`ConnectFailed`, `WriteFailed`, `ReadFailed`,
/// `ConnectionClosed`) are never retried internally; the caller owns retry
/// policy. Backend-reported outcomes such as "permission denied" are not errors
/// at all and are returned as `BackendStatus` values instead.
#[derive(Error, Debug)]
pub enum GatewireError {
    #[error("Connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Field '{tag}' is not a valid {expected}")]
    FieldTypeError { tag: String, expected: &'static str },

    #[error("Write failed: {0}")]
    WriteFailed(Arc<std::io::Error>),

    #[error("Read failed: {0}")]
    ReadFailed(Arc<std::io::Error>),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("Session poisoned: {0}")]
    SessionPoisoned(String),

    #[error("Cache update for type '{object_type}' rejected: {reason}")]
    CacheUpdateError { object_type: String, reason: String },

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewireError {
    /// Returns true for failures of the underlying socket, as opposed to
    /// protocol or session failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GatewireError::ConnectFailed { .. }
                | GatewireError::WriteFailed(_)
                | GatewireError::ReadFailed(_)
                | GatewireError::ConnectionClosed
        )
    }

    pub(crate) fn connect_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        GatewireError::ConnectFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        GatewireError::MalformedMessage(reason.into())
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// Io errors are held in an Arc so a single failure can be fanned out to
// every waiter of a broken channel.
impl Clone for GatewireError {
    fn clone(&self) -> Self {
        match self {
            GatewireError::ConnectFailed { endpoint, reason } => GatewireError::ConnectFailed {
                endpoint: endpoint.clone(),
                reason: reason.clone(),
            },
            GatewireError::MalformedMessage(s) => GatewireError::MalformedMessage(s.clone()),
            GatewireError::FieldTypeError { tag, expected } => GatewireError::FieldTypeError {
                tag: tag.clone(),
                expected: *expected,
            },
            GatewireError::WriteFailed(e) => GatewireError::WriteFailed(Arc::clone(e)),
            GatewireError::ReadFailed(e) => GatewireError::ReadFailed(Arc::clone(e)),
            GatewireError::ConnectionClosed => GatewireError::ConnectionClosed,
            GatewireError::RequestTimeout(d) => GatewireError::RequestTimeout(*d),
            GatewireError::SessionPoisoned(s) => GatewireError::SessionPoisoned(s.clone()),
            GatewireError::CacheUpdateError {
                object_type,
                reason,
            } => GatewireError::CacheUpdateError {
                object_type: object_type.clone(),
                reason: reason.clone(),
            },
            GatewireError::InvalidState(s) => GatewireError::InvalidState(s.clone()),
            GatewireError::Internal(s) => GatewireError::Internal(s.clone()),
        }
    }
}

impl PartialEq for GatewireError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GatewireError::WriteFailed(e1), GatewireError::WriteFailed(e2))
            | (GatewireError::ReadFailed(e1), GatewireError::ReadFailed(e2)) => {
                e1.kind() == e2.kind()
            }
            (GatewireError::MalformedMessage(s1), GatewireError::MalformedMessage(s2)) => s1 == s2,
            (
                GatewireError::FieldTypeError { tag: t1, .. },
                GatewireError::FieldTypeError { tag: t2, .. },
            ) => t1 == t2,
            (GatewireError::RequestTimeout(d1), GatewireError::RequestTimeout(d2)) => d1 == d2,
            (GatewireError::InvalidState(s1), GatewireError::InvalidState(s2)) => s1 == s2,
            (GatewireError::Internal(s1), GatewireError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

/// A bare io error outside a read or write context is a read failure; send
/// paths map their errors to `WriteFailed` explicitly.
impl From<std::io::Error> for GatewireError {
    fn from(e: std::io::Error) -> Self {
        GatewireError::ReadFailed(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for GatewireError {
    fn from(e: std::str::Utf8Error) -> Self {
        GatewireError::MalformedMessage(format!("invalid UTF-8: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for GatewireError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GatewireError::MalformedMessage(format!("invalid UTF-8: {e}"))
    }
}
