// src/core/gateway/status.rs

use crate::core::protocol::{WireMessage, tags};

/// The backend's verdict on a request, as reported in a reply's `ST` and `ER`
/// fields. This is a value the caller inspects, not an error: the round trip
/// itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Ok,
    PermissionDenied(String),
    Failure(String),
}

impl BackendStatus {
    /// Translates a reply. A missing `ST` counts as success unless an `ER`
    /// text is present.
    pub fn from_reply(reply: &WireMessage) -> Self {
        let error = reply.get(tags::ERROR).unwrap_or_default().to_string();
        match reply.get(tags::STATUS) {
            Some(tags::STATUS_OK) => BackendStatus::Ok,
            Some(tags::STATUS_DENIED) => BackendStatus::PermissionDenied(error),
            None if error.is_empty() => BackendStatus::Ok,
            None => BackendStatus::Failure(error),
            Some(other) if error.is_empty() => BackendStatus::Failure(other.to_string()),
            Some(_) => BackendStatus::Failure(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BackendStatus::Ok)
    }
}
