// src/core/session/mod.rs

//! Session contexts and the per-process session pool.
//!
//! # Core Design: Serializing Authentication Exchanges
//!
//! Two requests sharing a session must never race on login or token refresh:
//! a refreshed token observed out of order would silently de-authenticate a
//! request that believed it still held a valid one. Every request therefore
//! acquires the session's async guard before attaching the token and keeps it
//! until `observe_response` has applied the reply. The guard is a
//! `tokio::sync::Mutex`, so a second task waiting on it is suspended, not
//! spinning, and resumes only after release.

mod context;
mod pool;

pub use context::{
    AuthState, AuthToken, AuthTransition, SessionContext, SessionGuard, is_duplicate_login,
};
pub use pool::SessionPool;
