// src/core/gateway/mod.rs

//! The outward-facing entry point: `GatewayContext` ties the transport,
//! session and cache layers into single request/response calls.

mod context;
mod status;

pub use context::{CallOutcome, CallRequest, GatewayContext};
pub use status::BackendStatus;
