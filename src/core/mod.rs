// src/core/mod.rs

//! The central module containing the gateway's protocol, transport, session
//! and cache logic.

pub mod cache;
pub mod dispatch;
pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod transport;

pub use errors::GatewireError;
pub use protocol::WireMessage;
