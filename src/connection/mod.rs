// src/connection/mod.rs

//! Manages the lifecycle of backend connections: the raw `Connection`
//! (connect/send/receive/close) and the pipelined `RequestChannel` built on top
//! of it.

mod channel;
mod guard;
mod link;

pub use channel::{ChannelOptions, Correlation, RequestChannel};
pub use guard::ConnectionGuard;
pub use link::{Connection, ConnectionState};
