// src/core/transport/mod.rs

//! Endpoint naming, socket creation and the optional TLS decoration.

mod address;
mod stream;
mod tls;

pub use address::{Endpoint, TlsAttributes, TlsPolicy, TransportAddress, UnconnectedSocket};
pub use stream::{AnyStream, PlainStream};
