// src/connection/link.rs

//! Defines `Connection`, a single bidirectional channel bound to one
//! `TransportAddress`. It frames messages but never interprets them.

use super::channel::{ChannelOptions, RequestChannel};
use super::guard::ConnectionGuard;
use crate::core::GatewireError;
use crate::core::protocol::{WireMessage, WireMessageCodec};
use crate::core::transport::{AnyStream, TransportAddress};
use bytes::BytesMut;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf, split};
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, info};

pub(crate) type MessageReader = FramedRead<ReadHalf<AnyStream>, WireMessageCodec>;

/// The write half of a connected socket plus its encode buffer.
pub(crate) struct MessageWriter {
    half: WriteHalf<AnyStream>,
    codec: WireMessageCodec,
    buf: BytesMut,
}

impl MessageWriter {
    fn new(half: WriteHalf<AnyStream>) -> Self {
        Self {
            half,
            codec: WireMessageCodec::new(),
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Writes one fully serialized message. Any socket error, including a
    /// partial write, is `WriteFailed`.
    pub(crate) async fn write(&mut self, message: &WireMessage) -> Result<(), GatewireError> {
        self.buf.clear();
        Encoder::<&WireMessage>::encode(&mut self.codec, message, &mut self.buf)?;
        self.half
            .write_all(&self.buf)
            .await
            .map_err(|e| GatewireError::WriteFailed(Arc::new(e)))?;
        self.half
            .flush()
            .await
            .map_err(|e| GatewireError::WriteFailed(Arc::new(e)))
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Err(e) = self.half.shutdown().await {
            debug!("Error while shutting down connection: {e}");
        }
    }
}

/// The resources of a connected socket.
pub(crate) struct Live {
    pub(crate) reader: MessageReader,
    pub(crate) writer: MessageWriter,
    pub(crate) guard: ConnectionGuard,
}

enum LinkState {
    Unconnected,
    Connected(Box<Live>),
    Closed,
}

/// The externally visible lifecycle state of a `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

/// A single backend connection: unconnected → connected → closed.
pub struct Connection {
    address: TransportAddress,
    connect_timeout: Option<Duration>,
    tls_active: bool,
    state: LinkState,
}

impl Connection {
    pub fn new(address: TransportAddress) -> Self {
        Self {
            address,
            connect_timeout: None,
            tls_active: false,
            state: LinkState::Unconnected,
        }
    }

    /// Bounds the connect (and TLS handshake) attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> &TransportAddress {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        match self.state {
            LinkState::Unconnected => ConnectionState::Unconnected,
            LinkState::Connected(_) => ConnectionState::Connected,
            LinkState::Closed => ConnectionState::Closed,
        }
    }

    /// True once connected over TLS.
    pub fn is_tls(&self) -> bool {
        self.tls_active
    }

    /// Opens the socket. A single attempt: failures surface as
    /// `ConnectFailed` and retry policy belongs to the caller.
    pub async fn connect(&mut self) -> Result<(), GatewireError> {
        match self.state {
            LinkState::Unconnected => {}
            LinkState::Connected(_) => {
                return Err(GatewireError::InvalidState(format!(
                    "connection to {} is already connected",
                    self.address
                )));
            }
            LinkState::Closed => return Err(GatewireError::ConnectionClosed),
        }

        let socket = self.address.new_socket()?;
        let connecting = self.address.connect_socket(socket);
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| {
                    GatewireError::connect_failed(
                        self.address.describe(),
                        format!("timed out after {limit:?}"),
                    )
                })??,
            None => connecting.await?,
        };

        self.tls_active = stream.is_tls();
        let (reader, writer) = split(stream);
        self.state = LinkState::Connected(Box::new(Live {
            reader: FramedRead::new(reader, WireMessageCodec::new()),
            writer: MessageWriter::new(writer),
            guard: ConnectionGuard::new(self.address.describe()),
        }));
        info!(
            "Connected to {} ({}).",
            self.address,
            if self.tls_active { "tls" } else { "plaintext" }
        );
        Ok(())
    }

    /// Writes one message. A write failure closes the connection.
    pub async fn send(&mut self, message: &WireMessage) -> Result<(), GatewireError> {
        let live = self.live_mut()?;
        let result = live.writer.write(message).await;
        if result.is_err() {
            self.state = LinkState::Closed;
        }
        result
    }

    /// Waits for the next complete message. End of stream is
    /// `ConnectionClosed`; a socket or framing error is returned as is. Both
    /// leave the connection closed.
    pub async fn receive(&mut self) -> Result<WireMessage, GatewireError> {
        let live = self.live_mut()?;
        let next = live.reader.next().await;
        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => {
                self.state = LinkState::Closed;
                Err(e)
            }
            None => {
                self.state = LinkState::Closed;
                Err(GatewireError::ConnectionClosed)
            }
        }
    }

    /// Releases the socket. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let LinkState::Connected(mut live) =
            std::mem::replace(&mut self.state, LinkState::Closed)
        {
            live.writer.shutdown().await;
            debug!("Closed connection to {}", self.address);
        }
    }

    /// Hands the connected socket to a `RequestChannel`, which reads in the
    /// background and correlates replies by request key.
    pub fn into_channel(self, options: ChannelOptions) -> Result<Arc<RequestChannel>, GatewireError> {
        match self.state {
            LinkState::Connected(live) => Ok(RequestChannel::spawn(self.address, *live, options)),
            LinkState::Unconnected => Err(GatewireError::InvalidState(format!(
                "connection to {} is not connected",
                self.address
            ))),
            LinkState::Closed => Err(GatewireError::ConnectionClosed),
        }
    }

    fn live_mut(&mut self) -> Result<&mut Live, GatewireError> {
        match &mut self.state {
            LinkState::Connected(live) => Ok(live),
            LinkState::Unconnected | LinkState::Closed => Err(GatewireError::ConnectionClosed),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address.describe())
            .field("state", &self.state())
            .field("tls", &self.tls_active)
            .finish()
    }
}
