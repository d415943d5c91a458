// src/core/transport/address.rs

//! Defines `TransportAddress`, the immutable name of a backend endpoint plus
//! its optional TLS negotiation policy.

use super::stream::{AnyStream, PlainStream};
use super::tls;
use crate::core::GatewireError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::net::{TcpSocket, lookup_host};
#[cfg(unix)]
use tokio::net::UnixSocket;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, warn};

/// Where a backend listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A local stream socket path.
    Local(PathBuf),
    /// A TCP host and port. The host is resolved at connect time.
    Tcp { host: String, port: u16 },
}

/// The raw, possibly partial, TLS attributes of an endpoint as they appear in
/// configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TlsAttributes {
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub cipher: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl TlsAttributes {
    /// Names the attributes that are absent or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.key_path.as_deref().is_none_or(|p| p.as_os_str().is_empty()) {
            missing.push("key_path");
        }
        if self.cert_path.as_deref().is_none_or(|p| p.as_os_str().is_empty()) {
            missing.push("cert_path");
        }
        if self.cipher.as_deref().is_none_or(|c| c.trim().is_empty()) {
            missing.push("cipher");
        }
        if self.version.as_deref().is_none_or(|v| v.trim().is_empty()) {
            missing.push("version");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Converts into an enforceable policy, or `None` when any attribute is
    /// missing.
    pub fn into_policy(self) -> Option<TlsPolicy> {
        match (self.key_path, self.cert_path, self.cipher, self.version) {
            (Some(key_path), Some(cert_path), Some(cipher), Some(version))
                if !key_path.as_os_str().is_empty()
                    && !cert_path.as_os_str().is_empty()
                    && !cipher.trim().is_empty()
                    && !version.trim().is_empty() =>
            {
                Some(TlsPolicy {
                    key_path,
                    cert_path,
                    cipher,
                    version,
                })
            }
            _ => None,
        }
    }
}

/// A complete TLS policy. Only constructed from attributes with all four
/// members present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlsPolicy {
    key_path: PathBuf,
    cert_path: PathBuf,
    cipher: String,
    version: String,
}

impl TlsPolicy {
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }
    pub fn cipher(&self) -> &str {
        &self.cipher
    }
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// An address-family specific socket that has not been connected yet.
#[derive(Debug)]
enum SocketKind {
    Tcp { host: String, port: u16 },
    #[cfg(unix)]
    Unix { socket: UnixSocket, path: PathBuf },
}

/// The unconnected channel returned by `TransportAddress::new_socket`. When
/// the address carries a TLS policy the socket is already decorated with the
/// connector, so the handshake happens inside `connect_socket`.
pub struct UnconnectedSocket {
    kind: SocketKind,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl UnconnectedSocket {
    pub fn is_tls_decorated(&self) -> bool {
        self.tls.is_some()
    }
}

impl fmt::Debug for UnconnectedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnconnectedSocket")
            .field("kind", &self.kind)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Names a reachable backend endpoint. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    endpoint: Endpoint,
    tls: Option<TlsPolicy>,
}

impl TransportAddress {
    /// A plaintext address for a local stream socket.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: Endpoint::Local(path.into()),
            tls: None,
        }
    }

    /// A plaintext address for a TCP host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::Tcp {
                host: host.into(),
                port,
            },
            tls: None,
        }
    }

    /// Decorates the address with TLS. Partial attributes leave the address in
    /// plaintext; the missing attribute names are logged.
    pub fn with_tls(mut self, attributes: TlsAttributes) -> Self {
        let missing = attributes.missing();
        if missing.len() < 4 && !missing.is_empty() {
            warn!(
                "Incomplete TLS configuration for {} (missing: {}); using plaintext.",
                self.describe(),
                missing.join(", ")
            );
        }
        self.tls = attributes.into_policy();
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn tls_policy(&self) -> Option<&TlsPolicy> {
        self.tls.as_ref()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// A diagnostic rendering of the address. Never includes key or
    /// certificate material.
    pub fn describe(&self) -> String {
        let scheme = if self.tls.is_some() { "tls+" } else { "" };
        match &self.endpoint {
            Endpoint::Local(path) => format!("{scheme}unix:{}", path.display()),
            Endpoint::Tcp { host, port } => format!("{scheme}tcp://{host}:{port}"),
        }
    }

    /// Returns an unconnected socket appropriate to the address family,
    /// decorated with TLS when the address carries a policy.
    pub fn new_socket(&self) -> Result<UnconnectedSocket, GatewireError> {
        let kind = match &self.endpoint {
            Endpoint::Tcp { host, port } => SocketKind::Tcp {
                host: host.clone(),
                port: *port,
            },
            #[cfg(unix)]
            Endpoint::Local(path) => SocketKind::Unix {
                socket: UnixSocket::new_stream()
                    .map_err(|e| GatewireError::connect_failed(self.describe(), e))?,
                path: path.clone(),
            },
            #[cfg(not(unix))]
            Endpoint::Local(_) => {
                return Err(GatewireError::connect_failed(
                    self.describe(),
                    "local socket paths are not supported on this platform",
                ));
            }
        };

        let tls = match &self.tls {
            Some(policy) => {
                let connector = tls::build_connector(policy)
                    .map_err(|e| GatewireError::connect_failed(self.describe(), e))?;
                Some((connector, self.server_name()?))
            }
            None => None,
        };

        Ok(UnconnectedSocket { kind, tls })
    }

    /// Performs the connect handshake, followed by the TLS handshake when the
    /// socket was decorated. A single attempt; no retry.
    pub async fn connect_socket(
        &self,
        socket: UnconnectedSocket,
    ) -> Result<AnyStream, GatewireError> {
        let plain = match socket.kind {
            SocketKind::Tcp { host, port } => {
                let addr = lookup_host((host.as_str(), port))
                    .await
                    .map_err(|e| GatewireError::connect_failed(self.describe(), e))?
                    .next()
                    .ok_or_else(|| {
                        GatewireError::connect_failed(self.describe(), "host resolved to no address")
                    })?;
                let tcp = if addr.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(|e| GatewireError::connect_failed(self.describe(), e))?;
                let stream = tcp
                    .connect(addr)
                    .await
                    .map_err(|e| GatewireError::connect_failed(self.describe(), e))?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY on {}: {e}", self.describe());
                }
                PlainStream::Tcp(stream)
            }
            #[cfg(unix)]
            SocketKind::Unix { socket, path } => {
                let stream = socket
                    .connect(&path)
                    .await
                    .map_err(|e| GatewireError::connect_failed(self.describe(), e))?;
                PlainStream::Unix(stream)
            }
        };

        match socket.tls {
            None => Ok(AnyStream::Plain(plain)),
            Some((connector, server_name)) => {
                debug!("Starting TLS handshake with {}", self.describe());
                let tls_stream = connector.connect(server_name, plain).await.map_err(|e| {
                    GatewireError::connect_failed(self.describe(), format!("TLS handshake failed: {e}"))
                })?;
                Ok(AnyStream::Tls(Box::new(tls_stream)))
            }
        }
    }

    fn server_name(&self) -> Result<ServerName<'static>, GatewireError> {
        let host = match &self.endpoint {
            Endpoint::Tcp { host, .. } => host.as_str(),
            Endpoint::Local(_) => "localhost",
        };
        ServerName::try_from(host)
            .map(|name| name.to_owned())
            .map_err(|_| GatewireError::connect_failed(self.describe(), "Invalid TLS domain name"))
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
