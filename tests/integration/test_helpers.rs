// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests: a scriptable mock backend
//! that speaks the tag-value wire format over TCP or a local socket.

use futures::{SinkExt, StreamExt};
use gatewire::WireMessage;
use gatewire::config::Config;
use gatewire::core::protocol::{WireMessageCodec, tags};
use gatewire::core::transport::TransportAddress;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// What the mock backend does with one request.
#[derive(Debug, Clone)]
pub enum Script {
    /// Writes these messages back immediately, in order.
    Reply(Vec<WireMessage>),
    /// Writes these messages back after a delay, without blocking later
    /// requests on the same connection.
    Delayed(Duration, Vec<WireMessage>),
    /// Never answers.
    Silent,
    /// Closes the connection.
    Hangup,
}

type Responder = Arc<dyn Fn(&WireMessage) -> Script + Send + Sync>;

/// A scriptable backend listening on an ephemeral port (or a socket path).
pub struct MockBackend {
    pub address: TransportAddress,
    received: Arc<Mutex<Vec<WireMessage>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockBackend {
    /// Starts a TCP backend on 127.0.0.1 answering with `responder`.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&WireMessage) -> Script + Send + Sync + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let responder: Responder = Arc::new(responder);
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        Arc::clone(&responder),
                        Arc::clone(&received),
                    ));
                }
            })
        };

        Self {
            address: TransportAddress::tcp("127.0.0.1", port),
            received,
            connections,
            task,
        }
    }

    /// Starts a backend on a local socket at `path`.
    #[cfg(unix)]
    pub async fn start_local<F>(path: &std::path::Path, responder: F) -> Self
    where
        F: Fn(&WireMessage) -> Script + Send + Sync + 'static,
    {
        init_tracing();
        let listener = tokio::net::UnixListener::bind(path).unwrap();
        let responder: Responder = Arc::new(responder);
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        Arc::clone(&responder),
                        Arc::clone(&received),
                    ));
                }
            })
        };

        Self {
            address: TransportAddress::local(path),
            received,
            connections,
            task,
        }
    }

    /// An echo backend: every request gets `reply_to(request)`.
    pub async fn echo() -> Self {
        Self::start(|req| Script::Reply(vec![reply_to(req)])).await
    }

    /// Every message the backend has read, in arrival order.
    pub fn received(&self) -> Vec<WireMessage> {
        self.received.lock().unwrap().clone()
    }

    /// The number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// A config with a short timeout and this backend registered as `mock`.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.request_timeout = Duration::from_secs(5);
        config.connect_timeout = Duration::from_secs(5);
        if let gatewire::core::transport::Endpoint::Tcp { host, port } = self.address.endpoint() {
            config.endpoints.insert(
                "mock".to_string(),
                gatewire::config::EndpointConfig {
                    host: Some(host.clone()),
                    port: Some(*port),
                    ..Default::default()
                },
            );
        }
        config
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<S>(stream: S, responder: Responder, received: Arc<Mutex<Vec<WireMessage>>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = Framed::new(stream, WireMessageCodec::new()).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(request)) = source.next().await {
        received.lock().unwrap().push(request.clone());
        match responder(&request) {
            Script::Reply(replies) => {
                for reply in replies {
                    let _ = tx.send(reply);
                }
            }
            Script::Delayed(delay, replies) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for reply in replies {
                        let _ = tx.send(reply);
                    }
                });
            }
            Script::Silent => {}
            Script::Hangup => break,
        }
    }
    writer.abort();
}

/// A success reply to `request`: echoes its command and request id.
pub fn reply_to(request: &WireMessage) -> WireMessage {
    let mut reply = WireMessage::new();
    if let Some(command) = request.command() {
        reply.set(tags::COMMAND, command).unwrap();
    }
    if let Some(id) = request.get(tags::REQUEST_ID) {
        reply.set(tags::REQUEST_ID, id).unwrap();
    }
    reply.set(tags::STATUS, tags::STATUS_OK).unwrap();
    reply
}

/// `reply_to(request)` plus extra fields.
pub fn reply_with(request: &WireMessage, fields: &[(&str, &str)]) -> WireMessage {
    let mut reply = reply_to(request);
    for (tag, value) in fields {
        reply.set(tag, *value).unwrap();
    }
    reply
}

/// Builds a message from tag-value pairs.
pub fn message(fields: &[(&str, &str)]) -> WireMessage {
    let mut msg = WireMessage::new();
    for (tag, value) in fields {
        msg.set(tag, *value).unwrap();
    }
    msg
}

/// Polls `condition` every 10ms until it holds or `limit` passes.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn init_tracing() {
    // Initialize tracing (ignore error if already initialized)
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
