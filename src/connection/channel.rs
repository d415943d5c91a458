// src/connection/channel.rs

//! Defines `RequestChannel`: a connected socket whose reads run on a
//! background task, so several requests can be pipelined on one connection
//! and their replies matched by request key regardless of arrival order.

use super::guard::ConnectionGuard;
use super::link::{Live, MessageReader, MessageWriter};
use crate::core::dispatch::{
    AwaitHandler, ForwardHandler, HandlerRegistry, RequestKey, ResponseHandler,
};
use crate::core::metrics;
use crate::core::protocol::{WireMessage, tags};
use crate::core::transport::TransportAddress;
use crate::core::GatewireError;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// How requests on a channel are correlated with their replies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Correlation {
    /// Each request is stamped with a unique `RI` tag that the backend echoes.
    #[default]
    RequestId,
    /// Replies are matched by command. Only one request per command may be in
    /// flight on the channel at a time.
    Command,
}

/// Construction options for a `RequestChannel`.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    pub correlation: Correlation,
    /// Receives messages that matched no handler. Without a sink they are
    /// dropped after logging.
    pub unsolicited: Option<mpsc::Sender<WireMessage>>,
}

struct WriteSide {
    writer: MessageWriter,
    _guard: ConnectionGuard,
}

/// A pipelined, correlated channel to one backend endpoint.
pub struct RequestChannel {
    id: Uuid,
    address: TransportAddress,
    correlation: Correlation,
    /// Serializes writes so a message is never interleaved with another.
    /// `None` once closed.
    write_side: Mutex<Option<WriteSide>>,
    registry: Arc<HandlerRegistry>,
    next_request_id: AtomicU64,
    consecutive_timeouts: AtomicU32,
    closed: Arc<AtomicBool>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RequestChannel {
    pub(crate) fn spawn(address: TransportAddress, live: Live, options: ChannelOptions) -> Arc<Self> {
        let Live {
            reader,
            writer,
            guard,
        } = live;
        let registry = Arc::new(HandlerRegistry::new());
        let closed = Arc::new(AtomicBool::new(false));
        let id = Uuid::new_v4();

        let task = tokio::spawn(read_loop(
            id,
            reader,
            Arc::clone(&registry),
            address.clone(),
            Arc::clone(&closed),
            options.unsolicited,
        ));

        Arc::new(Self {
            id,
            address,
            correlation: options.correlation,
            write_side: Mutex::new(Some(WriteSide {
                writer,
                _guard: guard,
            })),
            registry,
            next_request_id: AtomicU64::new(1),
            consecutive_timeouts: AtomicU32::new(0),
            closed,
            reader_task: parking_lot::Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &TransportAddress {
        &self.address
    }

    pub fn correlation(&self) -> Correlation {
        self.correlation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The number of timeouts since the last successful round trip. Callers
    /// retire the channel once this crosses their threshold.
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::Relaxed)
    }

    /// The number of requests awaiting a reply.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// Writes one message without registering any handler.
    pub async fn send(&self, message: &WireMessage) -> Result<(), GatewireError> {
        if self.is_closed() {
            return Err(GatewireError::ConnectionClosed);
        }
        let mut slot = self.write_side.lock().await;
        let Some(side) = slot.as_mut() else {
            return Err(GatewireError::ConnectionClosed);
        };
        if let Err(e) = side.writer.write(message).await {
            *slot = None;
            drop(slot);
            warn!("Write to {} failed, closing channel: {}", self.address, e);
            self.mark_closed(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Sends `message` and waits up to `wait` for its final reply part.
    pub async fn request(
        &self,
        message: WireMessage,
        wait: Duration,
    ) -> Result<WireMessage, GatewireError> {
        self.request_parts(message, wait)
            .await?
            .pop()
            .ok_or_else(|| GatewireError::Internal("completed request with no reply".into()))
    }

    /// Sends `message` and waits up to `wait` for every part of its reply.
    ///
    /// On timeout the registration is removed, so a reply arriving later is
    /// treated as unmatched. The connection itself is not assumed broken.
    pub async fn request_parts(
        &self,
        message: WireMessage,
        wait: Duration,
    ) -> Result<Vec<WireMessage>, GatewireError> {
        let (message, key) = self.prepare(message)?;
        let (handler, completion) = AwaitHandler::new();
        let generation = self
            .registry
            .register(key.clone(), ResponseHandler::Await(handler))?;

        metrics::REQUESTS_TOTAL.inc();
        let _timer = metrics::REQUEST_LATENCY_SECONDS.start_timer();

        if let Err(e) = self.send(&message).await {
            self.registry.unregister_if(&key, generation);
            return Err(e);
        }

        match tokio::time::timeout(wait, completion).await {
            Ok(Ok(result)) => {
                if result.is_ok() {
                    self.consecutive_timeouts.store(0, Ordering::Relaxed);
                }
                result
            }
            // The handler was dropped without completing.
            Ok(Err(_)) => Err(GatewireError::ConnectionClosed),
            Err(_) => {
                self.registry.unregister_if(&key, generation);
                let count = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::REQUEST_TIMEOUTS_TOTAL.inc();
                warn!(
                    "Request {:?} to {} timed out after {:?} ({} consecutive).",
                    key, self.address, wait, count
                );
                Err(GatewireError::RequestTimeout(wait))
            }
        }
    }

    /// Sends `message` and relays its reply parts to `destination` as they
    /// arrive. A registration whose reply never completes is dropped after
    /// `ttl`.
    pub async fn forward(
        &self,
        message: WireMessage,
        destination: Arc<RequestChannel>,
        ttl: Duration,
    ) -> Result<(), GatewireError> {
        let (message, key) = self.prepare(message)?;
        let generation = self.registry.register(
            key.clone(),
            ResponseHandler::Forward(ForwardHandler::new(destination)),
        )?;
        if let Err(e) = self.send(&message).await {
            self.registry.unregister_if(&key, generation);
            return Err(e);
        }

        let registry: Weak<HandlerRegistry> = Arc::downgrade(&self.registry);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(registry) = registry.upgrade() {
                if registry.unregister_if(&key, generation).is_some() {
                    debug!("Forward registration {:?} expired after {:?}.", key, ttl);
                }
            }
        });
        Ok(())
    }

    /// Shuts the socket down and fails every outstanding request with
    /// `ConnectionClosed`. Idempotent.
    pub async fn close(&self) {
        self.mark_closed(&GatewireError::ConnectionClosed);
        let side = self.write_side.lock().await.take();
        if let Some(mut side) = side {
            side.writer.shutdown().await;
            debug!("Closed channel {} to {}", self.id, self.address);
        }
    }

    /// Retires the channel without waiting: stops the reader and fails
    /// outstanding requests. The socket is released when the last handle
    /// drops.
    pub fn abort(&self) {
        self.mark_closed(&GatewireError::ConnectionClosed);
        if let Ok(mut slot) = self.write_side.try_lock() {
            slot.take();
        }
    }

    /// Stamps a request id when correlating by id and derives the key.
    fn prepare(&self, mut message: WireMessage) -> Result<(WireMessage, RequestKey), GatewireError> {
        if self.is_closed() {
            return Err(GatewireError::ConnectionClosed);
        }
        match self.correlation {
            Correlation::RequestId => {
                if !message.contains(tags::REQUEST_ID) {
                    let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                    message.set(tags::REQUEST_ID, id.to_string())?;
                }
            }
            Correlation::Command => {
                message.remove(tags::REQUEST_ID);
            }
        }
        let key = RequestKey::for_message(&message).ok_or_else(|| {
            GatewireError::InvalidState("request has neither a request id nor a command".into())
        })?;
        Ok((message, key))
    }

    fn mark_closed(&self, reason: &GatewireError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        self.registry.fail_all(reason);
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("id", &self.id)
            .field("address", &self.address.describe())
            .field("correlation", &self.correlation)
            .field("pending", &self.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Reads every incoming message and dispatches it. Runs until the peer
/// closes the stream or a read/framing error occurs, then fails whatever is
/// still outstanding.
async fn read_loop(
    channel_id: Uuid,
    mut reader: MessageReader,
    registry: Arc<HandlerRegistry>,
    origin: TransportAddress,
    closed: Arc<AtomicBool>,
    unsolicited: Option<mpsc::Sender<WireMessage>>,
) {
    let failure = loop {
        match reader.next().await {
            Some(Ok(message)) => {
                let Some(unmatched) = registry.dispatch(message, &origin) else {
                    continue;
                };
                metrics::UNMATCHED_REPLIES_TOTAL.inc();
                match &unsolicited {
                    Some(tx) => {
                        if let Err(e) = tx.try_send(unmatched) {
                            warn!("Dropping unsolicited message from {}: {}", origin, e);
                        }
                    }
                    None => debug!(
                        "Dropping unmatched message from {}: {:?}",
                        origin, unmatched
                    ),
                }
            }
            Some(Err(e)) => {
                warn!("Channel {} to {} failed: {}", channel_id, origin, e);
                break e;
            }
            None => {
                debug!("Channel {} to {} closed by peer.", channel_id, origin);
                break GatewireError::ConnectionClosed;
            }
        }
    };
    closed.store(true, Ordering::Release);
    registry.fail_all(&failure);
}
