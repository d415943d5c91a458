// src/core/gateway/context.rs

use super::status::BackendStatus;
use crate::config::Config;
use crate::connection::{ChannelOptions, Connection, RequestChannel};
use crate::core::GatewireError;
use crate::core::cache::{ObjectCache, ObjectType};
use crate::core::protocol::{WireMessage, tags};
use crate::core::session::{SessionContext, SessionPool};
use crate::core::transport::TransportAddress;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One round trip to a backend.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub address: TransportAddress,
    pub message: WireMessage,
    /// Runs the call under this session's guard, reusing its pooled
    /// connection and token. Without a session the call gets a fresh
    /// connection that is closed afterwards.
    pub session: Option<Arc<SessionContext>>,
    /// Overrides the configured request timeout.
    pub timeout: Option<Duration>,
}

impl CallRequest {
    pub fn new(address: TransportAddress, message: WireMessage) -> Self {
        Self {
            address,
            message,
            session: None,
            timeout: None,
        }
    }

    pub fn with_session(mut self, session: Arc<SessionContext>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The result of a completed round trip.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub status: BackendStatus,
    /// The final reply part.
    pub reply: WireMessage,
    /// Every reply part, in arrival order.
    pub parts: Vec<WireMessage>,
}

/// The per-process gateway state: configuration, the object cache and the
/// session pool. Owned by the embedding application and passed explicitly.
#[derive(Debug)]
pub struct GatewayContext {
    config: Config,
    cache: Arc<ObjectCache>,
    sessions: SessionPool,
    unsolicited: mpsc::Sender<WireMessage>,
    ingest_task: JoinHandle<()>,
}

impl GatewayContext {
    /// Builds the context and spawns the task that feeds unsolicited pushes
    /// into the cache. Must be called inside a Tokio runtime.
    pub fn start(config: Config) -> Arc<Self> {
        let cache = Arc::new(ObjectCache::new());
        let (tx, rx) = mpsc::channel(config.unsolicited_queue_capacity.max(1));
        let ingest_task = tokio::spawn(ingest_loop(rx, Arc::clone(&cache)));
        info!(
            "Gateway context started with {} configured endpoints.",
            config.endpoints.len()
        );
        Arc::new(Self {
            config,
            cache,
            sessions: SessionPool::new(),
            unsolicited: tx,
            ingest_task,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// Resolves a named endpoint from the configuration.
    pub fn endpoint(&self, name: &str) -> Result<TransportAddress, GatewireError> {
        self.config
            .endpoints
            .get(name)
            .ok_or_else(|| GatewireError::InvalidState(format!("unknown endpoint '{name}'")))?
            .to_address()
    }

    /// The pooled session for `identity`, created on first use.
    pub fn session(&self, identity: &str, address: &TransportAddress) -> Arc<SessionContext> {
        self.sessions.get_or_create(identity, address)
    }

    /// Opens a pipelined channel to `address` whose unsolicited messages feed
    /// the cache.
    pub async fn open_channel(
        &self,
        address: &TransportAddress,
    ) -> Result<Arc<RequestChannel>, GatewireError> {
        let mut connection =
            Connection::new(address.clone()).with_connect_timeout(self.config.connect_timeout);
        connection.connect().await?;
        connection.into_channel(ChannelOptions {
            correlation: self.config.correlation,
            unsolicited: Some(self.unsolicited.clone()),
        })
    }

    /// Performs one round trip and translates the reply's status. Object
    /// payloads in the reply are folded into the cache; a cache failure is
    /// logged and does not fail the call.
    pub async fn call(&self, request: CallRequest) -> Result<CallOutcome, GatewireError> {
        let CallRequest {
            address,
            message,
            session,
            timeout,
        } = request;
        let wait = timeout.unwrap_or(self.config.request_timeout);

        let parts = match session {
            Some(session) => self.call_in_session(&session, &address, message, wait).await?,
            None => self.call_once(&address, message, wait).await?,
        };

        ingest_objects(&self.cache, &parts);
        let reply = parts
            .last()
            .cloned()
            .ok_or_else(|| GatewireError::Internal("call completed with no reply".into()))?;
        Ok(CallOutcome {
            status: BackendStatus::from_reply(&reply),
            reply,
            parts,
        })
    }

    /// Drops sessions idle longer than the configured `session_idle_timeout`.
    pub async fn purge_idle_sessions(&self) -> usize {
        self.sessions
            .purge_idle(self.config.session_idle_timeout)
            .await
    }

    async fn call_once(
        &self,
        address: &TransportAddress,
        message: WireMessage,
        wait: Duration,
    ) -> Result<Vec<WireMessage>, GatewireError> {
        let channel = self.open_channel(address).await?;
        let result = channel.request_parts(message, wait).await;
        channel.close().await;
        result
    }

    async fn call_in_session(
        &self,
        session: &SessionContext,
        address: &TransportAddress,
        mut message: WireMessage,
        wait: Duration,
    ) -> Result<Vec<WireMessage>, GatewireError> {
        if session.address() != address {
            return Err(GatewireError::InvalidState(format!(
                "session '{}' is bound to {}, not {}",
                session.identity(),
                session.address(),
                address
            )));
        }

        let mut guard = session.lock().await?;
        guard.with_request(&mut message)?;

        let channel = match guard.channel() {
            Some(channel) => channel,
            None => {
                let channel = self.open_channel(address).await?;
                guard.install_channel(Arc::clone(&channel));
                channel
            }
        };

        let parts = match channel.request_parts(message, wait).await {
            Ok(parts) => parts,
            Err(e) => {
                let exhausted = matches!(e, GatewireError::RequestTimeout(_))
                    && channel.consecutive_timeouts() >= self.config.max_consecutive_timeouts;
                if exhausted || e.is_transport() || channel.is_closed() {
                    if exhausted {
                        warn!(
                            "Retiring channel to {} after {} consecutive timeouts.",
                            address,
                            channel.consecutive_timeouts()
                        );
                    }
                    guard.retire_channel().await;
                }
                return Err(e);
            }
        };

        for part in &parts {
            guard.observe_response(part)?;
        }
        Ok(parts)
    }
}

impl Drop for GatewayContext {
    fn drop(&mut self) {
        self.ingest_task.abort();
    }
}

/// Folds every object payload among `parts` into the cache, one batch per
/// type.
fn ingest_objects(cache: &ObjectCache, parts: &[WireMessage]) {
    let mut batches: BTreeMap<ObjectType, Vec<WireMessage>> = BTreeMap::new();
    for part in parts {
        if let Some(object_type) = part.get(tags::OBJECT_TYPE) {
            batches
                .entry(ObjectType::from(object_type))
                .or_default()
                .push(part.clone());
        }
    }
    for (object_type, batch) in batches {
        if let Err(e) = cache.update_messages(batch, &object_type) {
            warn!("Discarding object batch: {}", e);
        }
    }
}

async fn ingest_loop(mut rx: mpsc::Receiver<WireMessage>, cache: Arc<ObjectCache>) {
    while let Some(message) = rx.recv().await {
        if message.contains(tags::OBJECT_TYPE) {
            ingest_objects(&cache, std::slice::from_ref(&message));
        } else {
            debug!("Ignoring unsolicited message {:?}", message);
        }
    }
}
