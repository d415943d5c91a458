// src/core/session/pool.rs

use super::context::SessionContext;
use crate::core::transport::TransportAddress;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns every `SessionContext` of the process, keyed by identity.
#[derive(Debug, Default)]
pub struct SessionPool {
    sessions: DashMap<String, Arc<SessionContext>>,
}

impl SessionPool {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the session for `identity`, creating it on first use. A
    /// poisoned session is never handed out again: it is replaced by a fresh,
    /// unauthenticated one. Holders of the old handle keep failing fast. A
    /// session whose address changed is replaced the same way, and the
    /// replaced session's pooled channel is aborted.
    pub fn get_or_create(&self, identity: &str, address: &TransportAddress) -> Arc<SessionContext> {
        let mut entry = self
            .sessions
            .entry(identity.to_string())
            .or_insert_with(|| {
                debug!("Creating session for '{}' at {}", identity, address);
                Arc::new(SessionContext::new(identity, address.clone()))
            });
        if !entry.is_poisoned() && entry.address() == address {
            return Arc::clone(entry.value());
        }
        debug!("Replacing session for '{}'", identity);
        let fresh = Arc::new(SessionContext::new(identity, address.clone()));
        let replaced = std::mem::replace(entry.value_mut(), Arc::clone(&fresh));
        drop(entry);
        release_channel(&replaced);
        fresh
    }

    pub fn get(&self, identity: &str) -> Option<Arc<SessionContext>> {
        self.sessions.get(identity).map(|s| Arc::clone(s.value()))
    }

    /// Removes the session and closes its pooled channel if it is idle.
    pub async fn remove(&self, identity: &str) -> Option<Arc<SessionContext>> {
        let (_, session) = self.sessions.remove(identity)?;
        if let Ok(Some(channel)) = session.try_take_channel() {
            channel.close().await;
        }
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops sessions idle for longer than `max_idle`, plus any poisoned
    /// ones, closing their channels. Sessions currently locked are skipped.
    /// Returns the number removed.
    pub async fn purge_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_poisoned() || s.idle_for() > max_idle)
            .map(|s| s.key().clone())
            .collect();

        let mut removed = 0;
        for identity in candidates {
            let Some((_, session)) = self
                .sessions
                .remove_if(&identity, |_, s| s.is_poisoned() || s.idle_for() > max_idle)
            else {
                continue;
            };
            match session.try_take_channel() {
                Ok(Some(channel)) => channel.close().await,
                Ok(None) => {}
                Err(_) => {
                    // In use right now; put it back for the next sweep.
                    self.sessions.entry(identity).or_insert(session);
                    continue;
                }
            }
            removed += 1;
        }
        if removed > 0 {
            info!("Purged {} idle or poisoned sessions.", removed);
        }
        removed
    }
}

/// Aborts the pooled channel of a session that left the pool. A session still
/// locked by a caller keeps its channel until that caller releases it.
fn release_channel(session: &SessionContext) {
    match session.try_take_channel() {
        Ok(Some(channel)) => channel.abort(),
        Ok(None) => {}
        Err(_) => warn!(
            "Session for '{}' was replaced while in use; its channel closes when the last handle drops.",
            session.identity()
        ),
    }
}
