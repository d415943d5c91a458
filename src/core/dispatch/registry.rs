// src/core/dispatch/registry.rs

//! Matches incoming messages to the handler registered for their request key.

use super::handler::{HandlerProgress, ResponseHandler};
use crate::core::protocol::{WireMessage, tags};
use crate::core::transport::TransportAddress;
use crate::core::GatewireError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// The correlation key of an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// The value of the `RI` tag.
    Id(String),
    /// The command tag, for backends that don't echo request ids.
    Command(String),
}

impl RequestKey {
    /// Derives the key from a message: its request id when present, otherwise
    /// its command. A message with neither has no key.
    pub fn for_message(message: &WireMessage) -> Option<Self> {
        if let Some(id) = message.get(tags::REQUEST_ID) {
            return Some(RequestKey::Id(id.to_string()));
        }
        message
            .command()
            .map(|command| RequestKey::Command(command.to_string()))
    }
}

/// Identifies one registration, so a key reused by a later request is never
/// mistaken for the registration that held it before.
pub type Generation = u64;

#[derive(Debug)]
struct Registration {
    generation: Generation,
    handler: ResponseHandler,
}

/// Holds exactly one handler per in-flight request key.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: DashMap<RequestKey, Registration>,
    next_generation: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `handler` under `key` and returns the generation naming this
    /// registration. A key that already has a live handler is rejected.
    pub fn register(
        &self,
        key: RequestKey,
        handler: ResponseHandler,
    ) -> Result<Generation, GatewireError> {
        match self.handlers.entry(key) {
            Entry::Occupied(entry) => Err(GatewireError::InvalidState(format!(
                "a handler is already registered for {:?}",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                entry.insert(Registration {
                    generation,
                    handler,
                });
                Ok(generation)
            }
        }
    }

    /// Removes whatever handler is registered for `key`.
    pub fn unregister(&self, key: &RequestKey) -> Option<ResponseHandler> {
        self.handlers.remove(key).map(|(_, r)| r.handler)
    }

    /// Removes the handler for `key` only if it is still the registration
    /// named by `generation`, e.g. after its caller timed out.
    pub fn unregister_if(
        &self,
        key: &RequestKey,
        generation: Generation,
    ) -> Option<ResponseHandler> {
        self.handlers
            .remove_if(key, |_, r| r.generation == generation)
            .map(|(_, r)| r.handler)
    }

    /// Hands `message` to its handler. Returns the message back when no
    /// handler matched, so the caller can treat it as an unsolicited push.
    pub fn dispatch(&self, message: WireMessage, origin: &TransportAddress) -> Option<WireMessage> {
        let Some(key) = RequestKey::for_message(&message) else {
            return Some(message);
        };
        let progress = match self.handlers.get_mut(&key) {
            Some(mut registration) => registration.handler.handle(message, origin),
            None => return Some(message),
        };
        if progress == HandlerProgress::Complete {
            self.handlers.remove(&key);
            debug!("Request {:?} on {} completed.", key, origin);
        }
        None
    }

    /// Fails every outstanding handler with `error`. Used when the channel
    /// underneath them breaks.
    pub fn fail_all(&self, error: &GatewireError) {
        let keys: Vec<RequestKey> = self.handlers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, registration)) = self.handlers.remove(&key) {
                registration.handler.fail(error.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
