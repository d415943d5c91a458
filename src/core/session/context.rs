// src/core/session/context.rs

//! Defines `SessionContext`, the per-logical-session authentication state, and
//! `SessionGuard`, the scoped lock every token mutation happens under.

use crate::connection::RequestChannel;
use crate::core::metrics;
use crate::core::protocol::{WireMessage, tags};
use crate::core::transport::TransportAddress;
use crate::core::GatewireError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An opaque auth token. Its `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// The authentication state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated(AuthToken),
    /// The backend saw an overlapping login on this session. Terminal.
    Poisoned,
}

/// How a reply changed the session's authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTransition {
    Unchanged,
    /// A token was stored where there was none.
    Authenticated,
    /// The stored token was replaced.
    Refreshed,
    /// The backend rejected the token; re-authentication is required.
    Rejected,
}

/// State protected by the session guard.
#[derive(Debug)]
struct SessionState {
    auth: AuthState,
    channel: Option<Arc<RequestChannel>>,
}

/// One logical session, reused across many round trips and possibly several
/// connections over its lifetime.
pub struct SessionContext {
    id: Uuid,
    identity: String,
    address: TransportAddress,
    state: Mutex<SessionState>,
    /// Mirrors `AuthState::Poisoned` so reuse fails fast without waiting on
    /// the guard.
    poisoned: AtomicBool,
    connected: AtomicBool,
    last_access: parking_lot::Mutex<Instant>,
}

impl SessionContext {
    pub fn new(identity: impl Into<String>, address: TransportAddress) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            address,
            state: Mutex::new(SessionState {
                auth: AuthState::Unauthenticated,
                channel: None,
            }),
            poisoned: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            last_access: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The identity the session was created for (e.g. a user or gateway
    /// session id). Never a credential.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The backend endpoint this session talks to.
    pub fn address(&self) -> &TransportAddress {
        &self.address
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// True while the session holds an open pooled channel.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// A poisoned session is never eligible for reuse.
    pub fn is_reusable(&self) -> bool {
        !self.is_poisoned()
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access().elapsed()
    }

    /// Acquires the session guard, waiting behind any other task holding it.
    ///
    /// A poisoned session fails with `SessionPoisoned` before any network
    /// activity, both before waiting and after acquiring (it may have been
    /// poisoned by the previous holder).
    pub async fn lock(&self) -> Result<SessionGuard<'_>, GatewireError> {
        if self.is_poisoned() {
            return Err(self.poisoned_error());
        }
        let inner = self.state.lock().await;
        if inner.auth == AuthState::Poisoned {
            return Err(self.poisoned_error());
        }
        self.touch();
        Ok(SessionGuard { ctx: self, inner })
    }

    /// Takes the pooled channel without waiting. Fails if another task holds
    /// the guard. Used by the pool when retiring sessions.
    pub(crate) fn try_take_channel(&self) -> Result<Option<Arc<RequestChannel>>, TryLockError> {
        let mut inner = self.state.try_lock()?;
        self.connected.store(false, Ordering::Release);
        Ok(inner.channel.take())
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn poisoned_error(&self) -> GatewireError {
        GatewireError::SessionPoisoned(format!(
            "session {} for '{}' was retired after a duplicate login",
            self.id, self.identity
        ))
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("address", &self.address.describe())
            .field("poisoned", &self.is_poisoned())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Exclusive, scoped access to a session. Dropping the guard releases it on
/// every exit path.
pub struct SessionGuard<'a> {
    ctx: &'a SessionContext,
    inner: MutexGuard<'a, SessionState>,
}

impl SessionGuard<'_> {
    pub fn context(&self) -> &SessionContext {
        self.ctx
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.inner.auth
    }

    pub fn token(&self) -> Option<&str> {
        match &self.inner.auth {
            AuthState::Authenticated(token) => Some(token.as_str()),
            _ => None,
        }
    }

    /// Stores a token obtained out of band (e.g. restored by the embedding
    /// application).
    pub fn set_token(&mut self, token: AuthToken) {
        self.inner.auth = AuthState::Authenticated(token);
    }

    /// Forgets the token, forcing re-authentication.
    pub fn clear_token(&mut self) {
        self.inner.auth = AuthState::Unauthenticated;
    }

    /// Attaches the current token to `message`. No-op when unauthenticated.
    pub fn with_request(&self, message: &mut WireMessage) -> Result<(), GatewireError> {
        if let AuthState::Authenticated(token) = &self.inner.auth {
            message.set(tags::AUTH_TOKEN, token.as_str())?;
        }
        Ok(())
    }

    /// Applies a reply to the authentication state.
    ///
    /// A duplicate login poisons the session, retires its pooled channel and
    /// returns `SessionPoisoned`; the caller must discard the connection it
    /// used. `JW=N` clears the token; any other non-empty `JW` replaces it.
    pub fn observe_response(
        &mut self,
        reply: &WireMessage,
    ) -> Result<AuthTransition, GatewireError> {
        if is_duplicate_login(reply) {
            self.poison();
            let detail = reply
                .get(tags::ERROR)
                .filter(|e| !e.is_empty())
                .unwrap_or("backend reported a duplicate login");
            return Err(GatewireError::SessionPoisoned(detail.to_string()));
        }

        let transition = match reply.get(tags::AUTH_TOKEN) {
            Some(tags::NEGATIVE_AUTH) => {
                if matches!(self.inner.auth, AuthState::Authenticated(_)) {
                    info!(
                        "Backend rejected the token of session {}; re-authentication required.",
                        self.ctx.id
                    );
                }
                self.inner.auth = AuthState::Unauthenticated;
                AuthTransition::Rejected
            }
            Some(token) if !token.is_empty() => {
                let transition = match &self.inner.auth {
                    AuthState::Authenticated(current) if current.as_str() == token => {
                        AuthTransition::Unchanged
                    }
                    AuthState::Authenticated(_) => AuthTransition::Refreshed,
                    _ => AuthTransition::Authenticated,
                };
                self.inner.auth = AuthState::Authenticated(AuthToken::new(token));
                transition
            }
            _ => AuthTransition::Unchanged,
        };
        if transition != AuthTransition::Unchanged {
            debug!("Session {} auth transition: {:?}", self.ctx.id, transition);
        }
        Ok(transition)
    }

    /// The session's pooled channel, if it is still open.
    pub fn channel(&self) -> Option<Arc<RequestChannel>> {
        self.inner
            .channel
            .as_ref()
            .filter(|ch| !ch.is_closed())
            .cloned()
    }

    /// Pools `channel` with the session, replacing (and aborting) any
    /// previous one.
    pub fn install_channel(&mut self, channel: Arc<RequestChannel>) {
        if let Some(previous) = self.inner.channel.replace(channel) {
            previous.abort();
        }
        self.ctx.connected.store(true, Ordering::Release);
    }

    /// Closes and forgets the pooled channel.
    pub async fn retire_channel(&mut self) {
        if let Some(channel) = self.inner.channel.take() {
            channel.close().await;
        }
        self.ctx.connected.store(false, Ordering::Release);
    }

    fn poison(&mut self) {
        warn!(
            "Session {} for '{}' poisoned by a duplicate login; retiring its connection.",
            self.ctx.id, self.ctx.identity
        );
        self.inner.auth = AuthState::Poisoned;
        self.ctx.poisoned.store(true, Ordering::Release);
        if let Some(channel) = self.inner.channel.take() {
            channel.abort();
        }
        self.ctx.connected.store(false, Ordering::Release);
        metrics::POISONED_SESSIONS_TOTAL.inc();
    }
}

/// Detects the backend's "already logged in" condition: the structured status
/// first, then the `ER` text for backends that only report it there.
pub fn is_duplicate_login(reply: &WireMessage) -> bool {
    if reply.get(tags::STATUS) == Some(tags::STATUS_DUPLICATE_LOGIN) {
        return true;
    }
    reply
        .get(tags::ERROR)
        .is_some_and(|e| e.to_ascii_lowercase().contains(tags::DUPLICATE_LOGIN_TEXT))
}
