// src/core/dispatch/handler.rs

//! The two response handler variants. The set is closed: correlation at this
//! layer either wakes the issuing caller or relays to another channel.

use crate::connection::RequestChannel;
use crate::core::protocol::{WireMessage, tags};
use crate::core::transport::TransportAddress;
use crate::core::GatewireError;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// What the issuing caller eventually receives: every matched part in arrival
/// order, or the failure that broke the channel.
pub type HandlerResult = Result<Vec<WireMessage>, GatewireError>;

/// The single-use completion future of an await handler.
pub type Completion = oneshot::Receiver<HandlerResult>;

/// Whether a handler expects more parts after the one it just handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerProgress {
    Pending,
    Complete,
}

/// A reply part is final unless it carries `MP=Y`.
pub fn is_final_part(message: &WireMessage) -> bool {
    message.get(tags::MULTIPART) != Some(tags::MORE_PARTS)
}

/// Correlates the reply of one outstanding request.
#[derive(Debug)]
pub enum ResponseHandler {
    Await(AwaitHandler),
    Forward(ForwardHandler),
}

impl ResponseHandler {
    /// Records `message` and reacts according to the variant.
    pub fn handle(&mut self, message: WireMessage, origin: &TransportAddress) -> HandlerProgress {
        match self {
            ResponseHandler::Await(h) => h.handle(message, origin),
            ResponseHandler::Forward(h) => h.handle(message, origin),
        }
    }

    /// Every part matched so far, in arrival order.
    pub fn matched_responses(&self) -> &[WireMessage] {
        match self {
            ResponseHandler::Await(h) => &h.matched,
            ResponseHandler::Forward(h) => &h.matched,
        }
    }

    /// Called when the channel breaks before the reply completed.
    pub(crate) fn fail(self, error: GatewireError) {
        match self {
            ResponseHandler::Await(h) => h.fail(error),
            ResponseHandler::Forward(h) => debug!(
                "Dropping forward registration to {} after channel failure: {}",
                h.destination.address(),
                error
            ),
        }
    }
}

/// Unblocks the issuing caller once the final reply part arrives.
#[derive(Debug)]
pub struct AwaitHandler {
    matched: Vec<WireMessage>,
    waker: Option<oneshot::Sender<HandlerResult>>,
}

impl AwaitHandler {
    /// Creates the handler and the completion future its caller waits on.
    pub fn new() -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                matched: Vec::new(),
                waker: Some(tx),
            },
            rx,
        )
    }

    fn handle(&mut self, message: WireMessage, origin: &TransportAddress) -> HandlerProgress {
        let is_final = is_final_part(&message);
        self.matched.push(message);
        if !is_final {
            return HandlerProgress::Pending;
        }
        // take() ensures we only send once.
        if let Some(waker) = self.waker.take() {
            if waker.send(Ok(self.matched.clone())).is_err() {
                debug!("Reply from {origin} arrived after its caller stopped waiting.");
            }
        }
        HandlerProgress::Complete
    }

    fn fail(mut self, error: GatewireError) {
        if let Some(waker) = self.waker.take() {
            let _ = waker.send(Err(error));
        }
    }
}

/// Relays every matched part to another channel's send path.
///
/// Parts are queued to a single relay task, so they reach the destination in
/// arrival order and a slow destination never stalls the origin's read loop.
/// The relay drains the queue and exits once the handler is dropped.
#[derive(Debug)]
pub struct ForwardHandler {
    destination: Arc<RequestChannel>,
    relay: mpsc::UnboundedSender<(WireMessage, String)>,
    matched: Vec<WireMessage>,
}

impl ForwardHandler {
    /// Creates the handler and spawns its relay task. Must be called inside a
    /// Tokio runtime.
    pub fn new(destination: Arc<RequestChannel>) -> Self {
        let (relay, queue) = mpsc::unbounded_channel();
        tokio::spawn(relay_loop(Arc::clone(&destination), queue));
        Self {
            destination,
            relay,
            matched: Vec::new(),
        }
    }

    fn handle(&mut self, message: WireMessage, origin: &TransportAddress) -> HandlerProgress {
        let progress = if is_final_part(&message) {
            HandlerProgress::Complete
        } else {
            HandlerProgress::Pending
        };
        self.matched.push(message.clone());
        if self.relay.send((message, origin.describe())).is_err() {
            warn!(
                "Relay to {} stopped; dropping reply from {}",
                self.destination.address(),
                origin
            );
        }
        progress
    }
}

/// Sends queued parts to `destination` one at a time. Failures are logged;
/// the origin is not told.
async fn relay_loop(
    destination: Arc<RequestChannel>,
    mut queue: mpsc::UnboundedReceiver<(WireMessage, String)>,
) {
    while let Some((message, origin)) = queue.recv().await {
        if let Err(e) = destination.send(&message).await {
            warn!(
                "Failed to forward reply from {} to {}: {}",
                origin,
                destination.address(),
                e
            );
        }
    }
}
