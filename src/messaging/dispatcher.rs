//! Per-process message dispatcher
//!
//! Routes inbound messages to handlers registered by message type and
//! completes pending request/response correlations. The transport's
//! listener thread calls [`MessageDispatcher::dispatch`]; application code
//! only registers and cancels handlers.
//!
//! Handler failures are contained at the dispatch boundary: an `Err` from a
//! handler is logged and does not affect other registrants or the listener
//! loop. A message whose type has no registrants is dropped with a log
//! line.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use uuid::Uuid;

use super::Message;
use crate::error::Result;

/// Handler for inbound messages of a registered type.
pub trait MessageHandler: Send + Sync {
    /// Process one message. Errors are logged by the dispatcher and do not
    /// propagate past the dispatch boundary.
    fn handle_message(&self, message: &Message) -> Result<()>;
}

/// Live registration token returned by [`MessageDispatcher::register_handler`].
///
/// Passing it to [`MessageDispatcher::cancel_registration`] removes exactly
/// the handler it was issued for.
#[derive(Debug)]
pub struct HandlerRegistration {
    message_type: String,
    token: Uuid,
}

impl HandlerRegistration {
    /// Message type this registration subscribes to
    pub fn message_type(&self) -> &str {
        &self.message_type
    }
}

struct Registrant {
    token: Uuid,
    handler: Arc<dyn MessageHandler>,
}

/// Routes inbound messages to registered handlers by type
pub struct MessageDispatcher {
    handlers: Mutex<HashMap<String, Vec<Registrant>>>,
    pending: Mutex<HashMap<Uuid, mpsc::Sender<Message>>>,
}

impl MessageDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a handler to a message type.
    ///
    /// A type may carry independent registrations from multiple
    /// subscribers; dispatch delivers to all of them in registration order.
    pub fn register_handler(
        &self,
        message_type: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerRegistration {
        let token = Uuid::new_v4();
        self.handlers
            .lock()
            .entry(message_type.to_string())
            .or_default()
            .push(Registrant { token, handler });
        tracing::debug!(message_type, %token, "handler registered");
        HandlerRegistration {
            message_type: message_type.to_string(),
            token,
        }
    }

    /// Cancel a registration; later dispatches for the type no longer reach
    /// the handler. In-flight dispatches already delivered are unaffected.
    pub fn cancel_registration(&self, registration: HandlerRegistration) {
        let mut handlers = self.handlers.lock();
        if let Some(registrants) = handlers.get_mut(&registration.message_type) {
            registrants.retain(|r| r.token != registration.token);
            if registrants.is_empty() {
                handlers.remove(&registration.message_type);
            }
        }
        tracing::debug!(
            message_type = registration.message_type,
            token = %registration.token,
            "handler registration cancelled"
        );
    }

    /// Deliver one inbound message. Called by the transport listener.
    ///
    /// Responses are matched against the pending-request table first; other
    /// messages go to every current registrant for their type.
    pub fn dispatch(&self, message: Message) {
        if let Some(request_id) = message.response_to() {
            if let Some(slot) = self.pending.lock().remove(&request_id) {
                if slot.send(message).is_err() {
                    tracing::warn!(%request_id, "response arrived after requester gave up");
                }
                return;
            }
            tracing::debug!(%request_id, "dropping unclaimed response");
            return;
        }

        let targets: Vec<Arc<dyn MessageHandler>> = {
            let handlers = self.handlers.lock();
            match handlers.get(message.message_type()) {
                Some(registrants) => registrants.iter().map(|r| r.handler.clone()).collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            tracing::warn!(
                message_type = message.message_type(),
                sender = %message.sender(),
                "no handler registered, dropping message"
            );
            return;
        }

        for handler in targets {
            if let Err(error) = handler.handle_message(&message) {
                tracing::error!(
                    message_type = message.message_type(),
                    sender = %message.sender(),
                    %error,
                    "message handler failed"
                );
            }
        }
    }

    /// Reserve a response slot for an outgoing request id.
    pub(crate) fn register_pending(&self, request_id: Uuid) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel();
        self.pending.lock().insert(request_id, tx);
        rx
    }

    /// Drop a response slot after a timeout or send failure.
    pub(crate) fn forget_pending(&self, request_id: Uuid) {
        self.pending.lock().remove(&request_id);
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
