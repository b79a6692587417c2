//! Request sending with response correlation
//!
//! A [`RequestSender`] turns a typed command into an outgoing message,
//! reserves a response slot in the local dispatcher keyed by the message
//! id, and blocks until the correlated response arrives or the configured
//! timeout elapses. Fire-and-forget requests skip the reservation entirely.

use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use super::dispatcher::MessageDispatcher;
use crate::command::{LifecycleRequest, Response};
use crate::error::{MessageError, MessageResult};
use crate::process::ProcessProxy;

/// Sends typed requests to peer processes and awaits their responses
pub struct RequestSender {
    dispatcher: Arc<MessageDispatcher>,
    timeout: Duration,
}

impl RequestSender {
    /// Create a sender that correlates responses through `dispatcher`.
    pub fn new(dispatcher: Arc<MessageDispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
        }
    }

    /// Send a request and block until its response arrives.
    ///
    /// Returns [`MessageError::ResponseTimeout`] if the peer does not
    /// answer within the configured window.
    pub fn send_request(
        &self,
        peer: &ProcessProxy,
        request: &LifecycleRequest,
    ) -> MessageResult<Response> {
        debug_assert!(request.expects_response());

        let message = peer.new_outgoing_message(request.message_type(), request.to_payload()?);
        let request_id = message.id();
        let slot = self.dispatcher.register_pending(request_id);

        if let Err(error) = peer.send(message) {
            self.dispatcher.forget_pending(request_id);
            return Err(error);
        }

        match slot.recv_timeout(self.timeout) {
            Ok(response) => Response::from_message(&response),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.dispatcher.forget_pending(request_id);
                Err(MessageError::ResponseTimeout {
                    command: request.command_id().to_string(),
                    peer: peer.pid(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Send a fire-and-forget request. No response slot is reserved; any
    /// reply would be dropped as unclaimed.
    pub fn send_request_async(
        &self,
        peer: &ProcessProxy,
        request: &LifecycleRequest,
    ) -> MessageResult<()> {
        let message = peer.new_outgoing_message(request.message_type(), request.to_payload()?);
        peer.send(message)
    }
}
