//! Message envelopes and the messaging seams
//!
//! A [`Message`] is the immutable inbound envelope handed to handlers: a
//! string type tag used for routing, a JSON payload, the sending process
//! id, and a responder handle that routes replies back over the channel
//! the message arrived on. [`OutgoingMessage`] is the outbound half;
//! [`WireEnvelope`] is the serialized form carried by transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::MessageResult;
use crate::process::ProcessId;

pub mod dispatcher;
pub mod sender;
pub mod transport;

pub use dispatcher::{HandlerRegistration, MessageDispatcher, MessageHandler};
pub use sender::RequestSender;
pub use transport::{ChannelPipe, LinePipe, MessagePipe};

/// Serialized message envelope exchanged between processes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Message type tag used for handler routing
    #[serde(rename = "type")]
    pub message_type: String,

    /// Unique message id, referenced by responses
    pub id: Uuid,

    /// Id of the request this envelope responds to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_to: Option<Uuid>,

    /// Sending process
    pub sender: ProcessId,

    /// Receiving process
    pub recipient: ProcessId,

    /// Command or data payload
    pub payload: Value,
}

/// Routes a reply back to the process a message came from.
///
/// Implemented by transports; handlers only see it through
/// [`Message::respond`].
pub trait ResponseSender: Send + Sync {
    /// Send a response message over the originating channel.
    fn send_response(&self, message: OutgoingMessage) -> MessageResult<()>;
}

/// Inbound message delivered to a registered handler
#[derive(Clone)]
pub struct Message {
    message_type: String,
    id: Uuid,
    response_to: Option<Uuid>,
    sender: ProcessId,
    payload: Value,
    responder: Arc<dyn ResponseSender>,
}

impl Message {
    /// Rehydrate a message from its wire form, attaching the responder for
    /// the channel it arrived on.
    pub fn from_envelope(envelope: WireEnvelope, responder: Arc<dyn ResponseSender>) -> Self {
        Self {
            message_type: envelope.message_type,
            id: envelope.id,
            response_to: envelope.response_to,
            sender: envelope.sender,
            payload: envelope.payload,
            responder,
        }
    }

    /// Message type tag
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Unique message id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request id this message responds to, if it is a response
    pub fn response_to(&self) -> Option<Uuid> {
        self.response_to
    }

    /// Sending process id
    pub fn sender(&self) -> ProcessId {
        self.sender
    }

    /// Payload
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// New outgoing message in response to this one. Routing metadata is
    /// preserved automatically: same type tag, recipient set to the
    /// original sender, correlation id set to this message's id.
    pub fn new_response(&self, payload: Value) -> OutgoingMessage {
        OutgoingMessage {
            message_type: self.message_type.clone(),
            id: Uuid::new_v4(),
            response_to: Some(self.id),
            recipient: self.sender,
            payload,
        }
    }

    /// Build and send a response over the channel this message arrived on.
    pub fn respond(&self, payload: Value) -> MessageResult<()> {
        self.responder.send_response(self.new_response(payload))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_type", &self.message_type)
            .field("id", &self.id)
            .field("response_to", &self.response_to)
            .field("sender", &self.sender)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Outbound message under construction
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    message_type: String,
    id: Uuid,
    response_to: Option<Uuid>,
    recipient: ProcessId,
    payload: Value,
}

impl OutgoingMessage {
    /// New request message addressed to `recipient`.
    pub fn new(message_type: &str, recipient: ProcessId, payload: Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            id: Uuid::new_v4(),
            response_to: None,
            recipient,
            payload,
        }
    }

    /// Unique message id (used for response correlation)
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receiving process id
    pub fn recipient(&self) -> ProcessId {
        self.recipient
    }

    /// Message type tag
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Serialize into the wire form, stamping the sending process id.
    pub fn into_envelope(self, sender: ProcessId) -> WireEnvelope {
        WireEnvelope {
            message_type: self.message_type,
            id: self.id,
            response_to: self.response_to,
            sender,
            recipient: self.recipient,
            payload: self.payload,
        }
    }
}
