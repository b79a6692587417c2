//! Typed request/response command model
//!
//! Commands are a tagged union over the message payload: the command id is
//! the serde tag, so the wire keeps the exact id strings (`START_APP`,
//! `PAUSE_APP`, ...) that receivers dispatch on by exact match. A request
//! produces exactly one response correlated through the envelope's
//! `response_to` field, except for requests marked fire-and-forget, which
//! must never be replied to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::container::{AppId, Application};
use crate::error::{MessageError, MessageResult};
use crate::messaging::Message;
use crate::process::ProcessId;

/// Message type tags used for routing between executive and isolates.
pub mod message_types {
    /// Isolate-to-executive lifecycle notifications
    pub const LIFECYCLE: &str = "mvm/lifecycle";

    /// Executive-to-isolate application commands
    pub const CLIENT: &str = "mvm/client";

    /// Legacy inter-process-communication port announcements
    pub const IXC: &str = "mvm/ixc";
}

/// Lifecycle request commands exchanged between executive and isolates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum LifecycleRequest {
    /// Start an application inside the isolate's container
    #[serde(rename = "START_APP")]
    StartApp {
        /// Application descriptor
        app: Application,
        /// Launch arguments
        args: Vec<String>,
    },

    /// Pause a running application
    #[serde(rename = "PAUSE_APP")]
    PauseApp {
        /// Target application
        app_id: AppId,
    },

    /// Resume a paused application
    #[serde(rename = "RESUME_APP")]
    ResumeApp {
        /// Target application
        app_id: AppId,
    },

    /// Destroy an application, optionally against its will
    #[serde(rename = "DESTROY_APP")]
    DestroyApp {
        /// Target application
        app_id: AppId,
        /// Destroy even if the application objects
        unconditional: bool,
    },

    /// Isolate bootstrap finished; reported to the executive.
    /// Fire-and-forget: the executive must not reply.
    #[serde(rename = "ISOLATE_INITIALIZED")]
    IsolateInitialized {
        /// Process id of the initialized isolate
        isolate_id: ProcessId,
    },
}

impl LifecycleRequest {
    /// The command id string carried on the wire
    pub fn command_id(&self) -> &'static str {
        match self {
            Self::StartApp { .. } => "START_APP",
            Self::PauseApp { .. } => "PAUSE_APP",
            Self::ResumeApp { .. } => "RESUME_APP",
            Self::DestroyApp { .. } => "DESTROY_APP",
            Self::IsolateInitialized { .. } => "ISOLATE_INITIALIZED",
        }
    }

    /// Whether `id` is one of the defined command ids.
    pub fn is_known_command(id: &str) -> bool {
        matches!(
            id,
            "START_APP" | "PAUSE_APP" | "RESUME_APP" | "DESTROY_APP" | "ISOLATE_INITIALIZED"
        )
    }

    /// Whether the receiver must produce a correlated response
    pub fn expects_response(&self) -> bool {
        !matches!(self, Self::IsolateInitialized { .. })
    }

    /// Message type tag the command travels under
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::IsolateInitialized { .. } => message_types::LIFECYCLE,
            _ => message_types::CLIENT,
        }
    }

    /// Parse a command out of an inbound message payload.
    pub fn from_message(message: &Message) -> MessageResult<Self> {
        serde_json::from_value(message.payload().clone())
            .map_err(|e| MessageError::Malformed(format!("lifecycle request: {e}")))
    }

    /// Serialize into a message payload.
    pub fn to_payload(&self) -> MessageResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    /// The request was carried out
    #[serde(rename = "SUCCESS")]
    Success,

    /// The request failed; details stay on the receiving side
    #[serde(rename = "FAILURE")]
    Failure,
}

/// Generic response to a lifecycle request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome of the request
    pub code: ResponseCode,

    /// Integer payload, e.g. the allocated app id for `START_APP`
    /// (-1 signals an allocation failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i32>,
}

impl Response {
    /// Plain success response
    pub fn success() -> Self {
        Self {
            code: ResponseCode::Success,
            value: None,
        }
    }

    /// Plain failure response
    pub fn failure() -> Self {
        Self {
            code: ResponseCode::Failure,
            value: None,
        }
    }

    /// Success carrying an integer payload
    pub fn success_with_value(value: i32) -> Self {
        Self {
            code: ResponseCode::Success,
            value: Some(value),
        }
    }

    /// Failure carrying an integer payload
    pub fn failure_with_value(value: i32) -> Self {
        Self {
            code: ResponseCode::Failure,
            value: Some(value),
        }
    }

    /// Whether the request succeeded
    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::Success
    }

    /// Parse a response out of an inbound message payload.
    pub fn from_message(message: &Message) -> MessageResult<Self> {
        serde_json::from_value(message.payload().clone())
            .map_err(|e| MessageError::Malformed(format!("response: {e}")))
    }

    /// Serialize into a message payload.
    pub fn to_payload(&self) -> MessageResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::AppModel;

    #[test]
    fn command_ids_are_stable_on_the_wire() {
        let request = LifecycleRequest::DestroyApp {
            app_id: AppId(3),
            unconditional: true,
        };
        let payload = request.to_payload().unwrap();
        assert_eq!(payload["command"], "DESTROY_APP");
        assert_eq!(payload["app_id"], 3);
        assert_eq!(payload["unconditional"], true);
    }

    #[test]
    fn isolate_initialized_is_fire_and_forget() {
        let request = LifecycleRequest::IsolateInitialized {
            isolate_id: ProcessId(7),
        };
        assert!(!request.expects_response());
        assert_eq!(request.message_type(), message_types::LIFECYCLE);

        let start = LifecycleRequest::StartApp {
            app: Application::new("demo", AppModel::Xlet),
            args: Vec::new(),
        };
        assert!(start.expects_response());
        assert_eq!(start.message_type(), message_types::CLIENT);
    }

    #[test]
    fn command_id_recognition_is_exact() {
        assert!(LifecycleRequest::is_known_command("START_APP"));
        assert!(LifecycleRequest::is_known_command("ISOLATE_INITIALIZED"));
        assert!(!LifecycleRequest::is_known_command("start_app"));
        assert!(!LifecycleRequest::is_known_command("REBOOT_UNIVERSE"));
    }

    #[test]
    fn response_codes_round_trip() {
        let payload = Response::success_with_value(3).to_payload().unwrap();
        assert_eq!(payload["code"], "SUCCESS");
        assert_eq!(payload["value"], 3);

        let parsed: Response = serde_json::from_value(payload).unwrap();
        assert!(parsed.is_success());
        assert_eq!(parsed.value, Some(3));
    }
}
