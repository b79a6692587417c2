//! Integration tests for the message dispatcher and request correlation

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use warden::command::{LifecycleRequest, message_types};
use warden::container::AppId;
use warden::error::{MessageError, MessageResult, Result};
use warden::messaging::transport::{self, MessagePipe};
use warden::messaging::{Message, MessageDispatcher, MessageHandler, RequestSender, WireEnvelope};
use warden::process::{ProcessId, ProcessProxy};
use warden::{Response, ResponseCode};

const EXEC: ProcessId = ProcessId(1);
const PEER: ProcessId = ProcessId(2);

/// Pipe that records every envelope it is asked to send.
#[derive(Clone, Default)]
struct RecordingPipe {
    sent: Arc<Mutex<Vec<WireEnvelope>>>,
}

impl MessagePipe for RecordingPipe {
    fn send(&self, envelope: &WireEnvelope) -> MessageResult<()> {
        self.sent.lock().push(envelope.clone());
        Ok(())
    }
}

struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

impl MessageHandler for CountingHandler {
    fn handle_message(&self, _message: &Message) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TaggingHandler {
    tag: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl MessageHandler for TaggingHandler {
    fn handle_message(&self, _message: &Message) -> Result<()> {
        self.order.lock().push(self.tag);
        Ok(())
    }
}

struct FailingHandler;

impl MessageHandler for FailingHandler {
    fn handle_message(&self, _message: &Message) -> Result<()> {
        Err(MessageError::Malformed("always fails".into()).into())
    }
}

fn inbound(message_type: &str, reply: &RecordingPipe) -> Message {
    let envelope = WireEnvelope {
        message_type: message_type.to_string(),
        id: Uuid::new_v4(),
        response_to: None,
        sender: PEER,
        recipient: EXEC,
        payload: json!({}),
    };
    transport::inbound_message(envelope, EXEC, Arc::new(reply.clone()))
}

#[test]
fn dispatch_reaches_registrants_in_registration_order() {
    let dispatcher = MessageDispatcher::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    dispatcher.register_handler(
        "test/topic",
        Arc::new(TaggingHandler {
            tag: "first",
            order: order.clone(),
        }),
    );
    dispatcher.register_handler(
        "test/topic",
        Arc::new(TaggingHandler {
            tag: "second",
            order: order.clone(),
        }),
    );

    dispatcher.dispatch(inbound("test/topic", &RecordingPipe::default()));
    dispatcher.dispatch(inbound("test/topic", &RecordingPipe::default()));
    assert_eq!(*order.lock(), vec!["first", "second", "first", "second"]);
}

#[test]
fn cancelled_registration_no_longer_receives_messages() {
    let dispatcher = MessageDispatcher::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let registration = dispatcher.register_handler(
        "test/topic",
        Arc::new(CountingHandler {
            calls: calls.clone(),
        }),
    );

    dispatcher.dispatch(inbound("test/topic", &RecordingPipe::default()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    dispatcher.cancel_registration(registration);
    dispatcher.dispatch(inbound("test/topic", &RecordingPipe::default()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unhandled_message_is_dropped_without_panic() {
    let dispatcher = MessageDispatcher::new();
    dispatcher.dispatch(inbound("test/nobody-home", &RecordingPipe::default()));
}

#[test]
fn handler_failure_does_not_stop_later_registrants() {
    let dispatcher = MessageDispatcher::new();
    let calls = Arc::new(AtomicUsize::new(0));

    dispatcher.register_handler("test/topic", Arc::new(FailingHandler));
    dispatcher.register_handler(
        "test/topic",
        Arc::new(CountingHandler {
            calls: calls.clone(),
        }),
    );

    dispatcher.dispatch(inbound("test/topic", &RecordingPipe::default()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Handler that answers every client command with a success response.
struct Acknowledger;

impl MessageHandler for Acknowledger {
    fn handle_message(&self, message: &Message) -> Result<()> {
        message.respond(Response::success().to_payload()?)?;
        Ok(())
    }
}

#[test]
fn request_response_round_trip_over_in_memory_channels() {
    let exec_dispatcher = Arc::new(MessageDispatcher::new());
    let peer_dispatcher = Arc::new(MessageDispatcher::new());

    let (to_peer, peer_rx) = transport::channel();
    let (to_exec, exec_rx) = transport::channel();

    peer_dispatcher.register_handler(message_types::CLIENT, Arc::new(Acknowledger));

    transport::spawn_delivery(peer_rx, PEER, Arc::new(to_exec), peer_dispatcher);
    transport::spawn_delivery(exec_rx, EXEC, Arc::new(to_peer.clone()), exec_dispatcher.clone());

    let proxy = ProcessProxy::new(PEER, EXEC, Arc::new(to_peer));
    let sender = RequestSender::new(exec_dispatcher, Duration::from_secs(2));

    let response = sender
        .send_request(&proxy, &LifecycleRequest::PauseApp { app_id: AppId(0) })
        .unwrap();
    assert_eq!(response.code, ResponseCode::Success);
}

#[test]
fn missing_response_times_out_with_typed_error() {
    let exec_dispatcher = Arc::new(MessageDispatcher::new());
    // Peer side exists but registers no handler, so the request is
    // dropped and no response ever arrives.
    let peer_dispatcher = Arc::new(MessageDispatcher::new());

    let (to_peer, peer_rx) = transport::channel();
    let (to_exec, exec_rx) = transport::channel();
    transport::spawn_delivery(peer_rx, PEER, Arc::new(to_exec), peer_dispatcher);
    transport::spawn_delivery(exec_rx, EXEC, Arc::new(to_peer.clone()), exec_dispatcher.clone());

    let proxy = ProcessProxy::new(PEER, EXEC, Arc::new(to_peer));
    let sender = RequestSender::new(exec_dispatcher, Duration::from_millis(50));

    let err = sender
        .send_request(&proxy, &LifecycleRequest::ResumeApp { app_id: AppId(0) })
        .unwrap_err();
    assert!(matches!(err, MessageError::ResponseTimeout { peer: PEER, .. }));
}

#[test]
fn response_routing_preserves_request_metadata() {
    let reply = RecordingPipe::default();
    let message = inbound(message_types::CLIENT, &reply);
    let request_id = message.id();

    message.respond(Response::success().to_payload().unwrap()).unwrap();

    let sent = reply.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].response_to, Some(request_id));
    assert_eq!(sent[0].recipient, PEER);
    assert_eq!(sent[0].sender, EXEC);
    assert_eq!(sent[0].message_type, message_types::CLIENT);
}
