//! Process-to-process transport plumbing
//!
//! The dispatcher is transport-agnostic; this module supplies the two
//! concrete channels used by the crate: newline-delimited JSON over a
//! byte stream (child process stdio) and an in-memory ordered channel for
//! same-process wiring and tests. Each sender/receiver pair communicates
//! over a single pipe, so messages between a pair arrive in send order.

use parking_lot::Mutex;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use super::dispatcher::MessageDispatcher;
use super::{Message, OutgoingMessage, ResponseSender, WireEnvelope};
use crate::error::{MessageError, MessageResult};
use crate::process::ProcessId;

/// Outbound half of a channel to one peer process.
pub trait MessagePipe: Send + Sync {
    /// Transmit one envelope.
    fn send(&self, envelope: &WireEnvelope) -> MessageResult<()>;
}

/// Newline-delimited JSON pipe over a byte writer (pipe or socket half)
pub struct LinePipe<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LinePipe<W> {
    /// Wrap a writer. Each envelope becomes one JSON line.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> MessagePipe for LinePipe<W> {
    fn send(&self, envelope: &WireEnvelope) -> MessageResult<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, envelope)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// In-memory ordered pipe used for same-process wiring and tests
#[derive(Clone)]
pub struct ChannelPipe {
    tx: mpsc::Sender<WireEnvelope>,
}

impl MessagePipe for ChannelPipe {
    fn send(&self, envelope: &WireEnvelope) -> MessageResult<()> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| MessageError::ChannelClosed)
    }
}

/// Create an in-memory pipe and the receiver that drains it.
pub fn channel() -> (ChannelPipe, mpsc::Receiver<WireEnvelope>) {
    let (tx, rx) = mpsc::channel();
    (ChannelPipe { tx }, rx)
}

/// Responder that sends replies back over a peer's pipe.
struct PipeResponder {
    pipe: Arc<dyn MessagePipe>,
    local: ProcessId,
}

impl ResponseSender for PipeResponder {
    fn send_response(&self, message: OutgoingMessage) -> MessageResult<()> {
        self.pipe.send(&message.into_envelope(self.local))
    }
}

/// Build the inbound [`Message`] for an envelope received on a channel
/// whose reply path is `reply`.
pub fn inbound_message(
    envelope: WireEnvelope,
    local: ProcessId,
    reply: Arc<dyn MessagePipe>,
) -> Message {
    Message::from_envelope(
        envelope,
        Arc::new(PipeResponder { pipe: reply, local }),
    )
}

/// Blocking listener loop over a byte stream.
///
/// Reads NDJSON envelopes and hands them to the dispatcher until the
/// stream ends. Malformed lines are logged and skipped; they never stop
/// the loop. Runs on a dedicated thread that keeps the process alive.
pub fn listen<R: BufRead>(
    reader: R,
    local: ProcessId,
    reply: Arc<dyn MessagePipe>,
    dispatcher: Arc<MessageDispatcher>,
) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<WireEnvelope>(&line) {
            Ok(envelope) => {
                dispatcher.dispatch(inbound_message(envelope, local, reply.clone()));
            }
            Err(error) => {
                tracing::warn!(%error, "dropping malformed envelope");
            }
        }
    }
    tracing::debug!(%local, "message channel closed");
    Ok(())
}

/// Drain an in-memory receiver into a dispatcher on a dedicated thread.
pub fn spawn_delivery(
    rx: mpsc::Receiver<WireEnvelope>,
    local: ProcessId,
    reply: Arc<dyn MessagePipe>,
    dispatcher: Arc<MessageDispatcher>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for envelope in rx {
            dispatcher.dispatch(inbound_message(envelope, local, reply.clone()));
        }
        tracing::debug!(%local, "in-memory channel closed");
    })
}
