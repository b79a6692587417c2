//! Integration tests for the executive-side lifecycle module

use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use warden::LifecycleModule;
use warden::command::{LifecycleRequest, message_types};
use warden::config::WardenConfig;
use warden::container::AppModel;
use warden::error::{LifecycleError, MessageResult, OsError};
use warden::messaging::transport::{self, MessagePipe};
use warden::messaging::{MessageDispatcher, WireEnvelope};
use warden::os::{OsInterface, ProcessListener, SpawnedProcess};
use warden::process::{IsolateState, ProcessId, ProcessProxy, ProcessRegistry};

const EXEC: ProcessId = ProcessId(1);

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

/// Reader that yields its scripted bytes immediately, then stays open
/// until its holding sender is dropped, then reports end of file.
struct ScriptedReader {
    data: Vec<u8>,
    hold: mpsc::Receiver<()>,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() {
            let _ = self.hold.recv();
            return Ok(0);
        }
        let n = self.data.len().min(buf.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.drain(..n);
        Ok(n)
    }
}

/// What a scripted fake isolate does after being "spawned".
#[derive(Clone, Copy)]
enum Script {
    /// Report ISOLATE_INITIALIZED the moment delivery starts
    SignalInit,
    /// Never report anything
    Silent,
}

/// OS facade whose spawned processes are scripted byte streams.
struct FakeOs {
    next_pid: AtomicU32,
    script: Script,
    exec_dispatcher: Arc<MessageDispatcher>,
    /// Responder handed to the executive for messages from fake isolates;
    /// records any (forbidden) replies to fire-and-forget requests.
    responses: RecordingPipe,
    /// Keeps the scripted streams open until the fake children "exit".
    holds: Mutex<Vec<mpsc::Sender<()>>>,
    reaped: Mutex<Vec<ProcessId>>,
}

impl FakeOs {
    fn new(first_pid: u32, script: Script, exec_dispatcher: Arc<MessageDispatcher>) -> Self {
        Self {
            next_pid: AtomicU32::new(first_pid),
            script,
            exec_dispatcher,
            responses: RecordingPipe::default(),
            holds: Mutex::new(Vec::new()),
            reaped: Mutex::new(Vec::new()),
        }
    }

    /// Close every scripted stream, as if the children exited.
    fn release_children(&self) {
        self.holds.lock().clear();
    }
}

fn initialized_envelope(pid: ProcessId) -> WireEnvelope {
    WireEnvelope {
        message_type: message_types::LIFECYCLE.to_string(),
        id: Uuid::new_v4(),
        response_to: None,
        sender: pid,
        recipient: EXEC,
        payload: LifecycleRequest::IsolateInitialized { isolate_id: pid }
            .to_payload()
            .unwrap(),
    }
}

impl OsInterface for FakeOs {
    fn create_process(&self, _args: &[String]) -> Result<SpawnedProcess, OsError> {
        let pid = ProcessId(self.next_pid.fetch_add(1, Ordering::SeqCst));
        let (pipe, _rx) = transport::channel();

        let listener = match self.script {
            Script::SignalInit => {
                let line = serde_json::to_string(&initialized_envelope(pid)).unwrap();
                let (hold_tx, hold_rx) = mpsc::channel();
                self.holds.lock().push(hold_tx);
                Some(ProcessListener::new(
                    pid,
                    EXEC,
                    BufReader::new(ScriptedReader {
                        data: format!("{line}\n").into_bytes(),
                        hold: hold_rx,
                    }),
                    Arc::new(self.responses.clone()),
                    self.exec_dispatcher.clone(),
                ))
            }
            Script::Silent => None,
        };

        Ok(SpawnedProcess {
            pid,
            pipe: Arc::new(pipe),
            listener,
        })
    }

    fn process_id(&self) -> ProcessId {
        EXEC
    }

    fn executive_process_id(&self) -> ProcessId {
        EXEC
    }

    fn reap(&self, pid: ProcessId) {
        self.reaped.lock().push(pid);
    }
}

fn module_with(os: Arc<FakeOs>, dispatcher: Arc<MessageDispatcher>) -> LifecycleModule {
    let mut config = WardenConfig::default();
    config.isolate_init_timeout_ms = 500;
    let registry = Arc::new(ProcessRegistry::new());
    let module = LifecycleModule::new(registry, os, dispatcher, &config);
    module.load();
    module
}

#[test]
fn new_isolate_blocks_until_initialized() {
    let dispatcher = Arc::new(MessageDispatcher::new());
    let os = Arc::new(FakeOs::new(7, Script::SignalInit, dispatcher.clone()));
    let module = module_with(os.clone(), dispatcher);

    let proxy = module.new_isolate(AppModel::Xlet).unwrap();
    assert_eq!(proxy.pid(), ProcessId(7));
    assert_eq!(proxy.state(), IsolateState::Initialized);

    // getIsolate finds the same proxy through the registry.
    let looked_up = module.get_isolate(ProcessId(7)).unwrap();
    assert_eq!(looked_up.state(), IsolateState::Initialized);

    let active: Vec<ProcessId> = module.active_isolates().iter().map(|i| i.pid()).collect();
    assert_eq!(active, vec![ProcessId(7)]);

    // ISOLATE_INITIALIZED is fire-and-forget: the executive never replied.
    assert!(os.responses.sent.lock().is_empty());
}

#[test]
fn init_report_racing_spawn_is_delivered_after_registration() {
    // The scripted report is available the instant delivery starts; it
    // must still find the proxy registered instead of being rejected as
    // an unknown pid and stranding the creator until timeout.
    let dispatcher = Arc::new(MessageDispatcher::new());
    let os = Arc::new(FakeOs::new(70, Script::SignalInit, dispatcher.clone()));
    let module = module_with(os, dispatcher);

    for expected in 70..75 {
        let proxy = module.new_isolate(AppModel::Xlet).unwrap();
        assert_eq!(proxy.pid(), ProcessId(expected));
        assert_eq!(proxy.state(), IsolateState::Initialized);
    }
}

#[test]
fn init_timeout_is_a_typed_failure_not_a_stuck_proxy() {
    let dispatcher = Arc::new(MessageDispatcher::new());
    let os = Arc::new(FakeOs::new(20, Script::Silent, dispatcher.clone()));
    let module = module_with(os, dispatcher);

    let err = module.new_isolate(AppModel::Main).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::WaitTimeout {
            pid: ProcessId(20),
            target: IsolateState::Initialized,
            ..
        }
    ));

    // The proxy stays visible for diagnostics but is not active.
    let proxy = module.get_isolate(ProcessId(20)).unwrap();
    assert_eq!(proxy.state(), IsolateState::Created);
    assert!(module.active_isolates().is_empty());
}

#[test]
fn child_channel_eof_terminates_and_removes_the_proxy() {
    let dispatcher = Arc::new(MessageDispatcher::new());
    let os = Arc::new(FakeOs::new(80, Script::SignalInit, dispatcher.clone()));
    let module = module_with(os.clone(), dispatcher);

    let proxy = module.new_isolate(AppModel::Main).unwrap();
    let pid = proxy.pid();
    assert_eq!(module.active_isolates().len(), 1);

    os.release_children();

    // Reaping is the last step of the teardown, so once it is visible the
    // proxy has been terminated and deregistered.
    let deadline = Instant::now() + Duration::from_secs(2);
    while os.reaped.lock().is_empty() {
        assert!(Instant::now() < deadline, "child exit never observed");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(os.reaped.lock().as_slice(), &[pid]);
    assert_eq!(proxy.state(), IsolateState::Terminated);
    assert!(matches!(
        module.get_isolate(pid),
        Err(LifecycleError::UnknownIsolate(_))
    ));
    assert!(module.active_isolates().is_empty());
}

#[test]
fn initialized_report_for_unknown_isolate_is_contained() {
    let dispatcher = Arc::new(MessageDispatcher::new());
    let os = Arc::new(FakeOs::new(30, Script::Silent, dispatcher.clone()));
    let module = module_with(os, dispatcher.clone());

    // No isolate 999 was ever created. The handler must surface a protocol
    // violation (logged by the dispatcher), not dereference a missing
    // proxy, and must not reply.
    let responses = RecordingPipe::default();
    dispatcher.dispatch(transport::inbound_message(
        initialized_envelope(ProcessId(999)),
        EXEC,
        Arc::new(responses.clone()),
    ));

    assert!(matches!(
        module.get_isolate(ProcessId(999)),
        Err(LifecycleError::UnknownIsolate(ProcessId(999)))
    ));
    assert!(responses.sent.lock().is_empty());
}

#[test]
fn register_process_is_idempotent() {
    let dispatcher = Arc::new(MessageDispatcher::new());
    let os = Arc::new(FakeOs::new(40, Script::Silent, dispatcher.clone()));
    let module = module_with(os, dispatcher);

    let pipe = RecordingPipe::default();
    let process = Arc::new(ProcessProxy::new(ProcessId(50), EXEC, Arc::new(pipe)));
    module.register_process(process.clone());
    module.register_process(process);

    assert_eq!(module.processes().len(), 1);
}

#[test]
fn unload_cancels_the_lifecycle_subscription() {
    let dispatcher = Arc::new(MessageDispatcher::new());
    let os = Arc::new(FakeOs::new(60, Script::SignalInit, dispatcher.clone()));
    let module = module_with(os, dispatcher.clone());

    let proxy = module.new_isolate(AppModel::Midlet).unwrap();
    assert_eq!(proxy.state(), IsolateState::Initialized);

    module.unload();

    // Subsequent lifecycle traffic is dropped by the dispatcher, so a
    // second isolate can no longer complete initialization.
    let err = module.new_isolate(AppModel::Midlet).unwrap_err();
    assert!(matches!(err, LifecycleError::WaitTimeout { .. }));
}
