//! Operating-system facade
//!
//! The core never spawns or inspects processes directly; it goes through
//! [`OsInterface`]. [`HostOs`] is the executive-side implementation: it
//! launches isolate processes with piped stdio and hands back the child's
//! stdin as the outbound pipe plus a deferred [`ProcessListener`] over its
//! stdout. The creator starts the listener only after registering the new
//! pid, so a child that reports the moment it comes up cannot race the
//! registration. [`IsolateOs`] is the isolate-side implementation, which
//! resolves its own pid and the executive's pid from the environment
//! prepared by the spawner.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;

use crate::error::OsError;
use crate::messaging::dispatcher::MessageDispatcher;
use crate::messaging::transport::{self, LinePipe, MessagePipe};
use crate::process::ProcessId;

/// Environment variable carrying the executive pid into isolate processes
pub const EXECUTIVE_PID_ENV: &str = "WARDEN_EXECUTIVE_PID";

/// A process created through the facade: its pid and the channel to it
pub struct SpawnedProcess {
    /// Pid of the new process
    pub pid: ProcessId,
    /// Outbound message pipe to the new process
    pub pipe: Arc<dyn MessagePipe>,
    /// Inbound delivery from the process, if the facade provides one.
    /// Started by the creator once the pid is registered.
    pub listener: Option<ProcessListener>,
}

/// Deferred inbound delivery from a spawned process
///
/// The spawner prepares the listener; the creator starts it only after the
/// process is registered, so an early message cannot arrive before the
/// registry knows the pid.
pub struct ProcessListener {
    pid: ProcessId,
    local: ProcessId,
    reader: Box<dyn BufRead + Send>,
    reply: Arc<dyn MessagePipe>,
    dispatcher: Arc<MessageDispatcher>,
}

impl ProcessListener {
    /// Listener over the inbound byte stream from process `pid`, replying
    /// over `reply` and delivering to `dispatcher`.
    pub fn new(
        pid: ProcessId,
        local: ProcessId,
        reader: impl BufRead + Send + 'static,
        reply: Arc<dyn MessagePipe>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Self {
        Self {
            pid,
            local,
            reader: Box::new(reader),
            reply,
            dispatcher,
        }
    }

    /// Start delivery on a dedicated thread. `on_exit` runs when the
    /// stream reaches end of file, i.e. when the peer process is gone.
    pub fn start(self, on_exit: impl FnOnce() + Send + 'static) -> Result<(), OsError> {
        let pid = self.pid;
        thread::Builder::new()
            .name(format!("warden-listen-{}", pid.0))
            .spawn(move || {
                if let Err(error) =
                    transport::listen(self.reader, self.local, self.reply, self.dispatcher)
                {
                    tracing::warn!(%pid, %error, "isolate listener terminated");
                }
                on_exit();
            })?;
        Ok(())
    }
}

/// Abstract operating-system interface the core depends on
pub trait OsInterface: Send + Sync {
    /// Create a peer process with the given arguments and open a message
    /// channel to it.
    fn create_process(&self, args: &[String]) -> Result<SpawnedProcess, OsError>;

    /// Pid of the current process.
    fn process_id(&self) -> ProcessId;

    /// Pid of the supervising executive process.
    fn executive_process_id(&self) -> ProcessId;

    /// Release any OS resources held for a child that has exited.
    fn reap(&self, _pid: ProcessId) {}
}

/// Executive-side OS interface spawning real isolate processes
pub struct HostOs {
    pid: ProcessId,
    command: Vec<String>,
    dispatcher: Arc<MessageDispatcher>,
    children: Mutex<HashMap<ProcessId, Child>>,
}

impl HostOs {
    /// Create the facade. `command` is the isolate launch argv; inbound
    /// messages from every spawned child are delivered to `dispatcher`.
    pub fn new(command: Vec<String>, dispatcher: Arc<MessageDispatcher>) -> Self {
        Self {
            pid: ProcessId(std::process::id()),
            command,
            dispatcher,
            children: Mutex::new(HashMap::new()),
        }
    }
}

impl OsInterface for HostOs {
    fn create_process(&self, args: &[String]) -> Result<SpawnedProcess, OsError> {
        let (program, base_args) = self.command.split_first().ok_or(OsError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(base_args)
            .args(args)
            .env(EXECUTIVE_PID_ENV, self.pid.0.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let pid = ProcessId(child.id());
        let stdin = child.stdin.take().ok_or(OsError::MissingStdin)?;
        let stdout = child.stdout.take().ok_or(OsError::MissingStdout)?;

        let pipe: Arc<dyn MessagePipe> = Arc::new(LinePipe::new(stdin));

        // One listener per child: stdout lines become inbound messages for
        // the executive dispatcher, with replies routed back over the
        // child's stdin. Delivery starts once the caller has registered
        // the pid.
        let listener = ProcessListener::new(
            pid,
            self.pid,
            BufReader::new(stdout),
            pipe.clone(),
            self.dispatcher.clone(),
        );

        self.children.lock().insert(pid, child);
        tracing::info!(%pid, ?args, "isolate process spawned");
        Ok(SpawnedProcess {
            pid,
            pipe,
            listener: Some(listener),
        })
    }

    fn process_id(&self) -> ProcessId {
        self.pid
    }

    fn executive_process_id(&self) -> ProcessId {
        self.pid
    }

    fn reap(&self, pid: ProcessId) {
        if let Some(mut child) = self.children.lock().remove(&pid) {
            match child.wait() {
                Ok(status) => tracing::info!(%pid, %status, "isolate process reaped"),
                Err(error) => tracing::warn!(%pid, %error, "failed to reap isolate process"),
            }
        }
    }
}

/// Isolate-side OS interface
///
/// Spawning further processes is not available inside an isolate.
pub struct IsolateOs {
    pid: ProcessId,
    executive_pid: ProcessId,
}

impl IsolateOs {
    /// Resolve pids from the process environment prepared by [`HostOs`].
    pub fn from_env() -> Result<Self, OsError> {
        let executive_pid = std::env::var(EXECUTIVE_PID_ENV)
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .map(ProcessId)
            .ok_or(OsError::MissingExecutivePid(EXECUTIVE_PID_ENV))?;

        Ok(Self {
            pid: ProcessId(std::process::id()),
            executive_pid,
        })
    }

    /// Explicit pids, for embedding an isolate runtime in-process.
    pub fn with_pids(pid: ProcessId, executive_pid: ProcessId) -> Self {
        Self { pid, executive_pid }
    }
}

impl OsInterface for IsolateOs {
    fn create_process(&self, _args: &[String]) -> Result<SpawnedProcess, OsError> {
        Err(OsError::Unsupported("create_process inside an isolate"))
    }

    fn process_id(&self) -> ProcessId {
        self.pid
    }

    fn executive_process_id(&self) -> ProcessId {
        self.executive_pid
    }
}
