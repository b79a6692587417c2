//! Process and isolate proxies and their registry
//!
//! A [`ProcessProxy`] is the local handle for a peer OS process: its pid
//! plus the outbound pipe to it. An [`IsolateProxy`] wraps a process proxy
//! with the isolate lifecycle state machine and a condvar-based wait.
//! Proxies are owned by a [`ProcessRegistry`], the single lookup path for
//! existing proxies; at most one proxy exists per pid.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LifecycleError, LifecycleResult, MessageResult};
use crate::messaging::transport::MessagePipe;
use crate::messaging::OutgoingMessage;

/// OS process identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid-{}", self.0)
    }
}

/// Isolate lifecycle state
///
/// Transitions are monotonic in this ordering, except that `Terminated`
/// may be entered from any state. Per-application running/paused states
/// inside the isolate are orthogonal and tracked by its container.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum IsolateState {
    /// Process spawned, bootstrap not yet signaled
    Created,
    /// Isolate finished bootstrap and notified the executive
    Initialized,
    /// Isolate is hosting at least one running application
    Running,
    /// Isolate has exited or been torn down
    Terminated,
}

impl IsolateState {
    /// Initialized or later, and not yet terminated.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initialized | Self::Running)
    }
}

impl fmt::Display for IsolateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// Local handle for a peer OS process
pub struct ProcessProxy {
    pid: ProcessId,
    local: ProcessId,
    pipe: Arc<dyn MessagePipe>,
}

impl ProcessProxy {
    /// Create a proxy for peer `pid`, sending from `local` over `pipe`.
    pub fn new(pid: ProcessId, local: ProcessId, pipe: Arc<dyn MessagePipe>) -> Self {
        Self { pid, local, pipe }
    }

    /// Peer process id
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// New outgoing message addressed to this process.
    pub fn new_outgoing_message(
        &self,
        message_type: &str,
        payload: serde_json::Value,
    ) -> OutgoingMessage {
        OutgoingMessage::new(message_type, self.pid, payload)
    }

    /// Transmit a message over this proxy's channel.
    pub fn send(&self, message: OutgoingMessage) -> MessageResult<()> {
        self.pipe.send(&message.into_envelope(self.local))
    }
}

impl fmt::Debug for ProcessProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessProxy")
            .field("pid", &self.pid)
            .field("local", &self.local)
            .finish()
    }
}

/// Process proxy specialized for supervised isolates
///
/// State is mutated only by the executive's lifecycle message handler;
/// readers either poll [`IsolateProxy::state`] or block in
/// [`IsolateProxy::wait_for_state`].
pub struct IsolateProxy {
    process: ProcessProxy,
    state: Mutex<IsolateState>,
    state_changed: Condvar,
}

impl IsolateProxy {
    /// Wrap a freshly spawned process; state starts at `Created`.
    pub fn new(process: ProcessProxy) -> Self {
        Self {
            process,
            state: Mutex::new(IsolateState::Created),
            state_changed: Condvar::new(),
        }
    }

    /// The underlying process proxy
    pub fn process(&self) -> &ProcessProxy {
        &self.process
    }

    /// Isolate process id
    pub fn pid(&self) -> ProcessId {
        self.process.pid()
    }

    /// Current lifecycle state
    pub fn state(&self) -> IsolateState {
        *self.state.lock()
    }

    /// Record a state transition reported by the isolate and wake waiters.
    ///
    /// Transitions must be monotonic; `Terminated` is reachable from any
    /// state. A backwards transition is rejected as a protocol error.
    pub fn set_state(&self, next: IsolateState) -> LifecycleResult<()> {
        let mut state = self.state.lock();
        if next != IsolateState::Terminated && next < *state {
            return Err(LifecycleError::StateRegression {
                pid: self.pid(),
                from: *state,
                to: next,
            });
        }
        if *state != next {
            tracing::debug!(pid = %self.pid(), from = %*state, to = %next, "isolate state change");
            *state = next;
            self.state_changed.notify_all();
        }
        Ok(())
    }

    /// Block the calling thread until the isolate reaches `target` (or a
    /// later state), or until `timeout` elapses.
    pub fn wait_for_state(
        &self,
        target: IsolateState,
        timeout: Duration,
    ) -> LifecycleResult<IsolateState> {
        let mut state = self.state.lock();
        let result = self
            .state_changed
            .wait_while_for(&mut state, |s| *s < target, timeout);
        if result.timed_out() && *state < target {
            return Err(LifecycleError::WaitTimeout {
                pid: self.pid(),
                target,
                waited: timeout,
            });
        }
        Ok(*state)
    }
}

impl fmt::Debug for IsolateProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolateProxy")
            .field("pid", &self.pid())
            .field("state", &self.state())
            .finish()
    }
}

/// A registered proxy: plain process or supervised isolate
#[derive(Debug, Clone)]
pub enum ProxyEntry {
    /// Native process without isolate supervision
    Process(Arc<ProcessProxy>),
    /// Supervised isolate
    Isolate(Arc<IsolateProxy>),
}

impl ProxyEntry {
    /// Pid the entry is keyed by
    pub fn pid(&self) -> ProcessId {
        match self {
            Self::Process(p) => p.pid(),
            Self::Isolate(i) => i.pid(),
        }
    }
}

/// Owned, mutex-guarded registry of proxies keyed by process id
///
/// The registry is shared by reference into the modules that need lookups;
/// it is never process-global state.
pub struct ProcessRegistry {
    entries: Mutex<HashMap<ProcessId, ProxyEntry>>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a native process proxy. Idempotent: a pid that is already
    /// registered keeps its existing entry.
    pub fn register_process(&self, proxy: Arc<ProcessProxy>) {
        self.entries
            .lock()
            .entry(proxy.pid())
            .or_insert_with(|| ProxyEntry::Process(proxy));
    }

    /// Register an isolate proxy. Idempotent, like
    /// [`ProcessRegistry::register_process`].
    pub fn register_isolate(&self, proxy: Arc<IsolateProxy>) {
        self.entries
            .lock()
            .entry(proxy.pid())
            .or_insert_with(|| ProxyEntry::Isolate(proxy));
    }

    /// Look up any registered proxy.
    pub fn get(&self, pid: ProcessId) -> Option<ProxyEntry> {
        self.entries.lock().get(&pid).cloned()
    }

    /// Look up an isolate proxy. A pid registered as a plain process is a
    /// hard error: there must never be a second proxy kind for an isolate
    /// pid.
    pub fn isolate(&self, pid: ProcessId) -> LifecycleResult<Arc<IsolateProxy>> {
        match self.get(pid) {
            Some(ProxyEntry::Isolate(proxy)) => Ok(proxy),
            Some(ProxyEntry::Process(_)) => Err(LifecycleError::NotAnIsolate(pid)),
            None => Err(LifecycleError::UnknownIsolate(pid)),
        }
    }

    /// All registered native process proxies.
    pub fn processes(&self) -> Vec<Arc<ProcessProxy>> {
        self.entries
            .lock()
            .values()
            .filter_map(|entry| match entry {
                ProxyEntry::Process(p) => Some(p.clone()),
                ProxyEntry::Isolate(_) => None,
            })
            .collect()
    }

    /// All registered isolate proxies, in any state.
    pub fn isolates(&self) -> Vec<Arc<IsolateProxy>> {
        self.entries
            .lock()
            .values()
            .filter_map(|entry| match entry {
                ProxyEntry::Isolate(i) => Some(i.clone()),
                ProxyEntry::Process(_) => None,
            })
            .collect()
    }

    /// Remove and return the entry for a pid.
    pub fn remove(&self, pid: ProcessId) -> Option<ProxyEntry> {
        self.entries.lock().remove(&pid)
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::WireEnvelope;
    use proptest::prelude::*;
    use std::thread;

    struct NullPipe;

    impl MessagePipe for NullPipe {
        fn send(&self, _envelope: &WireEnvelope) -> MessageResult<()> {
            Ok(())
        }
    }

    fn isolate(pid: u32) -> Arc<IsolateProxy> {
        Arc::new(IsolateProxy::new(ProcessProxy::new(
            ProcessId(pid),
            ProcessId(1),
            Arc::new(NullPipe),
        )))
    }

    #[test]
    fn wait_for_state_unblocks_on_transition() {
        let proxy = isolate(7);
        let waiter = proxy.clone();
        let handle = thread::spawn(move || {
            waiter.wait_for_state(IsolateState::Initialized, Duration::from_secs(5))
        });

        proxy.set_state(IsolateState::Initialized).unwrap();
        let reached = handle.join().unwrap().unwrap();
        assert_eq!(reached, IsolateState::Initialized);
    }

    #[test]
    fn wait_for_state_times_out_with_typed_error() {
        let proxy = isolate(7);
        let err = proxy
            .wait_for_state(IsolateState::Initialized, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::WaitTimeout {
                pid: ProcessId(7),
                target: IsolateState::Initialized,
                ..
            }
        ));
        assert_eq!(proxy.state(), IsolateState::Created);
    }

    #[test]
    fn state_regression_is_rejected() {
        let proxy = isolate(9);
        proxy.set_state(IsolateState::Running).unwrap();
        let err = proxy.set_state(IsolateState::Initialized).unwrap_err();
        assert!(matches!(err, LifecycleError::StateRegression { .. }));

        // Termination is allowed from any state.
        proxy.set_state(IsolateState::Terminated).unwrap();
        assert_eq!(proxy.state(), IsolateState::Terminated);
    }

    #[test]
    fn registry_registration_is_idempotent() {
        let registry = ProcessRegistry::new();
        let proxy = isolate(12);
        proxy.set_state(IsolateState::Initialized).unwrap();

        registry.register_isolate(proxy.clone());
        registry.register_isolate(isolate(12));

        assert_eq!(registry.isolates().len(), 1);
        // The first registration wins; its state survives.
        assert_eq!(
            registry.isolate(ProcessId(12)).unwrap().state(),
            IsolateState::Initialized
        );
    }

    #[test]
    fn isolate_lookup_distinguishes_missing_and_mismatched() {
        let registry = ProcessRegistry::new();
        registry.register_process(Arc::new(ProcessProxy::new(
            ProcessId(3),
            ProcessId(1),
            Arc::new(NullPipe),
        )));

        assert!(matches!(
            registry.isolate(ProcessId(3)),
            Err(LifecycleError::NotAnIsolate(ProcessId(3)))
        ));
        assert!(matches!(
            registry.isolate(ProcessId(4)),
            Err(LifecycleError::UnknownIsolate(ProcessId(4)))
        ));
    }

    fn arbitrary_state() -> impl Strategy<Value = IsolateState> {
        prop_oneof![
            Just(IsolateState::Created),
            Just(IsolateState::Initialized),
            Just(IsolateState::Running),
            Just(IsolateState::Terminated),
        ]
    }

    proptest! {
        #[test]
        fn accepted_transitions_never_regress(
            transitions in prop::collection::vec(arbitrary_state(), 1..16)
        ) {
            let proxy = isolate(21);
            let mut observed = proxy.state();
            for next in transitions {
                if proxy.set_state(next).is_ok() {
                    let now = proxy.state();
                    prop_assert!(now >= observed || now == IsolateState::Terminated);
                    observed = now;
                }
            }
        }
    }
}
