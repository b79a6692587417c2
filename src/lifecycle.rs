//! Executive-side lifecycle module
//!
//! Orchestrates isolate creation and tracks every supervised process
//! through the shared [`ProcessRegistry`]. `new_isolate` spawns the OS
//! process, registers an [`IsolateProxy`] keyed by the new pid, and blocks
//! until the isolate reports `ISOLATE_INITIALIZED` or the configured
//! timeout elapses; a timeout is a typed error, never a proxy stuck in
//! `Created`.
//!
//! The module owns the handler registration for the lifecycle message
//! type. The `ISOLATE_INITIALIZED` handler is fire-and-forget on the wire:
//! it moves the proxy's state machine and wakes the blocked creator, and
//! never replies.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{LifecycleRequest, message_types};
use crate::config::WardenConfig;
use crate::error::{LifecycleResult, MessageError, Result};
use crate::messaging::dispatcher::{HandlerRegistration, MessageDispatcher, MessageHandler};
use crate::messaging::Message;
use crate::os::{OsInterface, SpawnedProcess};
use crate::process::{
    IsolateProxy, IsolateState, ProcessId, ProcessProxy, ProcessRegistry,
};

/// Executive-side lifecycle orchestration
pub struct LifecycleModule {
    core: Arc<LifecycleCore>,
    dispatcher: Arc<MessageDispatcher>,
    registration: Mutex<Option<HandlerRegistration>>,
}

struct LifecycleCore {
    registry: Arc<ProcessRegistry>,
    os: Arc<dyn OsInterface>,
    init_timeout: Duration,
}

impl LifecycleModule {
    /// Create the module over a shared registry, OS facade, and the
    /// executive's dispatcher.
    pub fn new(
        registry: Arc<ProcessRegistry>,
        os: Arc<dyn OsInterface>,
        dispatcher: Arc<MessageDispatcher>,
        config: &WardenConfig,
    ) -> Self {
        Self {
            core: Arc::new(LifecycleCore {
                registry,
                os,
                init_timeout: config.isolate_init_timeout(),
            }),
            dispatcher,
            registration: Mutex::new(None),
        }
    }

    /// Subscribe to lifecycle notifications. Must be called before any
    /// isolate is created; idempotent.
    pub fn load(&self) {
        let mut registration = self.registration.lock();
        if registration.is_none() {
            let handler: Arc<dyn MessageHandler> = self.core.clone();
            *registration = Some(
                self.dispatcher
                    .register_handler(message_types::LIFECYCLE, handler),
            );
        }
    }

    /// Cancel the lifecycle subscription.
    pub fn unload(&self) {
        if let Some(registration) = self.registration.lock().take() {
            self.dispatcher.cancel_registration(registration);
        }
    }

    /// Create a new isolate hosting the given application model.
    ///
    /// Spawns the isolate process, registers its proxy, and blocks the
    /// calling thread until the isolate signals initialization. On timeout
    /// the proxy stays registered in `Created` state (excluded from
    /// [`LifecycleModule::active_isolates`]) and a
    /// [`crate::error::LifecycleError::WaitTimeout`] is returned.
    pub fn new_isolate(
        &self,
        model: crate::container::AppModel,
    ) -> LifecycleResult<Arc<IsolateProxy>> {
        let SpawnedProcess { pid, pipe, listener } = self
            .core
            .os
            .create_process(&[model.name().to_string()])?;

        let proxy = Arc::new(IsolateProxy::new(ProcessProxy::new(
            pid,
            self.core.os.process_id(),
            pipe,
        )));
        self.core.registry.register_isolate(proxy.clone());

        // Inbound delivery starts only now that the proxy is registered;
        // an isolate that reports immediately cannot be mistaken for an
        // unknown pid. Channel EOF means the process is gone: tear the
        // proxy down and reap it.
        if let Some(listener) = listener {
            let registry = self.core.registry.clone();
            let os = self.core.os.clone();
            let watched = proxy.clone();
            listener.start(move || {
                tracing::info!(pid = %watched.pid(), "isolate channel closed");
                if let Err(error) = watched.set_state(IsolateState::Terminated) {
                    tracing::warn!(pid = %watched.pid(), %error, "terminate transition rejected");
                }
                registry.remove(watched.pid());
                os.reap(watched.pid());
            })?;
        }

        tracing::info!(%pid, %model, "waiting for isolate initialization");
        proxy.wait_for_state(IsolateState::Initialized, self.core.init_timeout)?;
        Ok(proxy)
    }

    /// Register an existing native process. Idempotent.
    pub fn register_process(&self, process: Arc<ProcessProxy>) {
        self.core.registry.register_process(process);
    }

    /// Isolate proxy for a pid, if the lifecycle module created or
    /// registered that isolate.
    pub fn get_isolate(&self, pid: ProcessId) -> LifecycleResult<Arc<IsolateProxy>> {
        self.core.registry.isolate(pid)
    }

    /// All isolates that reached `Initialized` and have not terminated.
    pub fn active_isolates(&self) -> Vec<Arc<IsolateProxy>> {
        self.core
            .registry
            .isolates()
            .into_iter()
            .filter(|isolate| isolate.state().is_active())
            .collect()
    }

    /// All registered native processes.
    pub fn processes(&self) -> Vec<Arc<ProcessProxy>> {
        self.core.registry.processes()
    }
}

impl MessageHandler for LifecycleCore {
    fn handle_message(&self, message: &Message) -> Result<()> {
        let request = LifecycleRequest::from_message(message)?;
        match request {
            LifecycleRequest::IsolateInitialized { isolate_id } => {
                // An initialization report for a pid we never registered is
                // a protocol violation; surface it instead of guessing.
                let proxy = self.registry.isolate(isolate_id).map_err(|_| {
                    MessageError::ProtocolViolation(format!(
                        "ISOLATE_INITIALIZED for unregistered isolate {isolate_id}"
                    ))
                })?;

                // The creator is blocked on this transition.
                proxy.set_state(IsolateState::Initialized)?;
                // Fire-and-forget request: no response.
                Ok(())
            }
            other => {
                tracing::warn!(
                    command = other.command_id(),
                    sender = %message.sender(),
                    "unexpected command on lifecycle channel"
                );
                Ok(())
            }
        }
    }
}
