//! Isolate-side process runtime
//!
//! The counterpart of the executive running inside a spawned isolate
//! process. On bootstrap it builds a proxy to the executive, registers
//! handlers for the client-command and legacy IXC message types,
//! constructs the application container for the requested model, runs any
//! configured one-shot initializers, and reports `ISOLATE_INITIALIZED`
//! back to the executive (fire-and-forget).
//!
//! Inbound commands are dispatched by command id. Container failures are
//! converted to `FAILURE` responses at the handler boundary; they never
//! kill the dispatch thread. A known command id with a malformed payload
//! is refused with `FAILURE`, while an unknown command id gets a generic
//! acknowledgement. A termination request that arrives while a
//! command is being dispatched is deferred until the handler (and its
//! response) completes — the `dispatching`/`exit_after` guard under one
//! mutex must be preserved exactly.

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use std::sync::Arc;

use crate::command::{LifecycleRequest, Response, message_types};
use crate::config::WardenConfig;
use crate::container::{self, AppContainer, AppId, AppModel, Application, LifecycleObserver};
use crate::error::{MessageError, Result, WardenError};
use crate::messaging::dispatcher::{HandlerRegistration, MessageDispatcher, MessageHandler};
use crate::messaging::sender::RequestSender;
use crate::messaging::transport::MessagePipe;
use crate::messaging::Message;
use crate::os::OsInterface;
use crate::process::{ProcessId, ProcessProxy, ProcessRegistry};

/// One-shot initializer run during isolate bootstrap
pub type Initializer = Box<dyn FnOnce() -> Result<()> + Send>;

/// Builder for [`IsolateRuntime`]
pub struct IsolateRuntimeBuilder {
    os: Arc<dyn OsInterface>,
    executive_pipe: Arc<dyn MessagePipe>,
    model: AppModel,
    config: WardenConfig,
    container: Option<Box<dyn AppContainer>>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    initializers: Vec<Initializer>,
}

impl IsolateRuntimeBuilder {
    /// Override the configuration (defaults otherwise).
    pub fn config(mut self, config: WardenConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply an application container instead of the reference one for
    /// the model.
    pub fn container(mut self, container: Box<dyn AppContainer>) -> Self {
        self.container = Some(container);
        self
    }

    /// Attach a lifecycle observer (windowing client, service registry).
    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Add a one-shot initializer run before the initialized report.
    pub fn initializer(mut self, init: Initializer) -> Self {
        self.initializers.push(init);
        self
    }

    /// Bootstrap the runtime: register handlers, build the container, run
    /// initializers, then report initialization to the executive.
    pub fn build(self) -> Result<IsolateRuntime> {
        let isolate_id = self.os.process_id();
        let executive_pid = self.os.executive_process_id();

        let registry = Arc::new(ProcessRegistry::new());
        let executive = Arc::new(ProcessProxy::new(
            executive_pid,
            isolate_id,
            self.executive_pipe,
        ));
        registry.register_process(executive.clone());

        let dispatcher = Arc::new(MessageDispatcher::new());
        let container = self
            .container
            .unwrap_or_else(|| container::container_for(self.model));

        let core = Arc::new(IsolateCore {
            isolate_id,
            executive: executive.clone(),
            app_model: self.model,
            container: Mutex::new(container),
            observers: self.observers,
            service_port: Mutex::new(None),
            state_change: Mutex::new(StateChange::default()),
            exited: Condvar::new(),
        });

        // Once these registrations complete we can receive commands.
        let handler: Arc<dyn MessageHandler> = core.clone();
        let registrations = vec![
            dispatcher.register_handler(message_types::CLIENT, handler.clone()),
            dispatcher.register_handler(message_types::IXC, handler),
        ];

        tracing::info!(%isolate_id, model = %self.model, "isolate runtime initializing");
        for init in self.initializers {
            init().map_err(|e| WardenError::Init(format!("isolate initializer failed: {e}")))?;
        }

        // Report readiness. Fire-and-forget: the executive must not reply.
        let sender = RequestSender::new(dispatcher.clone(), self.config.response_timeout());
        sender.send_request_async(
            &executive,
            &LifecycleRequest::IsolateInitialized { isolate_id },
        )?;

        Ok(IsolateRuntime {
            core,
            dispatcher,
            registry,
            _registrations: registrations,
        })
    }
}

#[derive(Default)]
struct StateChange {
    dispatching: bool,
    exit_after: bool,
    terminated: bool,
}

struct IsolateCore {
    isolate_id: ProcessId,
    executive: Arc<ProcessProxy>,
    app_model: AppModel,
    container: Mutex<Box<dyn AppContainer>>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    service_port: Mutex<Option<u16>>,
    state_change: Mutex<StateChange>,
    exited: Condvar,
}

/// The runtime hosted inside an isolate process
pub struct IsolateRuntime {
    core: Arc<IsolateCore>,
    dispatcher: Arc<MessageDispatcher>,
    registry: Arc<ProcessRegistry>,
    _registrations: Vec<HandlerRegistration>,
}

impl IsolateRuntime {
    /// Start building a runtime for the given app model, talking to the
    /// executive over `executive_pipe`.
    pub fn builder(
        os: Arc<dyn OsInterface>,
        executive_pipe: Arc<dyn MessagePipe>,
        model: AppModel,
    ) -> IsolateRuntimeBuilder {
        IsolateRuntimeBuilder {
            os,
            executive_pipe,
            model,
            config: WardenConfig::default(),
            container: None,
            observers: Vec::new(),
            initializers: Vec::new(),
        }
    }

    /// This isolate's process id
    pub fn isolate_id(&self) -> ProcessId {
        self.core.isolate_id
    }

    /// App model hosted by this isolate
    pub fn app_model(&self) -> AppModel {
        self.core.app_model
    }

    /// Proxy to the executive process
    pub fn executive(&self) -> &Arc<ProcessProxy> {
        &self.core.executive
    }

    /// The per-process dispatcher; the transport listener feeds it.
    pub fn dispatcher(&self) -> Arc<MessageDispatcher> {
        self.dispatcher.clone()
    }

    /// The isolate-side process registry.
    pub fn registry(&self) -> Arc<ProcessRegistry> {
        self.registry.clone()
    }

    /// Number of applications currently hosted by the container.
    pub fn app_count(&self) -> usize {
        self.core.container.lock().app_count()
    }

    /// IXC port announced by the executive, if any.
    pub fn service_port(&self) -> Option<u16> {
        *self.core.service_port.lock()
    }

    /// Request process termination. If a message is currently being
    /// dispatched, the exit is deferred until its handler returns and the
    /// response has been sent.
    pub fn terminate_isolate(&self) {
        self.core.terminate();
    }

    /// Whether termination has taken effect.
    pub fn is_terminated(&self) -> bool {
        self.core.state_change.lock().terminated
    }

    /// Block until termination takes effect. The process entry point waits
    /// here and then exits with status 0.
    pub fn wait_for_termination(&self) {
        let mut guard = self.core.state_change.lock();
        while !guard.terminated {
            self.core.exited.wait(&mut guard);
        }
    }
}

impl IsolateCore {
    fn terminate(&self) {
        let mut guard = self.state_change.lock();
        if guard.dispatching {
            guard.exit_after = true;
        } else if !guard.terminated {
            guard.terminated = true;
            self.exited.notify_all();
        }
    }

    fn handle_start_app(&self, app: Application, args: Vec<String>) -> Response {
        tracing::info!(title = app.title, "START_APP");

        for observer in &self.observers {
            observer.on_before_application_started(&app);
        }

        match self.container.lock().start_app(&app, &args) {
            Ok(app_id) => Response::success_with_value(app_id.0),
            Err(error) => {
                tracing::warn!(%error, title = app.title, "application start failed");
                Response::failure_with_value(-1)
            }
        }
    }

    fn handle_pause_app(&self, app_id: AppId) -> Response {
        tracing::info!(%app_id, "PAUSE_APP");
        match self.container.lock().pause_app(app_id) {
            Ok(()) => Response::success(),
            Err(error) => {
                tracing::warn!(%error, %app_id, "pause failed");
                Response::failure()
            }
        }
    }

    fn handle_resume_app(&self, app_id: AppId) -> Response {
        tracing::info!(%app_id, "RESUME_APP");
        match self.container.lock().resume_app(app_id) {
            Ok(()) => Response::success(),
            Err(error) => {
                tracing::warn!(%error, %app_id, "resume failed");
                Response::failure()
            }
        }
    }

    fn handle_destroy_app(&self, app_id: AppId, unconditional: bool) -> Response {
        tracing::info!(%app_id, unconditional, "DESTROY_APP");
        let remaining = {
            let mut container = self.container.lock();
            match container.destroy_app(app_id, unconditional) {
                Ok(()) => container.app_count(),
                Err(error) => {
                    tracing::warn!(%error, %app_id, "destroy failed");
                    return Response::failure();
                }
            }
        };

        if remaining == 0 {
            // Last application gone: the isolate has nothing left to host.
            // Deferred until this dispatch finishes.
            tracing::info!("last application destroyed, requesting isolate termination");
            self.terminate();
        }
        Response::success()
    }

    /// Legacy IXC port announcement: record the port for the service
    /// registry client.
    fn handle_ixc(&self, message: &Message) -> Result<Option<Response>> {
        #[derive(Deserialize)]
        struct PortAnnouncement {
            port: u16,
        }

        let announcement: PortAnnouncement = serde_json::from_value(message.payload().clone())
            .map_err(|e| MessageError::Malformed(format!("ixc port announcement: {e}")))?;
        *self.service_port.lock() = Some(announcement.port);
        tracing::info!(port = announcement.port, "ixc port announced");
        Ok(Some(Response::success()))
    }

    fn dispatch_command(&self, message: &Message) -> Result<Option<Response>> {
        if message.message_type() == message_types::IXC {
            return self.handle_ixc(message);
        }

        let request = match LifecycleRequest::from_message(message) {
            Ok(request) => request,
            Err(error) => {
                // A known command id with a payload that misses its schema
                // is a malformed request and gets refused. Anything else is
                // acknowledged generically so the sender is not left
                // waiting.
                let command = message.payload().get("command").and_then(|c| c.as_str());
                return Ok(Some(match command {
                    Some(id) if LifecycleRequest::is_known_command(id) => {
                        tracing::warn!(command = id, %error, "malformed lifecycle command");
                        Response::failure()
                    }
                    _ => {
                        tracing::warn!(
                            payload = %message.payload(),
                            "unknown client command, acknowledging"
                        );
                        Response::success()
                    }
                }));
            }
        };

        let response = match request {
            LifecycleRequest::StartApp { app, args } => self.handle_start_app(app, args),
            LifecycleRequest::PauseApp { app_id } => self.handle_pause_app(app_id),
            LifecycleRequest::ResumeApp { app_id } => self.handle_resume_app(app_id),
            LifecycleRequest::DestroyApp {
                app_id,
                unconditional,
            } => self.handle_destroy_app(app_id, unconditional),
            LifecycleRequest::IsolateInitialized { .. } => {
                tracing::warn!(
                    sender = %message.sender(),
                    "ISOLATE_INITIALIZED on client channel ignored"
                );
                return Ok(None);
            }
        };
        Ok(Some(response))
    }
}

impl MessageHandler for IsolateCore {
    fn handle_message(&self, message: &Message) -> Result<()> {
        self.state_change.lock().dispatching = true;

        let result = self.dispatch_command(message).and_then(|response| {
            if let Some(response) = response {
                message.respond(response.to_payload()?)?;
            }
            Ok(())
        });

        let mut guard = self.state_change.lock();
        guard.dispatching = false;
        if guard.exit_after && !guard.terminated {
            guard.terminated = true;
            self.exited.notify_all();
        }

        result
    }
}
