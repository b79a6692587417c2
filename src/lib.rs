//! Warden – executive/isolate process supervision and lifecycle messaging
//!
//! This crate implements the supervision core between an "executive"
//! process and the isolated application-runtime processes it creates:
//! - Typed message envelopes and a per-process dispatcher with handler
//!   registration, cancellation, and request/response correlation
//! - A schema'd lifecycle command model (start/pause/resume/destroy,
//!   isolate-initialized) with `SUCCESS`/`FAILURE` responses
//! - Process and isolate proxies with a monotonic lifecycle state machine,
//!   condvar waits with timeouts, and an owned process registry
//! - The executive-side lifecycle module and the isolate-side runtime,
//!   connected over ordered per-process NDJSON channels

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod command;
pub mod config;
pub mod container;
pub mod error;
pub mod isolate;
pub mod lifecycle;
pub mod messaging;
pub mod os;
pub mod process;

// Re-export key types for convenience
pub use command::{LifecycleRequest, Response, ResponseCode};
pub use config::WardenConfig;
pub use container::{AppContainer, AppId, AppModel, Application};
pub use error::{Result, WardenError};
pub use isolate::IsolateRuntime;
pub use lifecycle::LifecycleModule;
pub use messaging::{MessageDispatcher, RequestSender};
pub use process::{IsolateProxy, IsolateState, ProcessId, ProcessRegistry};

/// Current version of the warden crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
