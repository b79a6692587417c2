//! Error types for the warden supervision core
//!
//! One thiserror enum per subsystem, with conversions into the top-level
//! [`WardenError`] at module boundaries.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::container::AppId;
use crate::process::{IsolateState, ProcessId};

/// Top-level error for the crate
#[derive(Debug, Error)]
pub enum WardenError {
    /// Messaging and transport errors
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// Isolate lifecycle errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Application container errors
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// OS facade errors
    #[error("OS error: {0}")]
    Os(#[from] OsError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Initialization errors
    #[error("Initialization failed: {0}")]
    Init(String),
}

/// Messaging and dispatch errors
#[derive(Debug, Error)]
pub enum MessageError {
    /// A message body did not match the expected command schema
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Envelope (de)serialization failed
    #[error("Envelope encoding failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// The underlying channel to the peer is gone
    #[error("Channel to peer closed")]
    ChannelClosed,

    /// No response arrived for a request within the timeout
    #[error("No response to {command} from {peer} within {timeout:?}")]
    ResponseTimeout {
        /// Command id of the unanswered request
        command: String,
        /// Peer the request was sent to
        peer: ProcessId,
        /// How long the sender waited
        timeout: Duration,
    },

    /// A peer violated the messaging protocol
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// IO error on the transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience result alias for messaging operations
pub type MessageResult<T> = std::result::Result<T, MessageError>;

/// Isolate lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// An isolate did not reach the awaited state in time
    #[error("Isolate {pid} did not reach {target} within {waited:?}")]
    WaitTimeout {
        /// Isolate process id
        pid: ProcessId,
        /// State that was being waited for
        target: IsolateState,
        /// Wait duration that elapsed
        waited: Duration,
    },

    /// No isolate proxy is registered for the given pid
    #[error("No isolate registered for {0}")]
    UnknownIsolate(ProcessId),

    /// A proxy is registered for the pid, but it is a plain process proxy
    #[error("Process {0} is registered but is not an isolate")]
    NotAnIsolate(ProcessId),

    /// A state transition would move backwards in the lifecycle ordering
    #[error("Isolate {pid} cannot move from {from} back to {to}")]
    StateRegression {
        /// Isolate process id
        pid: ProcessId,
        /// Current state
        from: IsolateState,
        /// Rejected target state
        to: IsolateState,
    },

    /// Spawning the isolate process failed
    #[error("OS error: {0}")]
    Os(#[from] OsError),
}

/// Convenience result alias for lifecycle operations
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// Application container errors
#[derive(Debug, Error)]
pub enum ContainerError {
    /// No application with the given id is running in this container
    #[error("No application {0} in container")]
    UnknownApp(AppId),

    /// The container refused to start the application
    #[error("Application start failed: {0}")]
    StartFailed(String),

    /// A non-forced destroy was rejected by the application
    #[error("Application {0} rejected destroy")]
    DestroyRejected(AppId),

    /// The application is not in a state that permits the operation
    #[error("Application {app} is {actual}, expected {expected}")]
    InvalidState {
        /// Application id
        app: AppId,
        /// Required status for the operation
        expected: &'static str,
        /// Actual status
        actual: &'static str,
    },
}

/// Convenience result alias for container operations
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// OS facade errors
#[derive(Debug, Error)]
pub enum OsError {
    /// Process creation failed
    #[error("Failed to spawn process: {0}")]
    Spawn(#[from] io::Error),

    /// The configured isolate launch command is empty
    #[error("Isolate launch command is empty")]
    EmptyCommand,

    /// Spawned process is missing a stdin pipe
    #[error("Spawned process did not expose stdin")]
    MissingStdin,

    /// Spawned process is missing a stdout pipe
    #[error("Spawned process did not expose stdout")]
    MissingStdout,

    /// The executive pid is not available in this process environment
    #[error("Executive process id not set in environment ({0})")]
    MissingExecutivePid(&'static str),

    /// Operation not available on this side of the process boundary
    #[error("Unsupported OS operation: {0}")]
    Unsupported(&'static str),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Cannot read config file {path}: {source}")]
    Read {
        /// Path that failed to load
        path: PathBuf,
        /// Underlying IO error
        source: io::Error,
    },

    /// Config file is not valid JSON
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// Path that failed to parse
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },
}

/// Result type using [`WardenError`]
pub type Result<T> = std::result::Result<T, WardenError>;
