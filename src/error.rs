//! Error types for the EventStoreDB fixture.

use std::time::Duration;

use thiserror::Error;

/// Result type for instance operations.
pub type Result<T> = std::result::Result<T, InstanceError>;

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value was present but could not be used.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Setting or environment variable name.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// A secure (TLS) connection was requested.
    #[error("Accessing secure EventStore clusters is currently unsupported")]
    UnsupportedSecurityMode,
}

/// Errors reported by a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime daemon could not be reached.
    #[error("Container runtime not available: {reason}")]
    Unavailable {
        /// Reason why the runtime is unavailable.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePull {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create container from '{image}': {reason}")]
    ContainerCreate {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container '{id}': {reason}")]
    ContainerStart {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to inspect the container.
    #[error("Failed to inspect container '{id}': {reason}")]
    Inspect {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The container port has no host binding.
    #[error("Port {port}/tcp of container '{id}' is not mapped to the host")]
    PortNotMapped {
        /// Container id.
        id: String,
        /// Port inside the container.
        port: u16,
    },

    /// Reading the log stream failed.
    #[error("Failed to read logs of container '{id}': {reason}")]
    Logs {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to stop or remove the container.
    #[error("Failed to stop container '{id}': {reason}")]
    Stop {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Errors raised by [`EventStoreInstance`](crate::EventStoreInstance).
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Invalid or unsupported configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The runtime failed to launch the container, or it exited before
    /// becoming ready.
    #[error("Failed to start container from '{image}': {reason}")]
    ContainerStart {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// The readiness line never appeared within the deadline.
    #[error("Container did not log {pattern:?} within {timeout:?}{}", format_tail(.recent_logs))]
    ReadinessTimeout {
        /// Readiness pattern that was awaited.
        pattern: String,
        /// Deadline that was exceeded.
        timeout: Duration,
        /// Last log lines seen before giving up.
        recent_logs: Vec<String>,
    },

    /// Every connection attempt failed.
    #[error("Could not connect after {attempts} attempts: {last_error}")]
    ConnectionTimeout {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// A single connection attempt failed (strict mode).
    #[error("Connection failed: {reason}")]
    Connection {
        /// Reason for failure.
        reason: String,
    },

    /// A URL was requested for a secure configuration.
    #[error("Accessing secure EventStore clusters is currently unsupported")]
    UnsupportedSecurityMode,

    /// The handle has not reached the ready state.
    #[error("Instance is not started")]
    NotStarted,

    /// The operation is not valid in the handle's current state.
    #[error("Cannot {operation} an instance in state {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State the handle was in.
        state: crate::instance::InstanceState,
    },

    /// Any other runtime failure (port lookup, teardown).
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("; last log lines:\n{}", lines.join("\n"))
    }
}
