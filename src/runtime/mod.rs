//! Container runtime abstraction.
//!
//! [`EventStoreInstance`](crate::EventStoreInstance) only needs a handful of
//! primitives from the runtime: create and start a container, follow its
//! logs, look up a mapped port, and stop it. [`DockerRuntime`] implements them against the
//! Docker Engine API; [`crate::testing::FakeRuntime`] implements them in
//! memory.

pub mod docker;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::RuntimeError;

pub use docker::DockerRuntime;

/// Combined stdout/stderr output, in arbitrary chunks (not necessarily
/// split on line boundaries).
pub type LogStream = BoxStream<'static, Result<String, RuntimeError>>;

/// Everything the runtime needs to launch a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Container name. The runtime picks one when `None`.
    pub name: Option<String>,
    /// Command arguments.
    pub cmd: Vec<String>,
    /// Environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// Container ports to bind to ephemeral host ports.
    pub exposed_ports: Vec<u16>,
    /// Labels: (name, value).
    pub labels: Vec<(String, String)>,
    /// Network mode.
    pub network_mode: Option<String>,
    /// Pull the image when it is not present locally.
    pub auto_pull: bool,
}

impl ContainerSpec {
    /// A spec for `image` with nothing else configured.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            auto_pull: true,
            ..Default::default()
        }
    }

    /// Register a port to be exposed. Duplicates are ignored.
    pub fn expose(&mut self, port: u16) {
        if !self.exposed_ports.contains(&port) {
            self.exposed_ports.push(port);
        }
    }

    /// Set an environment variable, replacing an earlier value for the key.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.env.push((key, value)),
        }
    }

    /// Look up an environment variable.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The container primitives a managed instance is built on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull the image (if needed) and create a container. Returns its id.
    ///
    /// Creation and start are separate so the caller owns the id, and can
    /// tear the container down, before anything runs.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start a created container.
    async fn start(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Follow the container's combined output from the beginning.
    async fn logs(&self, container_id: &str) -> Result<LogStream, RuntimeError>;

    /// Host port bound to `container_port`.
    async fn host_port(&self, container_id: &str, container_port: u16) -> Result<u16, RuntimeError>;

    /// Host name or address where mapped ports are reachable.
    fn host(&self) -> String;

    /// Stop the container, removing it when `remove` is set.
    async fn stop(&self, container_id: &str, remove: bool) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_env_replaces_existing_keys() {
        let mut spec = ContainerSpec::new("eventstore/eventstore:latest");
        spec.set_env("EVENTSTORE_CLUSTER_SIZE", "1");
        spec.set_env("EVENTSTORE_CLUSTER_SIZE", "3");

        assert_eq!(spec.env.len(), 1);
        assert_eq!(spec.env_var("EVENTSTORE_CLUSTER_SIZE"), Some("3"));
    }

    #[test]
    fn expose_ignores_duplicates() {
        let mut spec = ContainerSpec::new("eventstore/eventstore:latest");
        spec.expose(2113);
        spec.expose(2113);
        spec.expose(1113);

        assert_eq!(spec.exposed_ports, vec![2113, 1113]);
    }
}
