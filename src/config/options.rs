//! Lifecycle options for a managed instance.

use std::time::Duration;

use crate::config::helpers::{EnvSource, ProcessEnv, resolve_with};
use crate::error::ConfigError;
use crate::retry::{ConnectMode, RetryPolicy};

/// How an instance is started, probed and torn down, plus settings passed
/// straight through to the container runtime.
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    /// How long to wait for the readiness log line.
    pub startup_timeout: Duration,
    /// How client connections are made.
    pub connect_mode: ConnectMode,
    /// Whether `start()` opens a client connection once the server is ready.
    pub probe_on_start: bool,
    /// Remove the container after stopping it.
    pub remove_on_stop: bool,
    /// Pull the image when it is not present locally.
    pub auto_pull: bool,
    /// Container name. The runtime picks one when `None`.
    pub container_name: Option<String>,
    /// Extra environment variables, applied after the server settings.
    pub extra_env: Vec<(String, String)>,
    /// Container labels.
    pub labels: Vec<(String, String)>,
    /// Network mode (runtime default when `None`).
    pub network_mode: Option<String>,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            startup_timeout: policy.backoff.saturating_mul(policy.max_attempts),
            connect_mode: ConnectMode::Tolerant(policy),
            probe_on_start: true,
            remove_on_stop: true,
            auto_pull: true,
            container_name: None,
            extra_env: Vec::new(),
            labels: vec![(
                "org.testcontainers.lang".to_string(),
                "rust".to_string(),
            )],
            network_mode: None,
        }
    }
}

impl InstanceOptions {
    /// Defaults, with retry limits read from `TC_MAX_TRIES` and
    /// `TC_POLLING_INTERVAL` (seconds) in the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve_from(&ProcessEnv)
    }

    pub(crate) fn resolve_from(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let defaults = RetryPolicy::default();

        let max_attempts = resolve_with(env, &["TC_MAX_TRIES"], None, defaults.max_attempts, |s| {
            match s.parse::<u32>() {
                Ok(0) => Err("must be at least 1".to_string()),
                Ok(n) => Ok(n),
                Err(e) => Err(e.to_string()),
            }
        })?;
        let interval_secs = resolve_with(
            env,
            &["TC_POLLING_INTERVAL"],
            None,
            defaults.backoff.as_secs(),
            |s| match s.parse::<u64>() {
                // Zero would also make the readiness deadline zero.
                Ok(0) => Err("must be at least 1 second".to_string()),
                Ok(n) => Ok(n),
                Err(e) => Err(e.to_string()),
            },
        )?;

        let policy = RetryPolicy::new(max_attempts, Duration::from_secs(interval_secs));

        Ok(Self {
            startup_timeout: policy.backoff.saturating_mul(policy.max_attempts),
            connect_mode: ConnectMode::Tolerant(policy),
            ..Self::default()
        })
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_connect_mode(mut self, mode: ConnectMode) -> Self {
        self.connect_mode = mode;
        self
    }

    pub fn with_probe_on_start(mut self, probe: bool) -> Self {
        self.probe_on_start = probe;
        self
    }

    pub fn with_remove_on_stop(mut self, remove: bool) -> Self {
        self.remove_on_stop = remove;
        self
    }

    pub fn with_auto_pull(mut self, pull: bool) -> Self {
        self.auto_pull = pull;
        self
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }
}
