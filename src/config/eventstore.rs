//! EventStoreDB server settings.
//!
//! Each field maps to one `EVENTSTORE_*` variable inside the container. Only
//! insecure (no TLS) servers are supported.

use std::fmt;
use std::str::FromStr;

use crate::config::helpers::{
    EnvSource, ProcessEnv, parse_port, resolve, resolve_bool, resolve_with,
};
use crate::error::ConfigError;

/// Default image reference.
pub const DEFAULT_IMAGE: &str = "eventstore/eventstore:latest";
/// Default HTTP (and gRPC) port inside the container.
pub const DEFAULT_HTTP_PORT: u16 = 2113;
/// Default external TCP port inside the container.
pub const DEFAULT_TCP_PORT: u16 = 1113;

/// Which projections the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionMode {
    /// Projections disabled.
    None,
    /// System projections only.
    System,
    /// System and user projections.
    #[default]
    All,
}

impl fmt::Display for ProjectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::System => write!(f, "system"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for ProjectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "system" => Ok(Self::System),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "invalid projection mode '{}', expected 'none', 'system' or 'all'",
                s
            )),
        }
    }
}

/// Server settings for an EventStoreDB container.
///
/// Build one with [`EventStoreConfig::builder`]; the builder resolves every
/// field from an explicit value, then the environment, then the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Image reference.
    pub image: String,
    /// HTTP port inside the container. `None` leaves it unexposed.
    pub http_port: Option<u16>,
    /// External TCP port inside the container. `None` leaves it unexposed.
    pub tcp_port: Option<u16>,
    /// Number of cluster nodes.
    pub cluster_size: u32,
    /// Projection execution mode.
    pub run_projections: ProjectionMode,
    /// Whether the standard projections start with the server.
    pub start_standard_projections: bool,
    /// Run without TLS. Only `true` is supported.
    pub insecure: bool,
    /// Enable the legacy AtomPub HTTP API.
    pub enable_atom_pub_over_http: bool,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            http_port: Some(DEFAULT_HTTP_PORT),
            tcp_port: Some(DEFAULT_TCP_PORT),
            cluster_size: 1,
            run_projections: ProjectionMode::All,
            start_standard_projections: true,
            insecure: true,
            enable_atom_pub_over_http: true,
        }
    }
}

impl EventStoreConfig {
    /// Start building a configuration.
    pub fn builder() -> EventStoreConfigBuilder {
        EventStoreConfigBuilder::default()
    }

    /// Resolve every field from the process environment and defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().resolve()
    }

    /// Fail if this configuration asks for something the fixture cannot do.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.insecure {
            return Err(ConfigError::UnsupportedSecurityMode);
        }
        if self.cluster_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cluster_size".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }
        if self.image.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "image".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        for (key, port) in [("http_port", self.http_port), ("tcp_port", self.tcp_port)] {
            if port == Some(0) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "port must be between 1 and 65535".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Ports to expose, HTTP first.
    pub fn exposed_ports(&self) -> Vec<u16> {
        self.http_port.into_iter().chain(self.tcp_port).collect()
    }

    /// Server settings as container environment variables.
    pub fn container_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("EVENTSTORE_CLUSTER_SIZE".to_string(), self.cluster_size.to_string()),
            ("EVENTSTORE_RUN_PROJECTIONS".to_string(), self.run_projections.to_string()),
            (
                "EVENTSTORE_START_STANDARD_PROJECTIONS".to_string(),
                self.start_standard_projections.to_string(),
            ),
        ];
        if let Some(port) = self.tcp_port {
            env.push(("EVENTSTORE_EXT_TCP_PORT".to_string(), port.to_string()));
        }
        if let Some(port) = self.http_port {
            env.push(("EVENTSTORE_HTTP_PORT".to_string(), port.to_string()));
        }
        env.push(("EVENTSTORE_INSECURE".to_string(), self.insecure.to_string()));
        env.push((
            "EVENTSTORE_ENABLE_ATOM_PUB_OVER_HTTP".to_string(),
            self.enable_atom_pub_over_http.to_string(),
        ));
        env
    }

    /// Command line passed to the server.
    pub fn command(&self) -> Vec<String> {
        if self.insecure {
            vec!["--insecure".to_string()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortChoice {
    Port(u16),
    Disabled,
}

/// Explicit values for [`EventStoreConfig`]. Anything left unset is read
/// from the environment or falls back to its default.
#[derive(Debug, Clone, Default)]
pub struct EventStoreConfigBuilder {
    image: Option<String>,
    http_port: Option<PortChoice>,
    tcp_port: Option<PortChoice>,
    cluster_size: Option<u32>,
    run_projections: Option<ProjectionMode>,
    start_standard_projections: Option<bool>,
    insecure: Option<bool>,
    enable_atom_pub_over_http: Option<bool>,
}

impl EventStoreConfigBuilder {
    /// Image reference. Env: `EVENTSTORE_IMAGE`.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// HTTP port inside the container. Env: `EVENTSTORE_HTTP_PORT` or
    /// `EVENTSTORE_EXT_HTTP_PORT`.
    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = Some(PortChoice::Port(port));
        self
    }

    /// Do not expose the HTTP port, regardless of the environment.
    pub fn without_http_port(mut self) -> Self {
        self.http_port = Some(PortChoice::Disabled);
        self
    }

    /// External TCP port inside the container. Env: `EVENTSTORE_EXT_TCP_PORT`.
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = Some(PortChoice::Port(port));
        self
    }

    /// Do not expose the TCP port, regardless of the environment.
    pub fn without_tcp_port(mut self) -> Self {
        self.tcp_port = Some(PortChoice::Disabled);
        self
    }

    /// Number of cluster nodes, at least one.
    pub fn cluster_size(mut self, size: u32) -> Self {
        self.cluster_size = Some(size);
        self
    }

    /// Which projections run.
    pub fn run_projections(mut self, mode: ProjectionMode) -> Self {
        self.run_projections = Some(mode);
        self
    }

    /// Start the standard projections with the server.
    pub fn start_standard_projections(mut self, enabled: bool) -> Self {
        self.start_standard_projections = Some(enabled);
        self
    }

    /// Disable TLS. Resolving fails when this ends up `false`.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = Some(insecure);
        self
    }

    /// Enable the legacy AtomPub HTTP API.
    pub fn enable_atom_pub_over_http(mut self, enabled: bool) -> Self {
        self.enable_atom_pub_over_http = Some(enabled);
        self
    }

    /// Resolve against the process environment.
    pub fn resolve(self) -> Result<EventStoreConfig, ConfigError> {
        self.resolve_from(&ProcessEnv)
    }

    /// Resolve against the given environment.
    pub fn resolve_from(self, env: &impl EnvSource) -> Result<EventStoreConfig, ConfigError> {
        let defaults = EventStoreConfig::default();

        let config = EventStoreConfig {
            image: resolve(env, &["EVENTSTORE_IMAGE"], self.image, defaults.image)?,
            http_port: resolve_port(
                env,
                &["EVENTSTORE_HTTP_PORT", "EVENTSTORE_EXT_HTTP_PORT"],
                self.http_port,
                DEFAULT_HTTP_PORT,
            )?,
            tcp_port: resolve_port(
                env,
                &["EVENTSTORE_EXT_TCP_PORT"],
                self.tcp_port,
                DEFAULT_TCP_PORT,
            )?,
            cluster_size: resolve_with(
                env,
                &["EVENTSTORE_CLUSTER_SIZE"],
                self.cluster_size,
                defaults.cluster_size,
                |s| match s.parse::<u32>() {
                    Ok(0) => Err("must be a positive integer".to_string()),
                    Ok(n) => Ok(n),
                    Err(e) => Err(e.to_string()),
                },
            )?,
            run_projections: resolve(
                env,
                &["EVENTSTORE_RUN_PROJECTIONS"],
                self.run_projections,
                defaults.run_projections,
            )?,
            start_standard_projections: resolve_bool(
                env,
                &["EVENTSTORE_START_STANDARD_PROJECTIONS"],
                self.start_standard_projections,
                defaults.start_standard_projections,
            )?,
            insecure: resolve_bool(
                env,
                &["EVENTSTORE_INSECURE"],
                self.insecure,
                defaults.insecure,
            )?,
            enable_atom_pub_over_http: resolve_bool(
                env,
                &["EVENTSTORE_ENABLE_ATOM_PUB_OVER_HTTP"],
                self.enable_atom_pub_over_http,
                defaults.enable_atom_pub_over_http,
            )?,
        };

        config.validate()?;
        tracing::debug!(?config, "Resolved EventStore configuration");
        Ok(config)
    }
}

fn resolve_port(
    env: &impl EnvSource,
    keys: &[&str],
    explicit: Option<PortChoice>,
    default: u16,
) -> Result<Option<u16>, ConfigError> {
    match explicit {
        Some(PortChoice::Disabled) => Ok(None),
        Some(PortChoice::Port(port)) => Ok(Some(port)),
        None => resolve_with(env, keys, None, default, parse_port).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_the_server_image() {
        let config = EventStoreConfig::builder().resolve_from(&env(&[])).unwrap();
        assert_eq!(config, EventStoreConfig::default());
        assert_eq!(config.exposed_ports(), vec![2113, 1113]);
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars = env(&[
            ("EVENTSTORE_EXT_HTTP_PORT", "2114"),
            ("EVENTSTORE_EXT_TCP_PORT", "1114"),
            ("EVENTSTORE_CLUSTER_SIZE", "3"),
            ("EVENTSTORE_RUN_PROJECTIONS", "System"),
            ("EVENTSTORE_START_STANDARD_PROJECTIONS", "False"),
            ("EVENTSTORE_ENABLE_ATOM_PUB_OVER_HTTP", "0"),
        ]);

        let config = EventStoreConfig::builder().resolve_from(&vars).unwrap();

        assert_eq!(config.http_port, Some(2114));
        assert_eq!(config.tcp_port, Some(1114));
        assert_eq!(config.cluster_size, 3);
        assert_eq!(config.run_projections, ProjectionMode::System);
        assert!(!config.start_standard_projections);
        assert!(!config.enable_atom_pub_over_http);
    }

    #[test]
    fn explicit_values_override_environment() {
        let vars = env(&[("EVENTSTORE_HTTP_PORT", "2114"), ("EVENTSTORE_CLUSTER_SIZE", "3")]);

        let config = EventStoreConfig::builder()
            .http_port(3113)
            .cluster_size(1)
            .image("eventstore/eventstore:23.10.0-bookworm-slim")
            .resolve_from(&vars)
            .unwrap();

        assert_eq!(config.http_port, Some(3113));
        assert_eq!(config.cluster_size, 1);
        assert_eq!(config.image, "eventstore/eventstore:23.10.0-bookworm-slim");
    }

    #[test]
    fn disabled_port_is_not_exposed() {
        let vars = env(&[("EVENTSTORE_EXT_TCP_PORT", "1114")]);
        let config = EventStoreConfig::builder()
            .without_tcp_port()
            .resolve_from(&vars)
            .unwrap();

        assert_eq!(config.tcp_port, None);
        assert_eq!(config.exposed_ports(), vec![2113]);
        assert!(
            !config
                .container_env()
                .iter()
                .any(|(k, _)| k == "EVENTSTORE_EXT_TCP_PORT")
        );
    }

    #[test]
    fn secure_mode_is_rejected() {
        let err = EventStoreConfig::builder()
            .insecure(false)
            .resolve_from(&env(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedSecurityMode));

        let err = EventStoreConfig::builder()
            .resolve_from(&env(&[("EVENTSTORE_INSECURE", "false")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedSecurityMode));
    }

    #[test]
    fn zero_cluster_size_is_rejected() {
        let err = EventStoreConfig::builder()
            .resolve_from(&env(&[("EVENTSTORE_CLUSTER_SIZE", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "EVENTSTORE_CLUSTER_SIZE"
        ));

        assert!(EventStoreConfig::builder().cluster_size(0).resolve_from(&env(&[])).is_err());
    }

    #[test]
    fn invalid_projection_mode_is_rejected() {
        let err = EventStoreConfig::builder()
            .resolve_from(&env(&[("EVENTSTORE_RUN_PROJECTIONS", "some")]))
            .unwrap_err();
        assert!(err.to_string().contains("EVENTSTORE_RUN_PROJECTIONS"));
    }

    #[test]
    fn container_env_has_one_key_per_setting() {
        let env = EventStoreConfig::default().container_env();
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();

        assert_eq!(
            keys,
            vec![
                "EVENTSTORE_CLUSTER_SIZE",
                "EVENTSTORE_RUN_PROJECTIONS",
                "EVENTSTORE_START_STANDARD_PROJECTIONS",
                "EVENTSTORE_EXT_TCP_PORT",
                "EVENTSTORE_HTTP_PORT",
                "EVENTSTORE_INSECURE",
                "EVENTSTORE_ENABLE_ATOM_PUB_OVER_HTTP",
            ]
        );
        assert!(env.contains(&("EVENTSTORE_INSECURE".to_string(), "true".to_string())));
        assert!(env.contains(&("EVENTSTORE_RUN_PROJECTIONS".to_string(), "all".to_string())));
    }

    #[test]
    fn insecure_servers_get_the_insecure_flag() {
        assert_eq!(EventStoreConfig::default().command(), vec!["--insecure".to_string()]);
    }
}
