//! Docker implementation of [`ContainerRuntime`] using the Engine API.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;

use crate::config::helpers::{EnvSource, ProcessEnv};
use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ContainerSpec, LogStream};

/// Seconds the daemon waits for a graceful stop before killing.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Connect to the Docker daemon.
///
/// Tries bollard's local defaults first (`DOCKER_HOST` or the platform
/// socket), then the Docker Desktop and rootless socket locations.
pub async fn connect_docker(env: &impl EnvSource) -> Result<Docker, RuntimeError> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    for socket in fallback_sockets(env)? {
        if !socket.exists() {
            continue;
        }
        let path = socket.to_string_lossy();
        match Docker::connect_with_socket(&path, 120, API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(RuntimeError::Unavailable { reason: last_error })
}

fn fallback_sockets(env: &impl EnvSource) -> Result<Vec<PathBuf>, RuntimeError> {
    let lookup = |key: &str| {
        env.get(key).map_err(|e| RuntimeError::Unavailable {
            reason: e.to_string(),
        })
    };

    let mut sockets = Vec::new();
    if let Some(home) = lookup("HOME")? {
        sockets.push(PathBuf::from(home).join(".docker/run/docker.sock"));
    }
    if let Some(runtime_dir) = lookup("XDG_RUNTIME_DIR")? {
        sockets.push(PathBuf::from(runtime_dir).join("docker.sock"));
    }
    Ok(sockets)
}

/// Host where published ports are reachable.
///
/// `TESTCONTAINERS_HOST_OVERRIDE` wins; otherwise the host of a `tcp://`
/// `DOCKER_HOST`; otherwise `localhost`.
pub fn resolve_host(env: &impl EnvSource) -> String {
    if let Ok(Some(host)) = env.get("TESTCONTAINERS_HOST_OVERRIDE")
        && !host.trim().is_empty()
    {
        return host.trim().to_string();
    }

    if let Ok(Some(docker_host)) = env.get("DOCKER_HOST")
        && let Some(rest) = docker_host.strip_prefix("tcp://")
    {
        let authority = rest.split('/').next().unwrap_or(rest);
        let host = match authority.rsplit_once(':') {
            Some((host, _port)) => host,
            None => authority,
        };
        if !host.is_empty() {
            return host.to_string();
        }
    }

    "localhost".to_string()
}

fn pull_error(image: &str, error: BollardError) -> RuntimeError {
    let reason = match error {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => format!("image not found or access denied: {}", message),
        other => other.to_string(),
    };
    RuntimeError::ImagePull {
        image: image.to_string(),
        reason,
    }
}

/// Runs containers on a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    host: String,
}

impl DockerRuntime {
    /// Connect using the process environment.
    pub async fn connect() -> Result<Self, RuntimeError> {
        Self::connect_with(&ProcessEnv).await
    }

    /// Connect using the given environment.
    pub async fn connect_with(env: &impl EnvSource) -> Result<Self, RuntimeError> {
        let docker = connect_docker(env).await?;
        Ok(Self::from_client(docker, resolve_host(env)))
    }

    /// Wrap an existing client.
    pub fn from_client(docker: Docker, host: impl Into<String>) -> Self {
        Self {
            docker,
            host: host.into(),
        }
    }

    /// Pull `image` unless it is already present, logging each layer as it
    /// completes.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        let mut layers = HashSet::new();

        while let Some(update) = progress.next().await {
            let info = update.map_err(|e| pull_error(image, e))?;
            // The daemon can report a failed pull inside a 200 response.
            if let Some(reason) = info.error {
                return Err(RuntimeError::ImagePull {
                    image: image.to_string(),
                    reason,
                });
            }
            if let (Some(layer), Some("Pull complete")) = (info.id, info.status.as_deref())
                && layers.insert(layer.clone())
            {
                tracing::trace!(layer = %layer, "Layer pulled");
            }
        }

        tracing::info!("Pulled image {} ({} layers)", image, layers.len());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        // Empty host port: the daemon picks a free one.
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .exposed_ports
            .iter()
            .map(|port| {
                (
                    format!("{}/tcp", port),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(String::new()),
                    }]),
                )
            })
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{}/tcp", port), HashMap::new()))
            .collect();

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let labels: HashMap<String, String> = spec.labels.iter().cloned().collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: spec.network_mode.clone(),
            // Removal is handled in stop() so the flag is honoured either way.
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: Some(exposed_ports),
            labels: if labels.is_empty() { None } else { Some(labels) },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| RuntimeError::ContainerCreate {
                image: spec.image.clone(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!("Docker: {}", warning);
        }

        Ok(response.id)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if let Some(name) = &spec.name {
            // Leftover from an earlier run.
            let _ = self
                .docker
                .remove_container(
                    name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
        }

        if spec.auto_pull {
            self.ensure_image(&spec.image).await?;
        }

        let id = self.create_container(spec).await?;
        tracing::debug!("Created container {} from {}", id, spec.image);
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::ContainerStart {
                id: container_id.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!("Started container {}", container_id);
        Ok(())
    }

    async fn logs(&self, container_id: &str) -> Result<LogStream, RuntimeError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let id = container_id.to_string();
        let stream = self
            .docker
            .logs(container_id, Some(options))
            .map(move |item| {
                item.map(|output| output.to_string())
                    .map_err(|e| RuntimeError::Logs {
                        id: id.clone(),
                        reason: e.to_string(),
                    })
            })
            .boxed();

        Ok(stream)
    }

    async fn host_port(
        &self,
        container_id: &str,
        container_port: u16,
    ) -> Result<u16, RuntimeError> {
        let info = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Inspect {
                id: container_id.to_string(),
                reason: e.to_string(),
            })?;

        let key = format!("{}/tcp", container_port);
        info.network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(&key).cloned().flatten())
            .unwrap_or_default()
            .into_iter()
            .find_map(|binding| binding.host_port.and_then(|p| p.parse::<u16>().ok()))
            .ok_or_else(|| RuntimeError::PortNotMapped {
                id: container_id.to_string(),
                port: container_port,
            })
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn stop(&self, container_id: &str, remove: bool) -> Result<(), RuntimeError> {
        let result = if remove {
            self.docker
                .remove_container(
                    container_id,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await
        } else {
            self.docker
                .stop_container(
                    container_id,
                    Some(StopContainerOptions {
                        t: STOP_TIMEOUT_SECS,
                    }),
                )
                .await
        };

        match result {
            Ok(()) => Ok(()),
            // Already stopped, or already gone.
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => Ok(()),
            Err(e) => Err(RuntimeError::Stop {
                id: container_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn host_defaults_to_localhost() {
        assert_eq!(resolve_host(&env(&[])), "localhost");
        assert_eq!(
            resolve_host(&env(&[("DOCKER_HOST", "unix:///var/run/docker.sock")])),
            "localhost"
        );
    }

    #[test]
    fn host_comes_from_tcp_docker_host() {
        assert_eq!(
            resolve_host(&env(&[("DOCKER_HOST", "tcp://10.0.0.7:2375")])),
            "10.0.0.7"
        );
        assert_eq!(
            resolve_host(&env(&[("DOCKER_HOST", "tcp://docker-remote")])),
            "docker-remote"
        );
    }

    #[test]
    fn host_override_wins() {
        let vars = env(&[
            ("DOCKER_HOST", "tcp://10.0.0.7:2375"),
            ("TESTCONTAINERS_HOST_OVERRIDE", "host.docker.internal"),
        ]);
        assert_eq!(resolve_host(&vars), "host.docker.internal");
    }

    #[test]
    fn missing_image_is_reported_as_a_pull_error() {
        let err = pull_error(
            "eventstore/eventstore:no-such-tag",
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "manifest unknown".to_string(),
            },
        );

        match err {
            RuntimeError::ImagePull { image, reason } => {
                assert_eq!(image, "eventstore/eventstore:no-such-tag");
                assert_eq!(reason, "image not found or access denied: manifest unknown");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fallback_sockets_follow_home_and_runtime_dir() {
        let vars = env(&[("HOME", "/home/dev"), ("XDG_RUNTIME_DIR", "/run/user/1000")]);
        let sockets = fallback_sockets(&vars).unwrap();

        assert_eq!(
            sockets,
            vec![
                PathBuf::from("/home/dev/.docker/run/docker.sock"),
                PathBuf::from("/run/user/1000/docker.sock"),
            ]
        );
    }
}
