//! Managed EventStoreDB instance lifecycle.
//!
//! ```text
//!  new()            start()                         dispose()
//!    │                 │                                │
//!    ▼                 ▼                                ▼
//! Configured ──▶ Starting ──▶ launch ──▶ wait for ──▶ Ready ──▶ Disposed
//!                    │           │       readiness      │
//!                    │           ▼           │          │ connection_url()
//!                    └────────▶ Failed ◀─────┘          │ client()
//!                         (container torn down)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;

use crate::client::Connector;
use crate::config::{EventStoreConfig, InstanceOptions};
use crate::error::{InstanceError, Result};
use crate::readiness::{READY_PATTERN, READY_REGEX, ReadinessError, wait_for_log};
use crate::retry::{ConnectMode, retry};
use crate::runtime::{ContainerRuntime, ContainerSpec, DockerRuntime};

/// Lifecycle state of an [`EventStoreInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Configured, nothing launched.
    Configured,
    /// `start()` is in progress.
    Starting,
    /// Running and accepting connections.
    Ready,
    /// `start()` failed; the container has been torn down.
    Failed,
    /// Stopped by `dispose()`.
    Disposed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configured => "configured",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        };
        write!(f, "{}", s)
    }
}

/// A disposable EventStoreDB server running in a container.
///
/// Construct with [`EventStoreInstance::new`] (or [`EventStoreInstance::docker`]),
/// then [`start`](Self::start) it. Call [`dispose`](Self::dispose) when done,
/// or run the whole thing through [`with_instance`], which disposes on every
/// exit path.
pub struct EventStoreInstance {
    config: EventStoreConfig,
    options: InstanceOptions,
    spec: ContainerSpec,
    runtime: Arc<dyn ContainerRuntime>,
    state: InstanceState,
    container_id: Option<String>,
    host: Option<String>,
    ports: HashMap<u16, u16>,
}

impl fmt::Debug for EventStoreInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStoreInstance")
            .field("image", &self.config.image)
            .field("state", &self.state)
            .field("container_id", &self.container_id)
            .field("ports", &self.ports)
            .finish()
    }
}

impl EventStoreInstance {
    /// Create a handle. Nothing is launched until [`start`](Self::start).
    ///
    /// Fails when the configuration asks for TLS or is otherwise invalid.
    pub fn new(
        config: EventStoreConfig,
        options: InstanceOptions,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self> {
        config.validate()?;

        let mut spec = ContainerSpec::new(config.image.clone());
        spec.name = options.container_name.clone();
        spec.auto_pull = options.auto_pull;
        spec.labels = options.labels.clone();
        spec.network_mode = options.network_mode.clone();
        for port in config.exposed_ports() {
            spec.expose(port);
        }

        Ok(Self {
            config,
            options,
            spec,
            runtime,
            state: InstanceState::Configured,
            container_id: None,
            host: None,
            ports: HashMap::new(),
        })
    }

    /// Create a handle backed by the local Docker daemon.
    pub async fn docker(config: EventStoreConfig, options: InstanceOptions) -> Result<Self> {
        // Validate before touching Docker.
        config.validate()?;
        let runtime = DockerRuntime::connect().await?;
        Self::new(config, options, Arc::new(runtime))
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == InstanceState::Ready
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.options
    }

    /// The container spec as it will be (or was) handed to the runtime.
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Host where mapped ports are reachable. Known once ready.
    pub fn host(&self) -> Result<&str> {
        self.require_ready()?;
        self.host.as_deref().ok_or(InstanceError::NotStarted)
    }

    /// Host port bound to `container_port`. Known once ready.
    pub fn mapped_port(&self, container_port: u16) -> Result<u16> {
        self.require_ready()?;
        self.ports
            .get(&container_port)
            .copied()
            .ok_or_else(|| {
                InstanceError::Runtime(crate::error::RuntimeError::PortNotMapped {
                    id: self.container_id.clone().unwrap_or_default(),
                    port: container_port,
                })
            })
    }

    /// Launch the container and block until the server is ready.
    ///
    /// When `probe_on_start` is set, the server is then checked with the
    /// `eventstore` client (a no-op without the `client` feature). See
    /// [`start_with`](Self::start_with) to check it with another connector.
    pub async fn start(&mut self) -> Result<&mut Self> {
        #[cfg(feature = "client")]
        let connector = crate::client::EsdbConnector;
        #[cfg(not(feature = "client"))]
        let connector = SkipProbe;

        self.start_with(&connector).await
    }

    /// Like [`start`](Self::start), probing the server with `connector`.
    ///
    /// If anything fails after the container was created, it is torn down
    /// before the error is returned. The container id is recorded as soon as
    /// it exists, so a start that is cancelled part way leaves something for
    /// [`dispose`](Self::dispose) (or `Drop`) to clean up.
    pub async fn start_with<C: Connector>(&mut self, connector: &C) -> Result<&mut Self> {
        if self.state != InstanceState::Configured {
            return Err(InstanceError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        self.state = InstanceState::Starting;

        self.apply_configuration();

        tracing::info!("Starting EventStoreDB container from {}", self.spec.image);
        let id = match self.runtime.create(&self.spec).await {
            Ok(id) => id,
            Err(e) => {
                self.state = InstanceState::Failed;
                return Err(InstanceError::ContainerStart {
                    image: self.spec.image.clone(),
                    reason: e.to_string(),
                });
            }
        };
        self.container_id = Some(id.clone());

        match self.boot(&id, connector).await {
            Ok(()) => {
                self.state = InstanceState::Ready;
                Ok(self)
            }
            Err(e) => {
                tracing::warn!("EventStoreDB failed to start: {}", e);
                if let Err(teardown) = self.teardown().await {
                    tracing::warn!("Cleanup after failed start also failed: {}", teardown);
                }
                self.state = InstanceState::Failed;
                Err(e)
            }
        }
    }

    /// Server settings become container environment variables.
    fn apply_configuration(&mut self) {
        for (key, value) in self.config.container_env() {
            self.spec.set_env(key, value);
        }
        for (key, value) in &self.options.extra_env {
            self.spec.set_env(key.clone(), value.clone());
        }
        self.spec.cmd = self.config.command();
        tracing::debug!(
            env = ?self.spec.env,
            cmd = ?self.spec.cmd,
            "Applied container configuration"
        );
    }

    async fn boot<C: Connector>(&mut self, id: &str, connector: &C) -> Result<()> {
        self.runtime
            .start(id)
            .await
            .map_err(|e| InstanceError::ContainerStart {
                image: self.spec.image.clone(),
                reason: e.to_string(),
            })?;

        self.await_ready(id).await?;

        if self.options.probe_on_start {
            let url = self.build_url()?;
            self.connect_with(connector, &url).await?;
            tracing::debug!("EventStoreDB accepted a client connection at {}", url);
        }

        Ok(())
    }

    async fn await_ready(&mut self, id: &str) -> Result<()> {
        let logs = self.runtime.logs(id).await?;
        let waited = wait_for_log(logs, &READY_REGEX, self.options.startup_timeout)
            .await
            .map_err(|e| match e {
                ReadinessError::TimedOut {
                    timeout,
                    recent_logs,
                } => InstanceError::ReadinessTimeout {
                    pattern: READY_PATTERN.to_string(),
                    timeout,
                    recent_logs,
                },
                ReadinessError::StreamEnded { recent_logs } => InstanceError::ContainerStart {
                    image: self.spec.image.clone(),
                    reason: match recent_logs.last() {
                        Some(line) => format!("container exited before becoming ready: {line}"),
                        None => "container exited before becoming ready".to_string(),
                    },
                },
                ReadinessError::Runtime(e) => InstanceError::Runtime(e),
            })?;

        self.host = Some(self.runtime.host());
        for port in self.spec.exposed_ports.clone() {
            let host_port = self.runtime.host_port(id, port).await?;
            self.ports.insert(port, host_port);
        }

        tracing::info!(
            "EventStoreDB ready after {:?} ({} → {:?})",
            waited,
            id,
            self.ports
        );
        Ok(())
    }

    /// `esdb://<host>:<port>?Tls=false`.
    ///
    /// Fails for secure configurations and for handles that are not ready.
    pub fn connection_url(&self) -> Result<String> {
        if !self.config.insecure {
            return Err(InstanceError::UnsupportedSecurityMode);
        }
        self.require_ready()?;
        self.build_url()
    }

    fn build_url(&self) -> Result<String> {
        if !self.config.insecure {
            return Err(InstanceError::UnsupportedSecurityMode);
        }
        let host = self.host.as_deref().ok_or(InstanceError::NotStarted)?;
        let container_port = self.config.http_port.ok_or_else(|| {
            InstanceError::Config(crate::error::ConfigError::InvalidValue {
                key: "http_port".to_string(),
                message: "the HTTP port is not exposed".to_string(),
            })
        })?;
        let port = self.ports.get(&container_port).ok_or(InstanceError::NotStarted)?;
        Ok(format!("esdb://{}:{}?Tls=false", host, port))
    }

    /// Open a client with `connector`, under the configured [`ConnectMode`].
    pub async fn client<C: Connector>(&self, connector: &C) -> Result<C::Client> {
        let url = self.connection_url()?;
        self.connect_with(connector, &url).await
    }

    /// Open an `eventstore` client.
    #[cfg(feature = "client")]
    pub async fn eventstore_client(&self) -> Result<eventstore::Client> {
        self.client(&crate::client::EsdbConnector).await
    }

    async fn connect_with<C: Connector>(&self, connector: &C, url: &str) -> Result<C::Client> {
        let mode = self.options.connect_mode;
        retry(mode.policy(), |_| connector.connect(url))
            .await
            .map_err(|e| match mode {
                ConnectMode::Strict => InstanceError::Connection {
                    reason: e.last_error.reason,
                },
                ConnectMode::Tolerant(_) => InstanceError::ConnectionTimeout {
                    attempts: e.attempts,
                    last_error: e.last_error.reason,
                },
            })
    }

    /// Stop the container, removing it when `remove_on_stop` is set.
    ///
    /// Does nothing when there is no container to stop, so it is safe to call
    /// more than once.
    pub async fn dispose(&mut self) -> Result<()> {
        let result = self.teardown().await;
        if self.state != InstanceState::Failed {
            self.state = InstanceState::Disposed;
        }
        result
    }

    async fn teardown(&mut self) -> Result<()> {
        let Some(id) = self.container_id.take() else {
            return Ok(());
        };
        self.ports.clear();
        self.host = None;

        let remove = self.options.remove_on_stop;
        tracing::info!("Stopping EventStoreDB container {} (remove={})", id, remove);
        self.runtime.stop(&id, remove).await?;
        tracing::info!("Stopped EventStoreDB container {}", id);
        Ok(())
    }

    fn require_ready(&self) -> Result<()> {
        if self.state == InstanceState::Ready {
            Ok(())
        } else {
            Err(InstanceError::NotStarted)
        }
    }
}

impl Drop for EventStoreInstance {
    fn drop(&mut self) {
        let Some(id) = self.container_id.take() else {
            return;
        };

        tracing::warn!(
            "EventStoreInstance dropped without dispose(), tearing down container {} in the background",
            id
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = Arc::clone(&self.runtime);
                let remove = self.options.remove_on_stop;
                handle.spawn(async move {
                    if let Err(e) = runtime.stop(&id, remove).await {
                        tracing::warn!("Background teardown of {} failed: {}", id, e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("No Tokio runtime available, container {} may remain running", id);
            }
        }
    }
}

/// Stands in for a client when built without the `client` feature.
#[cfg(not(feature = "client"))]
struct SkipProbe;

#[cfg(not(feature = "client"))]
#[async_trait::async_trait]
impl Connector for SkipProbe {
    type Client = ();

    async fn connect(&self, _url: &str) -> std::result::Result<(), crate::client::ConnectError> {
        tracing::debug!("Connectivity probe skipped: built without the `client` feature");
        Ok(())
    }
}

/// Future returned by the body passed to [`with_instance`].
pub type ScopedFuture<'a, T, E> =
    Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'a>>;

/// Start `instance`, run `body` against it, and dispose it afterwards.
///
/// The instance is disposed exactly once whether `start()` fails, `body`
/// returns an error, or `body` panics (the panic is resumed after teardown).
/// A teardown failure is reported only when everything else succeeded.
pub async fn with_instance<T, E, F>(
    mut instance: EventStoreInstance,
    body: F,
) -> std::result::Result<T, E>
where
    F: for<'a> FnOnce(&'a EventStoreInstance) -> ScopedFuture<'a, T, E>,
    E: From<InstanceError>,
{
    let started = instance.start().await.map(|_| ());
    if let Err(e) = started {
        // start() already tore down whatever it launched.
        let _ = instance.dispose().await;
        return Err(e.into());
    }

    let outcome = AssertUnwindSafe(body(&instance)).catch_unwind().await;
    let disposed = instance.dispose().await;

    match outcome {
        Ok(Ok(value)) => disposed.map(|()| value).map_err(E::from),
        Ok(Err(e)) => {
            if let Err(teardown) = disposed {
                tracing::warn!("Failed to dispose EventStoreDB instance: {}", teardown);
            }
            Err(e)
        }
        Err(panic) => {
            if let Err(teardown) = disposed {
                tracing::warn!("Failed to dispose EventStoreDB instance: {}", teardown);
            }
            std::panic::resume_unwind(panic)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::config::EventStoreConfig;
    use crate::testing::{FakeRuntime, StubConnector};

    fn options() -> InstanceOptions {
        InstanceOptions::default()
            .with_startup_timeout(Duration::from_secs(5))
            .with_probe_on_start(false)
    }

    fn instance(runtime: &Arc<FakeRuntime>) -> EventStoreInstance {
        EventStoreInstance::new(EventStoreConfig::default(), options(), runtime.clone()).unwrap()
    }

    #[test]
    fn new_registers_ports_without_starting() {
        let runtime = Arc::new(FakeRuntime::ready());
        let es = instance(&runtime);

        assert_eq!(es.state(), InstanceState::Configured);
        assert_eq!(es.spec().exposed_ports, vec![2113, 1113]);
        assert!(es.spec().env.is_empty());
        assert_eq!(runtime.create_calls(), 0);
    }

    #[test]
    fn new_rejects_secure_configurations() {
        let runtime = Arc::new(FakeRuntime::ready());
        let config = EventStoreConfig {
            insecure: false,
            ..Default::default()
        };

        let err = EventStoreInstance::new(config, options(), runtime.clone()).unwrap_err();

        assert!(matches!(
            err,
            InstanceError::Config(crate::error::ConfigError::UnsupportedSecurityMode)
        ));
        assert_eq!(runtime.create_calls(), 0);
    }

    #[tokio::test]
    async fn start_applies_configuration_and_resolves_ports() {
        let runtime = Arc::new(FakeRuntime::ready().with_port(2113, 49153).with_port(1113, 49154));
        let mut es = EventStoreInstance::new(
            EventStoreConfig::default(),
            options().with_env("EVENTSTORE_MEM_DB", "true"),
            runtime.clone(),
        )
        .unwrap();

        es.start().await.unwrap();

        assert!(es.is_ready());
        assert_eq!(es.mapped_port(2113).unwrap(), 49153);
        assert_eq!(es.mapped_port(1113).unwrap(), 49154);
        assert_eq!(es.connection_url().unwrap(), "esdb://localhost:49153?Tls=false");

        let launched = runtime.last_spec().unwrap();
        assert_eq!(launched.env_var("EVENTSTORE_RUN_PROJECTIONS"), Some("all"));
        assert_eq!(launched.env_var("EVENTSTORE_INSECURE"), Some("true"));
        assert_eq!(launched.env_var("EVENTSTORE_MEM_DB"), Some("true"));
        assert_eq!(launched.cmd, vec!["--insecure".to_string()]);

        es.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn connection_url_requires_a_started_instance() {
        let runtime = Arc::new(FakeRuntime::ready());
        let es = instance(&runtime);

        assert!(matches!(es.connection_url(), Err(InstanceError::NotStarted)));
        assert!(matches!(es.mapped_port(2113), Err(InstanceError::NotStarted)));
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let runtime = Arc::new(FakeRuntime::ready());
        let mut es = instance(&runtime);

        es.start().await.unwrap();
        let err = es.start().await.unwrap_err();

        assert!(matches!(
            err,
            InstanceError::InvalidState {
                operation: "start",
                state: InstanceState::Ready
            }
        ));
        assert_eq!(runtime.start_calls(), 1);
        es.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn launch_failure_is_a_container_start_error() {
        let runtime = Arc::new(FakeRuntime::failing_to_launch("pull access denied"));
        let mut es = instance(&runtime);

        let err = es.start().await.unwrap_err();

        assert!(matches!(
            err,
            InstanceError::ContainerStart { ref reason, .. } if reason.contains("access denied")
        ));
        assert_eq!(es.state(), InstanceState::Failed);
        assert_eq!(runtime.start_calls(), 0);
        assert_eq!(runtime.stop_calls(), 0);
    }

    #[tokio::test]
    async fn start_failure_removes_the_created_container() {
        let runtime = Arc::new(FakeRuntime::failing_to_start("port is already allocated"));
        let mut es = instance(&runtime);

        let err = es.start().await.unwrap_err();

        assert!(matches!(
            err,
            InstanceError::ContainerStart { ref reason, .. } if reason.contains("already allocated")
        ));
        assert_eq!(es.state(), InstanceState::Failed);
        assert_eq!(runtime.stop_calls(), 1);
        assert!(es.container_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_start_leaves_the_container_to_dispose() {
        let runtime = Arc::new(FakeRuntime::hanging_on_start());
        let mut es = instance(&runtime);

        let cancelled = tokio::time::timeout(Duration::from_secs(1), es.start()).await;

        assert!(cancelled.is_err());
        assert_eq!(runtime.create_calls(), 1);
        assert_eq!(es.container_id(), Some("fake-0001"));

        es.dispose().await.unwrap();
        assert_eq!(runtime.stop_calls(), 1);
        assert!(es.container_id().is_none());
    }

    #[tokio::test]
    async fn early_exit_is_a_container_start_error() {
        let runtime = Arc::new(FakeRuntime::exiting(&["Invalid option: --bogus"]));
        let mut es = instance(&runtime);

        let err = es.start().await.unwrap_err();

        assert!(matches!(
            err,
            InstanceError::ContainerStart { ref reason, .. } if reason.contains("--bogus")
        ));
        assert_eq!(runtime.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_tears_the_container_down() {
        let runtime = Arc::new(FakeRuntime::silent());
        let mut es = instance(&runtime);

        let err = es.start().await.unwrap_err();

        assert!(matches!(
            err,
            InstanceError::ReadinessTimeout { timeout, .. } if timeout == Duration::from_secs(5)
        ));
        assert_eq!(es.state(), InstanceState::Failed);
        assert_eq!(runtime.stop_calls(), 1);
        assert!(es.container_id().is_none());
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let runtime = Arc::new(FakeRuntime::ready());
        let mut es = instance(&runtime);

        es.start().await.unwrap();
        es.dispose().await.unwrap();
        es.dispose().await.unwrap();

        assert_eq!(es.state(), InstanceState::Disposed);
        assert_eq!(runtime.stop_calls(), 1);
        assert_eq!(runtime.last_stop_removed(), Some(true));
    }

    #[tokio::test]
    async fn removal_on_stop_is_configurable() {
        let runtime = Arc::new(FakeRuntime::ready());
        let mut es = EventStoreInstance::new(
            EventStoreConfig::default(),
            options().with_remove_on_stop(false),
            runtime.clone(),
        )
        .unwrap();

        es.start().await.unwrap();
        es.dispose().await.unwrap();

        assert_eq!(runtime.last_stop_removed(), Some(false));
    }

    #[tokio::test]
    async fn dropping_a_started_instance_tears_it_down() {
        let runtime = Arc::new(FakeRuntime::ready());
        let mut es = instance(&runtime);
        es.start().await.unwrap();

        drop(es);
        for _ in 0..10 {
            if runtime.stop_calls() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(runtime.stop_calls(), 1);
    }

    #[tokio::test]
    async fn start_with_checks_the_server_with_the_given_connector() {
        let runtime = Arc::new(FakeRuntime::ready().with_port(2113, 49153));
        let mut es = EventStoreInstance::new(
            EventStoreConfig::default(),
            options().with_probe_on_start(true),
            runtime.clone(),
        )
        .unwrap();

        let connector = StubConnector::succeeding();
        es.start_with(&connector).await.unwrap();

        assert!(es.is_ready());
        assert_eq!(connector.calls(), 1);
        es.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn strict_probe_failure_fails_start_and_tears_down() {
        let runtime = Arc::new(FakeRuntime::ready());
        let mut es = EventStoreInstance::new(
            EventStoreConfig::default(),
            options()
                .with_probe_on_start(true)
                .with_connect_mode(ConnectMode::Strict),
            runtime.clone(),
        )
        .unwrap();

        let connector = StubConnector::failing();
        let err = es.start_with(&connector).await.unwrap_err();

        assert!(matches!(err, InstanceError::Connection { .. }));
        assert_eq!(connector.calls(), 1);
        assert_eq!(es.state(), InstanceState::Failed);
        assert_eq!(runtime.stop_calls(), 1);
        assert!(matches!(es.connection_url(), Err(InstanceError::NotStarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn tolerant_probe_gives_up_after_the_retry_budget() {
        let runtime = Arc::new(FakeRuntime::ready());
        let policy = crate::retry::RetryPolicy::new(3, Duration::from_millis(200));
        let mut es = EventStoreInstance::new(
            EventStoreConfig::default(),
            options()
                .with_probe_on_start(true)
                .with_connect_mode(ConnectMode::Tolerant(policy)),
            runtime.clone(),
        )
        .unwrap();

        let connector = StubConnector::failing();
        let err = es.start_with(&connector).await.unwrap_err();

        assert!(matches!(err, InstanceError::ConnectionTimeout { attempts: 3, .. }));
        assert_eq!(connector.calls(), 3);
        assert_eq!(es.state(), InstanceState::Failed);
        assert_eq!(runtime.stop_calls(), 1);

        es.dispose().await.unwrap();
        assert_eq!(runtime.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tolerant_probe_rides_out_a_slow_server() {
        let runtime = Arc::new(FakeRuntime::ready());
        let mut es = EventStoreInstance::new(
            EventStoreConfig::default(),
            options().with_probe_on_start(true).with_connect_mode(ConnectMode::Tolerant(
                crate::retry::RetryPolicy::new(5, Duration::from_millis(200)),
            )),
            runtime.clone(),
        )
        .unwrap();

        let connector = StubConnector::flakey(2);
        es.start_with(&connector).await.unwrap();

        assert!(es.is_ready());
        assert_eq!(connector.calls(), 3);
        es.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn client_connects_to_the_started_instance_url() {
        let runtime = Arc::new(FakeRuntime::ready());
        let mut es = instance(&runtime);
        es.start().await.unwrap();

        let connector = StubConnector::succeeding();
        let url = es.client(&connector).await.unwrap();

        assert_eq!(url, es.connection_url().unwrap());
        assert_eq!(connector.calls(), 1);
        es.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn with_instance_disposes_after_an_error_in_the_body() {
        let runtime = Arc::new(FakeRuntime::ready());
        let es = instance(&runtime);

        let result: std::result::Result<(), InstanceError> = with_instance(es, |es| {
            async move {
                es.connection_url()?;
                Err(InstanceError::Connection {
                    reason: "boom".to_string(),
                })
            }
            .boxed()
        })
        .await;

        assert!(matches!(result, Err(InstanceError::Connection { .. })));
        assert_eq!(runtime.stop_calls(), 1);
    }
}
