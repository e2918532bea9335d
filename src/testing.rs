//! In-memory stand-ins for the container runtime and the client library.
//!
//! Provides:
//! - [`FakeRuntime`]: a [`ContainerRuntime`] that scripts log output, port
//!   mappings and launch failures, and records every call
//! - [`StubConnector`]: a [`Connector`] that fails a set number of times and
//!   counts attempts
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eventstore_fixture::testing::FakeRuntime;
//! use eventstore_fixture::{EventStoreConfig, EventStoreInstance, InstanceOptions};
//!
//! # async fn example() -> eventstore_fixture::Result<()> {
//! let runtime = Arc::new(FakeRuntime::ready());
//! let options = InstanceOptions::default().with_probe_on_start(false);
//! let mut es = EventStoreInstance::new(EventStoreConfig::default(), options, runtime.clone())?;
//! es.start().await?;
//! assert_eq!(runtime.start_calls(), 1);
//! es.dispose().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use crate::client::{ConnectError, Connector};
use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ContainerSpec, LogStream};

/// A log line the fake emits once "ready".
pub const READY_LOG_LINE: &str = concat!(
    r#"[    1,15,10:52:21.178,INF] "InaugurationManager" in state (Leader, Idle): "#,
    r#"Sending "SystemCoreReady"."#,
);

/// Host ports are the container port plus this offset unless set explicitly.
const PORT_OFFSET: u16 = 40000;

/// How the fake reacts to `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StartBehavior {
    Succeed,
    Fail(String),
    Hang,
}

/// What the fake's log stream does after the scripted lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogEnd {
    /// Stay open forever.
    Pending,
    /// End the stream, as if the process exited.
    Close,
}

/// A scripted container runtime.
pub struct FakeRuntime {
    log_lines: Vec<String>,
    log_end: LogEnd,
    launch_error: Option<String>,
    start_behavior: StartBehavior,
    ports: HashMap<u16, u16>,
    host: String,
    create_calls: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    specs: Mutex<Vec<ContainerSpec>>,
    stops: Mutex<Vec<(String, bool)>>,
}

impl FakeRuntime {
    fn new(log_lines: &[&str], log_end: LogEnd) -> Self {
        Self {
            log_lines: log_lines.iter().map(|s| s.to_string()).collect(),
            log_end,
            launch_error: None,
            start_behavior: StartBehavior::Succeed,
            ports: HashMap::new(),
            host: "localhost".to_string(),
            create_calls: AtomicU32::new(0),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            specs: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
        }
    }

    /// Logs a couple of startup lines, then the readiness line.
    pub fn ready() -> Self {
        Self::new(
            &[
                "[    1, 1,10:52:20.001,INF] DBVER: 23.10.0.0",
                "[    1,15,10:52:21.100,INF] ========== [\"127.0.0.1:2113\"] IS LEADER... SPARTA!",
                READY_LOG_LINE,
            ],
            LogEnd::Pending,
        )
    }

    /// Never logs anything and never exits.
    pub fn silent() -> Self {
        Self::new(&[], LogEnd::Pending)
    }

    /// Logs `lines` and then exits.
    pub fn exiting(lines: &[&str]) -> Self {
        Self::new(lines, LogEnd::Close)
    }

    /// Fails every launch with `reason`, before a container exists.
    pub fn failing_to_launch(reason: impl Into<String>) -> Self {
        Self {
            launch_error: Some(reason.into()),
            ..Self::silent()
        }
    }

    /// Creates containers but fails to start them with `reason`.
    pub fn failing_to_start(reason: impl Into<String>) -> Self {
        Self {
            start_behavior: StartBehavior::Fail(reason.into()),
            ..Self::silent()
        }
    }

    /// Creates containers, then never returns from starting them.
    pub fn hanging_on_start() -> Self {
        Self {
            start_behavior: StartBehavior::Hang,
            ..Self::silent()
        }
    }

    /// Map `container_port` to `host_port`.
    pub fn with_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, host_port);
        self
    }

    /// Report `host` as the address of mapped ports.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::Relaxed)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::Relaxed)
    }

    /// The most recently launched spec.
    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.specs.lock().ok()?.last().cloned()
    }

    /// The `remove` flag of the most recent stop.
    pub fn last_stop_removed(&self) -> Option<bool> {
        self.stops.lock().ok()?.last().map(|(_, remove)| *remove)
    }

    fn container_id(n: u32) -> String {
        format!("fake-{n:04}")
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let n = self.create_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut specs) = self.specs.lock() {
            specs.push(spec.clone());
        }
        match &self.launch_error {
            Some(reason) => Err(RuntimeError::ImagePull {
                image: spec.image.clone(),
                reason: reason.clone(),
            }),
            None => Ok(Self::container_id(n)),
        }
    }

    async fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        match &self.start_behavior {
            StartBehavior::Succeed => Ok(()),
            StartBehavior::Fail(reason) => Err(RuntimeError::ContainerStart {
                id: container_id.to_string(),
                reason: reason.clone(),
            }),
            StartBehavior::Hang => std::future::pending().await,
        }
    }

    async fn logs(&self, _container_id: &str) -> Result<LogStream, RuntimeError> {
        let lines: Vec<Result<String, RuntimeError>> = self
            .log_lines
            .iter()
            .map(|line| Ok(format!("{line}\n")))
            .collect();
        let scripted = stream::iter(lines);
        Ok(match self.log_end {
            LogEnd::Pending => scripted.chain(stream::pending()).boxed(),
            LogEnd::Close => scripted.boxed(),
        })
    }

    async fn host_port(
        &self,
        _container_id: &str,
        container_port: u16,
    ) -> Result<u16, RuntimeError> {
        Ok(self
            .ports
            .get(&container_port)
            .copied()
            .unwrap_or(container_port.saturating_add(PORT_OFFSET)))
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn stop(&self, container_id: &str, remove: bool) -> Result<(), RuntimeError> {
        self.stop_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut stops) = self.stops.lock() {
            stops.push((container_id.to_string(), remove));
        }
        Ok(())
    }
}

/// A connector whose client is the URL it was given.
pub struct StubConnector {
    failures_remaining: AtomicU32,
    call_count: AtomicU32,
}

impl StubConnector {
    /// Succeeds on the first attempt.
    pub fn succeeding() -> Self {
        Self::flakey(0)
    }

    /// Fails `failures` times, then succeeds.
    pub fn flakey(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            call_count: AtomicU32::new(0),
        }
    }

    /// Never succeeds.
    pub fn failing() -> Self {
        Self::flakey(u32::MAX)
    }

    /// Number of connection attempts.
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for StubConnector {
    type Client = String;

    async fn connect(&self, url: &str) -> Result<String, ConnectError> {
        let attempt = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectError::new(format!(
                "connection refused (attempt {attempt})"
            )));
        }
        Ok(url.to_string())
    }
}
