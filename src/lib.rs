//! Disposable EventStoreDB servers for integration tests.
//!
//! Launches `eventstore/eventstore` in a container, waits until the node has
//! been elected leader, and hands back an `esdb://` connection URL or a
//! connected client.
//!
//! ```rust,no_run
//! use eventstore_fixture::{EventStoreConfig, EventStoreInstance, InstanceOptions, with_instance};
//! use futures::FutureExt;
//!
//! # async fn example() -> eventstore_fixture::Result<()> {
//! let config = EventStoreConfig::from_env()?;
//! let options = InstanceOptions::from_env()?;
//! let instance = EventStoreInstance::docker(config, options).await?;
//!
//! let url = with_instance(instance, |es| async move { es.connection_url() }.boxed()).await?;
//! println!("EventStoreDB was available at {url}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod instance;
pub mod readiness;
pub mod retry;
pub mod runtime;
pub mod testing;

pub use client::{ConnectError, Connector};
#[cfg(feature = "client")]
pub use client::EsdbConnector;
pub use config::{EventStoreConfig, InstanceOptions, ProjectionMode};
pub use error::{ConfigError, InstanceError, Result, RuntimeError};
pub use instance::{EventStoreInstance, InstanceState, ScopedFuture, with_instance};
pub use retry::{ConnectMode, RetryPolicy};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime};
