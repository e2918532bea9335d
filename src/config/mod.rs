//! Configuration for managed EventStoreDB instances.
//!
//! Server settings ([`EventStoreConfig`]) and lifecycle options
//! ([`InstanceOptions`]) are plain structs resolved once, up front. Each
//! field takes an explicit value if given, else the matching environment
//! variable, else its default.

pub mod eventstore;
pub mod helpers;
pub mod options;

pub use eventstore::{EventStoreConfig, EventStoreConfigBuilder, ProjectionMode};
pub use helpers::{EnvSource, ProcessEnv};
pub use options::InstanceOptions;
