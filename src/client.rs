//! Opening client connections to a started instance.

use async_trait::async_trait;

/// A connection attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ConnectError {
    /// Reason for failure.
    pub reason: String,
}

impl ConnectError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Builds a client from a connection URL.
///
/// Implementations should fail when the server is not yet reachable, so that
/// [`ConnectMode::Tolerant`](crate::ConnectMode::Tolerant) has something to
/// retry.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: Send;

    async fn connect(&self, url: &str) -> Result<Self::Client, ConnectError>;
}

#[cfg(feature = "client")]
pub use esdb::EsdbConnector;

#[cfg(feature = "client")]
mod esdb {
    use async_trait::async_trait;
    use eventstore::{Client, ClientSettings, ReadStreamOptions};

    use super::{ConnectError, Connector};

    /// Stream read to prove the server answers. It never exists.
    const PROBE_STREAM: &str = "$fixture-probe";

    /// Connects with the `eventstore` gRPC client.
    ///
    /// The client itself connects lazily, so a one-event read is issued
    /// against a stream that does not exist: "not found" means the server is
    /// serving requests.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct EsdbConnector;

    #[async_trait]
    impl Connector for EsdbConnector {
        type Client = Client;

        async fn connect(&self, url: &str) -> Result<Client, ConnectError> {
            let settings: ClientSettings = url
                .parse()
                .map_err(|e| ConnectError::new(format!("invalid connection string '{url}': {e}")))?;
            let client = Client::new(settings).map_err(|e| ConnectError::new(e.to_string()))?;

            let options = ReadStreamOptions::default().max_count(1);
            let mut stream = client
                .read_stream(PROBE_STREAM, &options)
                .await
                .map_err(|e| ConnectError::new(e.to_string()))?;
            match stream.next().await {
                Ok(_) | Err(eventstore::Error::ResourceNotFound) => {}
                Err(e) => return Err(ConnectError::new(e.to_string())),
            }
            tracing::debug!("EventStoreDB answered at {}", url);

            Ok(client)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_displays_its_reason() {
        assert_eq!(ConnectError::new("connection refused").to_string(), "connection refused");
    }

    #[cfg(feature = "client")]
    #[tokio::test]
    async fn malformed_urls_fail_before_any_network_call() {
        match EsdbConnector.connect("http://localhost:2113").await {
            Ok(_) => panic!("an http:// URL should not parse as a connection string"),
            Err(err) => {
                assert!(err.reason.starts_with("invalid connection string"), "{}", err.reason)
            }
        }
    }
}
