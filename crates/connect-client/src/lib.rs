//! Client for a Kafka Connect compatible connector runtime.
//!
//! The connector runtime is the external control plane that actually runs
//! Debezium source connectors and the delivery sinks. This crate wraps the
//! subset of its REST API that pipesync needs:
//!
//! - create-or-update a connector's configuration (idempotent upsert by name)
//! - delete a connector
//! - fetch connector status (connector state plus per-task states and traces)
//! - fetch connector configuration
//! - restart a connector
//! - list the topics a connector reports using
//!
//! All operations are synchronous request/response with a bounded timeout.
//! A non-2xx response becomes a typed [`ConnectError::Api`] carrying the
//! runtime's raw error body, truncated for operator visibility. The client
//! never retries; retry and polling policy belong to the orchestrator.

mod types;


use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

pub use types::{ConnectorState, ConnectorStatus, RunState, TaskState};

/// Flat string-to-string configuration map, the runtime's wire format.
///
/// A `BTreeMap` keeps key order deterministic in logs and tests.
pub type ConnectorConfig = BTreeMap<String, String>;

/// Default timeout for runtime requests in seconds.
/// Can be overridden via the `CONNECT_TIMEOUT_SECS` environment variable.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default runtime URL when not specified via environment variable.
pub const DEFAULT_RUNTIME_URL: &str = "http://localhost:8083";

/// Upper bound on the error body preserved in a [`ConnectError::Api`].
pub const MAX_ERROR_BODY_CHARS: usize = 4096;

/// Error type for connector runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Request could not be sent or the response could not be read/decoded
    #[error("connector runtime request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The runtime answered with a non-2xx status
    #[error("connector runtime returned {status} for {operation} on '{connector}': {body}")]
    Api {
        status: u16,
        operation: &'static str,
        connector: String,
        body: String,
    },
}

impl ConnectError {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectError::Api { status, .. } => Some(*status),
            ConnectError::Transport(_) => None,
        }
    }
}

/// Truncate a response body or failure trace to a bounded number of
/// characters, marking the cut.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(max_chars).collect();
    truncated.push_str("... (truncated)");
    truncated
}

/// Connector lifecycle operations as the orchestrator sees them.
///
/// `HttpConnectClient` is the production implementation; tests substitute
/// an in-memory runtime.
#[async_trait]
pub trait ConnectorRuntime: Send + Sync {
    /// Create the connector if absent, otherwise replace its configuration.
    async fn put_connector_config(
        &self,
        name: &str,
        config: &ConnectorConfig,
    ) -> Result<(), ConnectError>;

    async fn delete_connector(&self, name: &str) -> Result<(), ConnectError>;

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus, ConnectError>;

    async fn connector_config(&self, name: &str) -> Result<ConnectorConfig, ConnectError>;

    async fn restart_connector(&self, name: &str) -> Result<(), ConnectError>;

    async fn connector_topics(&self, name: &str) -> Result<Vec<String>, ConnectError>;
}

/// HTTP implementation of [`ConnectorRuntime`].
pub struct HttpConnectClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConnectClient {
    /// Create a new client for the given runtime base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConnectError> {
        let timeout_secs = std::env::var("CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// Create a client from the `CONNECT_URL` environment variable.
    pub fn from_env() -> Result<Self, ConnectError> {
        let base_url =
            std::env::var("CONNECT_URL").unwrap_or_else(|_| DEFAULT_RUNTIME_URL.to_string());
        Self::new(base_url)
    }

    fn connector_url(&self, name: &str, suffix: &str) -> String {
        format!("{}/connectors/{}{}", self.base_url, name, suffix)
    }

    /// Translate a non-2xx response into a typed error with the raw body.
    async fn ensure_ok(
        operation: &'static str,
        connector: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ConnectError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ConnectError::Api {
            status: status.as_u16(),
            operation,
            connector: connector.to_string(),
            body: truncate_body(&body, MAX_ERROR_BODY_CHARS),
        })
    }
}

/// Shape of one entry in the runtime's `/topics` response.
#[derive(serde::Deserialize)]
struct TopicList {
    topics: Vec<String>,
}

#[async_trait]
impl ConnectorRuntime for HttpConnectClient {
    async fn put_connector_config(
        &self,
        name: &str,
        config: &ConnectorConfig,
    ) -> Result<(), ConnectError> {
        debug!("Submitting configuration for connector '{name}'");
        let response = self
            .client
            .put(self.connector_url(name, "/config"))
            .json(config)
            .send()
            .await?;
        Self::ensure_ok("put config", name, response).await?;
        Ok(())
    }

    async fn delete_connector(&self, name: &str) -> Result<(), ConnectError> {
        debug!("Deleting connector '{name}'");
        let response = self
            .client
            .delete(self.connector_url(name, ""))
            .send()
            .await?;
        Self::ensure_ok("delete", name, response).await?;
        Ok(())
    }

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus, ConnectError> {
        let response = self
            .client
            .get(self.connector_url(name, "/status"))
            .send()
            .await?;
        let response = Self::ensure_ok("status", name, response).await?;
        Ok(response.json::<ConnectorStatus>().await?)
    }

    async fn connector_config(&self, name: &str) -> Result<ConnectorConfig, ConnectError> {
        let response = self
            .client
            .get(self.connector_url(name, "/config"))
            .send()
            .await?;
        let response = Self::ensure_ok("get config", name, response).await?;
        Ok(response.json::<ConnectorConfig>().await?)
    }

    async fn restart_connector(&self, name: &str) -> Result<(), ConnectError> {
        debug!("Restarting connector '{name}'");
        let response = self
            .client
            .post(self.connector_url(name, "/restart"))
            .send()
            .await?;
        Self::ensure_ok("restart", name, response).await?;
        Ok(())
    }

    async fn connector_topics(&self, name: &str) -> Result<Vec<String>, ConnectError> {
        let response = self
            .client
            .get(self.connector_url(name, "/topics"))
            .send()
            .await?;
        let response = Self::ensure_ok("topics", name, response).await?;
        let mut by_connector = response.json::<HashMap<String, TopicList>>().await?;
        Ok(by_connector
            .remove(name)
            .map(|t| t.topics)
            .unwrap_or_default())
    }
}
