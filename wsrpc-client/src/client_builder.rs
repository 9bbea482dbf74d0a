//! Client builder
//!
//! Sets upgrade headers, the default call deadline and observability before
//! connecting.
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsrpc_client::ClientBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> wsrpc_core::Result<()> {
//! let client = ClientBuilder::new("ws://localhost:8080")
//!     .header("Authorization", "Bearer secret")
//!     .default_timeout(Duration::from_secs(2))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::metrics::ClientMetrics;
use crate::WsrpcClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use wsrpc_core::{Error, ObservabilityConfig, Result};

/// Builder for a [`WsrpcClient`]
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    url: String,
    headers: Vec<(String, String)>,
    config: ClientConfig,
    observability: Option<ObservabilityConfig>,
    metrics_name: Option<String>,
}

impl ClientBuilder {
    /// Builder for a connection to `url` (`ws://host:port/path`)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            config: ClientConfig::default(),
            observability: None,
            metrics_name: None,
        }
    }

    /// Add a header to the upgrade request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Deadline for calls made without their own
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Install logging, tracing and metrics export on connect
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability = Some(config);
        self
    }

    /// Record client metrics on the global meter without installing a subscriber
    pub fn with_metrics(mut self, service_name: impl Into<String>) -> Self {
        self.metrics_name = Some(service_name.into());
        self
    }

    /// Connect and start the reader task
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for a malformed URL or header
    /// - [`Error::Transport`] when the connection or upgrade fails
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub async fn connect(self) -> Result<WsrpcClient> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Config(format!("invalid url {:?}: {}", self.url, e)))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid header value for {}: {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        let observability = match &self.observability {
            Some(config) => Some(wsrpc_core::init_observability(config)?),
            None => None,
        };
        let metrics = self
            .metrics_name
            .or_else(|| self.observability.as_ref().map(|c| c.service_name.clone()))
            .map(|name| Arc::new(ClientMetrics::new(name)));

        tracing::info!("Connecting to server");
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        tracing::info!("Connected");

        Ok(WsrpcClient::start(ws, self.config, metrics, observability))
    }
}
