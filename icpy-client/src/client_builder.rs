//! Client builder for configuring reconnection and other options
//!
//! The `ClientBuilder` provides a fluent API for configuring client behavior
//! before connecting. It allows you to:
//! - Enable automatic reconnection with various strategies
//! - Configure observability (OpenTelemetry)
//! - Set service name for telemetry
//!
//! # Examples
//!
//! ```rust,no_run
//! use icpy_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> icpy_core::Result<()> {
//! // With reconnection
//! let client = ClientBuilder::new("ws://localhost:8080")
//!     .with_reconnect(Box::new(ExponentialBackoff::default()))
//!     .connect()
//!     .await?;
//!
//! // With observability
//! let client2 = ClientBuilder::new("ws://localhost:8080")
//!     .with_default_observability()
//!     .service_name("my-client")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    connection_state::ConnectionManager, reconnect::ReconnectionStrategy, IcpyClient,
    NotificationHandler,
};
use crate::{reconnect::ExponentialBackoff, request::RequestManager};
use futures::StreamExt;
use icpy_core::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::connect_async;

/// Builder for configuring and creating a IcpyClient
pub struct ClientBuilder {
    url: String,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    enable_reconnect: bool,
    observability_config: Option<icpy_core::ObservabilityConfig>,
    service_name: Option<String>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_strategy: None,
            enable_reconnect: false,
            observability_config: None,
            service_name: None,
        }
    }

    /// Enable automatic reconnection with the given strategy
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self.enable_reconnect = true;
        self
    }

    /// Enable automatic reconnection with default exponential backoff
    pub fn with_default_reconnect(mut self) -> Self {
        self.reconnect_strategy = Some(Box::new(ExponentialBackoff::default()));
        self.enable_reconnect = true;
        self
    }

    /// Disable automatic reconnection (default)
    pub fn without_reconnect(mut self) -> Self {
        self.enable_reconnect = false;
        self.reconnect_strategy = None;
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: icpy_core::ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(icpy_core::ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build and connect the client
    pub async fn connect(self) -> Result<IcpyClient> {
        let request_manager = RequestManager::new();
        let notification_handler = NotificationHandler::new();
        let subscribed_topics = Arc::new(Mutex::new(HashSet::new()));
        let persistent_subscriptions = Arc::new(Mutex::new(Vec::new()));

        // Initialize observability if configured
        let metrics = if let Some(mut config) = self.observability_config {
            // Override service name if provided
            if let Some(name) = self.service_name {
                config.service_name = name.clone();
            }
            
            // Initialize OpenTelemetry
            icpy_core::init_observability(config.clone())
                .map_err(|e| Error::Internal(format!("Failed to initialize observability: {}", e)))?;
            
            // Create metrics
            Some(Arc::new(crate::ClientMetrics::new(&config.service_name)))
        } else {
            None
        };

        let connection_manager = if self.enable_reconnect {
            let strategy = self
                .reconnect_strategy
                .unwrap_or_else(|| Box::new(ExponentialBackoff::default()));
            Some(Arc::new(ConnectionManager::new(
                self.url.clone(),
                strategy,
            )))
        } else {
            None
        };

        // Initial connection
        tracing::info!(url = %self.url, "Connecting to server");
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (sender, receiver) = ws_stream.split();
        let sender = Arc::new(Mutex::new(sender));

        // Mark as connected if using connection manager
        if let Some(ref cm) = connection_manager {
            cm.connected().await;
        }

        // Update metrics
        if let Some(ref m) = metrics {
            m.update_connection_state(2); // Connected
        }

        let client = IcpyClient {
            sender: sender.clone(),
            request_manager: request_manager.clone(),
            notification_handler: notification_handler.clone(),
            subscribed_topics: subscribed_topics.clone(),
            persistent_subscriptions: persistent_subscriptions.clone(),
            connection_manager: connection_manager.clone(),
            pending_requests: Arc::new(RwLock::new(Vec::new())),
            metrics: metrics.clone(),
        };

        tracing::info!("Connected successfully");

        // Spawn receive loop
        tokio::spawn(IcpyClient::receive_loop_with_reconnect(
            receiver,
            request_manager.clone(),
            notification_handler.clone(),
            sender.clone(),
            connection_manager.clone(),
            subscribed_topics.clone(),
            persistent_subscriptions.clone(),
            self.url.clone(),
            metrics,
        ));

        Ok(client)
    }
}
