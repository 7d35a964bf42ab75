//! Broker client boundary
//!
//! [`Connector`] performs one handshake attempt and hands back a live
//! [`Transport`]. Production code uses [`LapinConnector`]; tests plug in
//! in-memory connectors.

use async_trait::async_trait;
use lapin::ConnectionProperties;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::params::ConnectionParams;
use crate::error::TransportError;

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// Establishes transport connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform a single handshake attempt
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Transport>, TransportError>;
}

/// A live transport connection
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Run the close handshake
    async fn close(&self) -> Result<(), TransportError>;

    /// Resolves once the peer or the network ends the session
    async fn closed(&self) -> TransportError;

    /// Access to the concrete client for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Connector backed by `lapin` on the current tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinConnector;

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Transport>, TransportError> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        debug!(endpoint = %params.endpoint, "Starting AMQP handshake");

        let connection = lapin::Connection::connect_uri(params.to_amqp_uri(), properties)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Arc::new(LapinTransport::new(connection)))
    }
}

/// A `lapin` connection plus its error notification
pub struct LapinTransport {
    connection: lapin::Connection,
    error_rx: watch::Receiver<Option<String>>,
}

impl LapinTransport {
    fn new(connection: lapin::Connection) -> Self {
        let (error_tx, error_rx) = watch::channel(None);
        connection.on_error(move |err| {
            warn!(error = %err, "AMQP connection error");
            error_tx.send_replace(Some(err.to_string()));
        });

        Self {
            connection,
            error_rx,
        }
    }

    /// The underlying client, e.g. for opening channels
    pub fn inner(&self) -> &lapin::Connection {
        &self.connection
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn close(&self) -> Result<(), TransportError> {
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }

    async fn closed(&self) -> TransportError {
        let mut rx = self.error_rx.clone();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(err) => err.clone().unwrap_or_default(),
            Err(_) => "error notifier dropped".to_string(),
        };
        TransportError::Closed(reason)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
