//! A single broker connection
//!
//! Construction validates the config and spawns a driver task that performs
//! the handshake, waits for either a close request or a broker-side close, and
//! reports every transition to the [`ConnectionHandler`]. The connection itself
//! only exposes state and a close signal; it is never reopened in place.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::handler::{CloseReason, ConnectionHandler};
use super::params::{ConnectionParams, Endpoint};
use super::state::{ConnectionId, ConnectionInfo, ConnectionPhase};
use super::transport::{Connector, Transport};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result, TransportError};
use crate::metrics::METRICS;

type TransportSlot = Arc<Mutex<Option<Arc<dyn Transport>>>>;

/// One transport connection to one broker endpoint
pub struct Connection {
    id: ConnectionId,
    params: Arc<ConnectionParams>,
    created_at: Instant,
    phase_rx: watch::Receiver<ConnectionPhase>,
    close_tx: watch::Sender<bool>,
    transport: TransportSlot,
}

impl Connection {
    /// Validate `config` and begin connecting
    ///
    /// Must be called from within a tokio runtime. Returns as soon as the
    /// handshake has been scheduled.
    pub fn new(
        config: &ConnectionConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self> {
        let params = ConnectionParams::from_config(config)?;
        Self::with_params(params, connector, handler)
    }

    /// Begin connecting with already resolved parameters
    pub fn with_params(
        params: ConnectionParams,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let id = ConnectionId::next();
        let params = Arc::new(params);
        let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Unopened);
        let (close_tx, close_rx) = watch::channel(false);
        let transport: TransportSlot = Arc::new(Mutex::new(None));

        let driver = Driver {
            id,
            params: params.clone(),
            connector,
            handler,
            phase_tx,
            close_rx,
            transport: transport.clone(),
        };
        runtime.spawn(driver.run());

        METRICS.connection_constructed();
        debug!(conn_id = %id, endpoint = %params.endpoint, "Connection created");

        Ok(Self {
            id,
            params,
            created_at: Instant::now(),
            phase_rx,
            close_tx,
            transport,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.params.endpoint
    }

    /// Current lifecycle phase
    ///
    /// Reports `Closed` once the driver task has ended, even if it ended by
    /// panicking in a hook before it could record the transition.
    pub fn phase(&self) -> ConnectionPhase {
        if self.driver_gone() {
            return ConnectionPhase::Closed;
        }
        *self.phase_rx.borrow()
    }

    fn driver_gone(&self) -> bool {
        self.phase_rx.has_changed().is_err()
    }

    /// Handshake completed and no close has started
    pub fn is_open(&self) -> bool {
        self.phase().is_open()
    }

    /// Terminal state reached
    ///
    /// Both `is_open` and `is_closed` are false while the handshake runs.
    pub fn is_closed(&self) -> bool {
        self.phase().is_closed()
    }

    /// The live transport, if the connection is open
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        if self.driver_gone() {
            return None;
        }
        self.transport.lock().clone()
    }

    /// Request a graceful close
    ///
    /// Returns immediately. Completion is visible through `is_closed`,
    /// `wait_closed` and the `on_closed` hook.
    pub fn close(&self) {
        let already = self.close_tx.send_replace(true);
        if !already {
            debug!(conn_id = %self.id, phase = %self.phase(), "Close requested");
        }
    }

    /// Wait until the handshake has either succeeded or given up
    ///
    /// Returns whether the connection is open at that point.
    pub async fn wait_open(&self) -> bool {
        let mut rx = self.phase_rx.clone();
        let _ = rx
            .wait_for(|p| !matches!(p, ConnectionPhase::Unopened | ConnectionPhase::Opening))
            .await;
        self.is_open()
    }

    /// Wait until the connection is closed
    pub async fn wait_closed(&self) {
        let mut rx = self.phase_rx.clone();
        // An error means the driver task ended, possibly without recording
        // Closed, and `phase()` already reports that as closed
        let _ = rx.wait_for(|p| p.is_closed()).await;
    }

    /// Run until the connection closes or a Ctrl+C / SIGTERM arrives
    ///
    /// On a signal a graceful close is started and the call keeps waiting
    /// until the close handshake is done.
    pub async fn start(&self) {
        self.run_until(crate::util::shutdown_signal()).await
    }

    /// Run until the connection closes or `stop` resolves
    pub async fn run_until<F>(&self, stop: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = self.wait_closed() => return,
            _ = stop => {
                info!(conn_id = %self.id, "Stop signal received, closing connection");
                self.close();
            }
        }
        self.wait_closed().await;
    }

    /// Snapshot for inspection
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.to_string(),
            role: None,
            name: None,
            endpoint: self.params.endpoint.to_string(),
            phase: self.phase(),
            age_secs: self.created_at.elapsed().as_secs_f64(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Nobody can reach the transport anymore
        self.close_tx.send_replace(true);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.params.endpoint)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Owns the transport for the lifetime of one connection
struct Driver {
    id: ConnectionId,
    params: Arc<ConnectionParams>,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn ConnectionHandler>,
    phase_tx: watch::Sender<ConnectionPhase>,
    close_rx: watch::Receiver<bool>,
    transport: TransportSlot,
}

impl Driver {
    async fn run(mut self) {
        let endpoint = self.params.endpoint.clone();
        self.set_phase(ConnectionPhase::Opening);

        let outcome = tokio::select! {
            biased;
            _ = close_requested(&mut self.close_rx) => Err(TransportError::Aborted),
            result = handshake(self.id, self.connector.as_ref(), &self.params) => result,
        };

        let transport = match outcome {
            Ok(transport) => transport,
            Err(err) => {
                self.set_phase(ConnectionPhase::Closed);
                METRICS.connection_failed();
                self.handler.on_open_failed(self.id, &endpoint, &err);
                return;
            }
        };

        *self.transport.lock() = Some(transport.clone());
        self.set_phase(ConnectionPhase::Open);
        METRICS.connection_opened();
        self.handler.on_opened(self.id, &endpoint, transport.as_ref());

        let remote = tokio::select! {
            _ = close_requested(&mut self.close_rx) => None,
            err = transport.closed() => Some(err),
        };

        let reason = match remote {
            Some(err) => CloseReason::Remote(err),
            None => {
                self.set_phase(ConnectionPhase::Closing);
                if let Err(err) = transport.close().await {
                    debug!(conn_id = %self.id, error = %err, "Close handshake did not complete cleanly");
                }
                CloseReason::Requested
            }
        };

        self.transport.lock().take();
        self.set_phase(ConnectionPhase::Closed);
        METRICS.connection_closed();
        self.handler.on_closed(self.id, &endpoint, &reason);
    }

    fn set_phase(&self, next: ConnectionPhase) {
        let id = self.id;
        self.phase_tx.send_if_modified(|phase| {
            if phase.can_transition_to(next) {
                trace!(conn_id = %id, from = %*phase, to = %next, "Phase change");
                *phase = next;
                true
            } else {
                false
            }
        });
    }
}

async fn close_requested(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a request
    let _ = rx.wait_for(|requested| *requested).await;
}

/// Up to `connection_attempts` tries, each bounded by `connect_timeout`
async fn handshake(
    id: ConnectionId,
    connector: &dyn Connector,
    params: &ConnectionParams,
) -> std::result::Result<Arc<dyn Transport>, TransportError> {
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(params.connect_timeout, connector.connect(params)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(params.connect_timeout)),
        };

        match result {
            Ok(transport) => return Ok(transport),
            Err(err) if attempt < params.connection_attempts => {
                warn!(
                    conn_id = %id,
                    attempt,
                    max_attempts = params.connection_attempts,
                    error = %err,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(params.retry_delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
