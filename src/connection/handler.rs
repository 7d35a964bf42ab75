//! Lifecycle hooks
//!
//! A [`ConnectionHandler`] is supplied when a connection is built and is called
//! from the connection's driver task on every lifecycle transition. The default
//! methods only log; override them for application setup such as opening
//! channels once the connection is up.

use std::fmt;
use tracing::{error, info};

use super::params::Endpoint;
use super::state::ConnectionId;
use super::transport::Transport;
use crate::error::TransportError;

/// Why an open connection closed
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// `close()` was called
    Requested,
    /// The broker or the network ended the session
    Remote(TransportError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("close requested"),
            CloseReason::Remote(err) => write!(f, "{}", err),
        }
    }
}

/// Lifecycle callbacks
///
/// Hooks run on the driver task and must not block it for long. They cannot
/// fail; anything an override does wrong is its own business.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handshake succeeded. Called exactly once per connection.
    fn on_opened(&self, id: ConnectionId, endpoint: &Endpoint, _transport: &dyn Transport) {
        info!(
            conn_id = %id,
            host = %endpoint.host,
            port = endpoint.port,
            vhost = %endpoint.vhost,
            "Connection opened"
        );
    }

    /// Handshake gave up. No retry follows.
    fn on_open_failed(&self, id: ConnectionId, endpoint: &Endpoint, err: &TransportError) {
        error!(
            conn_id = %id,
            host = %endpoint.host,
            port = endpoint.port,
            vhost = %endpoint.vhost,
            error = %err,
            "Connection failed"
        );
    }

    /// A previously open connection is now closed
    fn on_closed(&self, id: ConnectionId, endpoint: &Endpoint, reason: &CloseReason) {
        info!(
            conn_id = %id,
            host = %endpoint.host,
            port = endpoint.port,
            vhost = %endpoint.vhost,
            reason = %reason,
            "Connection closed"
        );
    }
}

/// Handler that keeps the default logging behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl ConnectionHandler for LoggingHandler {}
