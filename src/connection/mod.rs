//! Connection management
//!
//! Handles connection parameters, lifecycle, and the per-role registries.

mod conn;
mod handler;
mod manager;
mod params;
mod state;
mod transport;

pub use conn::Connection;
pub use handler::{CloseReason, ConnectionHandler, LoggingHandler};
pub use manager::{ConnectionManager, Role};
pub use params::{ConnectionParams, Endpoint, Scheme};
pub use state::{ConnectionId, ConnectionInfo, ConnectionPhase};
pub use transport::{Connector, LapinConnector, LapinTransport, Transport};
