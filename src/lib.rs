//! Rabbitpool - named AMQP connections per role
//!
//! A [`ConnectionManager`] maps configuration names to at most one live
//! [`Connection`] per role (consumer or publisher), and transparently rebuilds
//! a connection the next time it is requested after it closed.
//!
//! ```no_run
//! use rabbitpool::{ConnectionConfig, ConnectionManager, ConnectionTable};
//!
//! # async fn example() -> rabbitpool::Result<()> {
//! let mut table = ConnectionTable::new();
//! table.insert(
//!     "default".to_string(),
//!     ConnectionConfig::from_host("localhost").with_option("heartbeat", 20),
//! );
//!
//! let manager = ConnectionManager::lapin(table);
//! if let Some(conn) = manager.get_consumer("default")? {
//!     conn.wait_open().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod util;

pub use config::{Config, ConnectionConfig, ConnectionTable, OptionValue};
pub use connection::{Connection, ConnectionHandler, ConnectionManager, Role};
pub use error::{ConfigurationError, Error, Result, TransportError};

/// Library version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
