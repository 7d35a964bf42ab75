//! Error types

use std::time::Duration;
use thiserror::Error;

/// A configuration entry that cannot be turned into connection parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("connection config has neither AMQP_URI nor HOST")]
    MissingEndpoint,

    #[error("connection config has an empty {0}")]
    EmptyField(&'static str),

    #[error("invalid AMQP_URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unknown connection option {0:?}")]
    UnknownOption(String),

    #[error("invalid value for option {key:?}: {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Failures reported by the broker client, delivered through lifecycle hooks
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("handshake aborted by close request")]
    Aborted,

    #[error("connection closed: {0}")]
    Closed(String),
}

/// Errors returned synchronously by connection construction and lookup
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, Error>;
