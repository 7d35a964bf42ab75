//! Resolved connection parameters

use lapin::uri::{AMQPScheme, AMQPUri};
use std::fmt;
use std::time::Duration;

use crate::config::{ConnectionConfig, OptionValue};
use crate::error::ConfigurationError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_USER: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_VHOST: &str = "/";

const DEFAULT_CONNECTION_ATTEMPTS: u32 = 1;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Amqp,
    Amqps,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Amqp => 5672,
            Scheme::Amqps => 5671,
        }
    }
}

/// Broker identity used in logs: `host:port/vhost`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub vhost: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.vhost)
    }
}

/// Validated parameters for one connection
///
/// Built once from a [`ConnectionConfig`] and never changed afterwards.
#[derive(Clone, PartialEq)]
pub struct ConnectionParams {
    pub scheme: Scheme,
    pub endpoint: Endpoint,
    pub username: String,
    pub password: String,
    pub heartbeat: Option<u16>,
    pub frame_max: Option<u32>,
    pub channel_max: Option<u16>,
    /// Handshake attempts before reporting open failure
    pub connection_attempts: u32,
    /// Pause between handshake attempts
    pub retry_delay: Duration,
    /// Upper bound for a single handshake attempt
    pub connect_timeout: Duration,
}

impl ConnectionParams {
    /// Resolve a config entry
    ///
    /// `AMQP_URI` wins over the discrete fields. Options apply in both cases,
    /// but a query parameter in the URI wins over the same option.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, ConfigurationError> {
        let mut params = match &config.amqp_uri {
            Some(uri) => Self::from_uri(uri)?,
            None if config.is_empty() => return Err(ConfigurationError::MissingEndpoint),
            None => Self::from_fields(config)?,
        };

        params.apply_options(config)?;

        if let Some(uri) = &config.amqp_uri {
            params.apply_uri_query(uri)?;
        }

        Ok(params)
    }

    fn from_fields(config: &ConnectionConfig) -> Result<Self, ConfigurationError> {
        let host = non_empty("HOST", config.host.as_deref().unwrap_or(DEFAULT_HOST))?;
        let username = non_empty("USER", config.user.as_deref().unwrap_or(DEFAULT_USER))?;
        let vhost = non_empty("VHOST", config.vhost.as_deref().unwrap_or(DEFAULT_VHOST))?;
        let password = config.password.as_deref().unwrap_or(DEFAULT_PASSWORD);

        Ok(Self {
            scheme: Scheme::Amqp,
            endpoint: Endpoint {
                host: host.to_string(),
                port: config.port.unwrap_or(DEFAULT_PORT),
                vhost: vhost.to_string(),
            },
            username: username.to_string(),
            password: password.to_string(),
            ..Self::base()
        })
    }

    fn from_uri(raw: &str) -> Result<Self, ConfigurationError> {
        let uri = parse_uri(raw)?;
        let scheme = match uri.scheme {
            AMQPScheme::AMQP => Scheme::Amqp,
            AMQPScheme::AMQPS => Scheme::Amqps,
        };
        if uri.authority.host.is_empty() {
            return Err(ConfigurationError::InvalidUri {
                uri: raw.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let port = if uri.authority.port == 0 {
            scheme.default_port()
        } else {
            uri.authority.port
        };

        Ok(Self {
            scheme,
            endpoint: Endpoint {
                host: uri.authority.host,
                port,
                vhost: uri.vhost,
            },
            username: uri.authority.userinfo.username,
            password: uri.authority.userinfo.password,
            ..Self::base()
        })
    }

    fn base() -> Self {
        Self {
            scheme: Scheme::Amqp,
            endpoint: Endpoint {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                vhost: DEFAULT_VHOST.to_string(),
            },
            username: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            heartbeat: None,
            frame_max: None,
            channel_max: None,
            connection_attempts: DEFAULT_CONNECTION_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    fn apply_options(&mut self, config: &ConnectionConfig) -> Result<(), ConfigurationError> {
        let mut timeout: Option<Duration> = None;
        for (key, value) in &config.options {
            self.apply_option(key, value, &mut timeout)?;
        }

        if let Some(timeout) = timeout {
            self.connect_timeout = timeout;
        }
        Ok(())
    }

    fn apply_option(
        &mut self,
        key: &str,
        value: &OptionValue,
        timeout: &mut Option<Duration>,
    ) -> Result<(), ConfigurationError> {
        match key {
            "heartbeat" => self.heartbeat = Some(integer(key, value)?),
            "frame_max" => self.frame_max = Some(integer(key, value)?),
            "channel_max" => self.channel_max = Some(integer(key, value)?),
            "connection_attempts" => {
                let attempts: u32 = integer(key, value)?;
                if attempts == 0 {
                    return Err(invalid(key, "must be at least 1"));
                }
                self.connection_attempts = attempts;
            }
            "retry_delay" => self.retry_delay = seconds(key, value)?,
            // pika-style socket/stack timeouts all bound the same handshake
            "socket_timeout" | "connection_timeout" | "stack_timeout" => {
                let secs = seconds(key, value)?;
                if secs.is_zero() {
                    return Err(invalid(key, "must be positive"));
                }
                *timeout = Some(timeout.map_or(secs, |t| t.min(secs)));
            }
            _ => return Err(ConfigurationError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    /// Apply the URI query on top of the options
    ///
    /// `heartbeat`, `frame_max` and `channel_max` come from `lapin`'s parser,
    /// as does `connection_timeout`, which is in milliseconds there. Every
    /// other key goes through the same rules as `OPTIONS`.
    fn apply_uri_query(&mut self, raw: &str) -> Result<(), ConfigurationError> {
        let query = parse_uri(raw)?.query;
        if let Some(heartbeat) = query.heartbeat {
            self.heartbeat = Some(heartbeat);
        }
        if let Some(frame_max) = query.frame_max {
            self.frame_max = Some(frame_max);
        }
        if let Some(channel_max) = query.channel_max {
            self.channel_max = Some(channel_max);
        }

        let mut timeout = query.connection_timeout.map(Duration::from_millis);
        for (key, value) in query_pairs(raw) {
            match key {
                "heartbeat" | "frame_max" | "channel_max" | "connection_timeout"
                | "auth_mechanism" => {}
                _ => self.apply_option(key, &query_value(value), &mut timeout)?,
            }
        }

        if let Some(timeout) = timeout {
            self.connect_timeout = timeout;
        }
        Ok(())
    }

    /// Broker identity
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Build the URI handed to the broker client
    pub fn to_amqp_uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.scheme = match self.scheme {
            Scheme::Amqp => AMQPScheme::AMQP,
            Scheme::Amqps => AMQPScheme::AMQPS,
        };
        uri.authority.host = self.endpoint.host.clone();
        uri.authority.port = self.endpoint.port;
        uri.authority.userinfo.username = self.username.clone();
        uri.authority.userinfo.password = self.password.clone();
        uri.vhost = self.endpoint.vhost.clone();
        uri.query.heartbeat = self.heartbeat;
        uri.query.frame_max = self.frame_max;
        uri.query.channel_max = self.channel_max;
        uri.query.connection_timeout = Some(self.connect_timeout.as_millis() as u64);
        uri
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("scheme", &self.scheme)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("heartbeat", &self.heartbeat)
            .field("frame_max", &self.frame_max)
            .field("channel_max", &self.channel_max)
            .field("connection_attempts", &self.connection_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn parse_uri(raw: &str) -> Result<AMQPUri, ConfigurationError> {
    raw.parse::<AMQPUri>()
        .map_err(|reason| ConfigurationError::InvalidUri {
            uri: raw.to_string(),
            reason,
        })
}

/// Raw `key=value` pairs of the URI query, in order
fn query_pairs(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    let query = raw.split_once('?').map_or("", |(_, query)| query);
    let query = query.split_once('#').map_or(query, |(query, _)| query);
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
}

fn query_value(raw: &str) -> OptionValue {
    if let Ok(n) = raw.parse::<i64>() {
        OptionValue::Integer(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        OptionValue::Float(f)
    } else {
        OptionValue::Text(raw.to_string())
    }
}

fn non_empty<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ConfigurationError> {
    if value.trim().is_empty() {
        Err(ConfigurationError::EmptyField(field))
    } else {
        Ok(value)
    }
}

fn integer<T: TryFrom<u64>>(key: &str, value: &OptionValue) -> Result<T, ConfigurationError> {
    let raw = value
        .as_u64()
        .ok_or_else(|| invalid(key, "expected a non-negative integer"))?;
    T::try_from(raw).map_err(|_| invalid(key, "out of range"))
}

fn seconds(key: &str, value: &OptionValue) -> Result<Duration, ConfigurationError> {
    value
        .as_secs()
        .ok_or_else(|| invalid(key, "expected a non-negative number of seconds"))
        .and_then(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|_| invalid(key, "out of range"))
        })
}

fn invalid(key: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidOption {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
