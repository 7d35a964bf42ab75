//! Connection manager
//!
//! Keeps one current connection per (role, name) and rebuilds it on the next
//! lookup once it is found closed.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::conn::Connection;
use super::handler::{ConnectionHandler, LoggingHandler};
use super::state::ConnectionInfo;
use super::transport::{Connector, LapinConnector};
use crate::config::ConnectionTable;
use crate::error::Result;
use crate::metrics::METRICS;

/// Which registry a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Consumer,
    Publisher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Consumer => "consumer",
            Role::Publisher => "publisher",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the connection table and the per-role registries
pub struct ConnectionManager {
    /// Named configurations, replaced wholesale
    configs: RwLock<Arc<ConnectionTable>>,
    /// Consumer connections by name
    consumers: DashMap<String, Arc<Connection>>,
    /// Publisher connections by name
    publishers: DashMap<String, Arc<Connection>>,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn ConnectionHandler>,
}

impl ConnectionManager {
    /// Create a manager with an empty table and logging hooks
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            configs: RwLock::new(Arc::new(ConnectionTable::new())),
            consumers: DashMap::new(),
            publishers: DashMap::new(),
            connector,
            handler: Arc::new(LoggingHandler),
        }
    }

    /// Create a manager that talks to RabbitMQ through `lapin`
    pub fn lapin(configs: ConnectionTable) -> Self {
        Self::new(Arc::new(LapinConnector)).with_configs(configs)
    }

    /// Use `handler` for every connection built from now on
    pub fn with_handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Start with `configs` as the table
    pub fn with_configs(self, configs: ConnectionTable) -> Self {
        self.set_configs(Some(configs));
        self
    }

    /// Replace the whole configuration table
    ///
    /// `None` clears it. Existing connections are left alone.
    pub fn set_configs(&self, configs: Option<ConnectionTable>) {
        let configs = configs.unwrap_or_default();
        debug!(entries = configs.len(), "Connection table replaced");
        *self.configs.write() = Arc::new(configs);
    }

    /// Current configuration table
    pub fn configs(&self) -> Arc<ConnectionTable> {
        self.configs.read().clone()
    }

    /// Connection used for consuming from `name`
    pub fn get_consumer(&self, name: &str) -> Result<Option<Arc<Connection>>> {
        self.get(Role::Consumer, name)
    }

    /// Connection used for publishing to `name`
    pub fn get_publisher(&self, name: &str) -> Result<Option<Arc<Connection>>> {
        self.get(Role::Publisher, name)
    }

    /// Return the current connection for (role, name), building one if needed
    ///
    /// A registered connection that is open or still connecting is returned
    /// as is. A closed one is replaced. `Ok(None)` means `name` has no usable
    /// configuration entry.
    pub fn get(&self, role: Role, name: &str) -> Result<Option<Arc<Connection>>> {
        let registry = self.registry(role);

        if let Some(conn) = registry.get(name) {
            if !conn.is_closed() {
                return Ok(Some(Arc::clone(conn.value())));
            }
        }

        // Holding the entry guard makes check-build-register atomic per key
        match registry.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Ok(Some(entry.get().clone()));
                }

                let stale_id = entry.get().id();
                match self.build(name)? {
                    Some(conn) => {
                        info!(
                            %role,
                            conn_name = name,
                            stale_id = %stale_id,
                            conn_id = %conn.id(),
                            "Replacing closed connection"
                        );
                        METRICS.connection_replaced();
                        entry.insert(conn.clone());
                        Ok(Some(conn))
                    }
                    None => {
                        entry.remove();
                        Ok(None)
                    }
                }
            }
            Entry::Vacant(entry) => match self.build(name)? {
                Some(conn) => {
                    debug!(%role, conn_name = name, conn_id = %conn.id(), "Registered connection");
                    entry.insert(conn.clone());
                    Ok(Some(conn))
                }
                None => Ok(None),
            },
        }
    }

    fn build(&self, name: &str) -> Result<Option<Arc<Connection>>> {
        let config = match self.configs.read().get(name) {
            Some(config) if !config.is_empty() => config.clone(),
            _ => {
                debug!(conn_name = name, "No configuration for connection");
                return Ok(None);
            }
        };

        let conn = Connection::new(&config, self.connector.clone(), self.handler.clone())?;
        Ok(Some(Arc::new(conn)))
    }

    fn registry(&self, role: Role) -> &DashMap<String, Arc<Connection>> {
        match role {
            Role::Consumer => &self.consumers,
            Role::Publisher => &self.publishers,
        }
    }

    /// Drop the entry for (role, name) and close it
    ///
    /// The next lookup builds a fresh connection.
    pub fn remove(&self, role: Role, name: &str) -> Option<Arc<Connection>> {
        let (_, conn) = self.registry(role).remove(name)?;
        conn.close();
        debug!(%role, conn_name = name, conn_id = %conn.id(), "Connection removed");
        Some(conn)
    }

    /// Number of registered connections across both roles
    pub fn connection_count(&self) -> usize {
        self.consumers.len() + self.publishers.len()
    }

    /// Registered connections that have not closed yet
    pub fn live_count(&self) -> usize {
        self.consumers
            .iter()
            .chain(self.publishers.iter())
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    /// List all registered connections
    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        [Role::Consumer, Role::Publisher]
            .into_iter()
            .flat_map(|role| {
                self.registry(role).iter().map(move |entry| ConnectionInfo {
                    role: Some(role.to_string()),
                    name: Some(entry.key().clone()),
                    ..entry.value().info()
                })
            })
            .collect()
    }

    /// Request close on every registered connection
    pub fn close_all(&self) {
        info!(connections = self.connection_count(), "Closing all connections");
        for entry in self.consumers.iter().chain(self.publishers.iter()) {
            entry.value().close();
        }
    }

    /// Close everything and wait for it to finish (graceful shutdown)
    pub async fn drain(&self, timeout: Duration) {
        self.close_all();

        let start = std::time::Instant::now();
        while self.live_count() > 0 && start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.live_count();
        if remaining > 0 {
            warn!(remaining, "Connections still open after drain timeout");
        } else {
            info!("All connections closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::{ConnectionParams, Transport};
    use crate::error::TransportError;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OpenConnector {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for OpenConnector {
        async fn connect(
            &self,
            _params: &ConnectionParams,
        ) -> std::result::Result<Arc<dyn Transport>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(IdleTransport))
        }
    }

    struct IdleTransport;

    #[async_trait]
    impl Transport for IdleTransport {
        async fn close(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn closed(&self) -> TransportError {
            std::future::pending().await
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn manager() -> ConnectionManager {
        let connector = Arc::new(OpenConnector {
            connects: AtomicUsize::new(0),
        });
        let mut table = ConnectionTable::new();
        table.insert("default".to_string(), ConnectionConfig::from_host("localhost"));
        table.insert("blank".to_string(), ConnectionConfig::default());
        ConnectionManager::new(connector).with_configs(table)
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let manager = manager();

        let conn = manager.get_consumer("default").unwrap().unwrap();
        assert_eq!(manager.connection_count(), 1);
        assert!(conn.wait_open().await);

        let again = manager.get_consumer("default").unwrap().unwrap();
        assert!(Arc::ptr_eq(&conn, &again));

        conn.close();
        conn.wait_closed().await;

        let rebuilt = manager.get_consumer("default").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&conn, &rebuilt));
        assert_eq!(manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_blank_entries() {
        let manager = manager();

        assert!(manager.get_consumer("missing").unwrap().is_none());
        assert!(manager.get_publisher("missing").unwrap().is_none());
        assert!(manager.get_consumer("blank").unwrap().is_none());
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_entry_dropped_when_config_removed() {
        let manager = manager();

        let conn = manager.get_publisher("default").unwrap().unwrap();
        conn.close();
        conn.wait_closed().await;

        manager.set_configs(None);
        assert!(manager.configs().is_empty());
        assert!(manager.get_publisher("default").unwrap().is_none());
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_set_configs_replaces_whole_table() {
        let manager = manager();

        let conn = manager.get_consumer("default").unwrap().unwrap();
        conn.close();
        conn.wait_closed().await;

        let mut table = ConnectionTable::new();
        table.insert("other".to_string(), ConnectionConfig::from_host("localhost"));
        manager.set_configs(Some(table));

        let configs = manager.configs();
        assert_eq!(configs.len(), 1);
        assert!(configs.contains_key("other"));
        assert!(!configs.contains_key("default"));
        assert!(!configs.contains_key("blank"));

        assert!(manager.get_consumer("other").unwrap().is_some());
        assert!(manager.get_consumer("default").unwrap().is_none());
        assert!(manager.get_publisher("default").unwrap().is_none());
        assert_eq!(manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_set_configs_keeps_existing_connections() {
        let manager = manager();

        let conn = manager.get_consumer("default").unwrap().unwrap();
        manager.set_configs(Some(ConnectionTable::new()));

        let same = manager.get_consumer("default").unwrap().unwrap();
        assert!(Arc::ptr_eq(&conn, &same));
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let manager = manager();

        manager.get_consumer("default").unwrap().unwrap();
        manager.get_publisher("default").unwrap().unwrap();

        let infos = manager.list_connections();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().any(|i| i.role.as_deref() == Some("consumer")));
        assert!(infos.iter().any(|i| i.role.as_deref() == Some("publisher")));
        assert!(infos.iter().all(|i| i.name.as_deref() == Some("default")));

        let removed = manager.remove(Role::Publisher, "default").unwrap();
        removed.wait_closed().await;
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.remove(Role::Publisher, "default").is_none());
    }

    #[tokio::test]
    async fn test_drain_closes_everything() {
        let manager = manager();

        let consumer = manager.get_consumer("default").unwrap().unwrap();
        let publisher = manager.get_publisher("default").unwrap().unwrap();
        assert!(consumer.wait_open().await);
        assert!(publisher.wait_open().await);

        manager.drain(Duration::from_secs(5)).await;

        assert!(consumer.is_closed());
        assert!(publisher.is_closed());
        assert_eq!(manager.live_count(), 0);
    }
}
