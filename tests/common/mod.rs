//! In-memory broker used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use rabbitpool::connection::{
    CloseReason, ConnectionHandler, ConnectionId, ConnectionParams, Connector, Endpoint, Transport,
};
use rabbitpool::{ConnectionConfig, ConnectionTable, TransportError};

/// How the fake broker answers handshakes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Refuse,
}

/// Connector that hands out [`FakeTransport`]s
pub struct FakeBroker {
    behavior: Mutex<Behavior>,
    connects: AtomicUsize,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeBroker {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            connects: AtomicUsize::new(0),
            transports: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    /// Handshake attempts seen so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Simulate the broker dropping every session
    pub fn kill_all(&self, reason: &str) {
        for transport in self.transports.lock().iter() {
            transport.kill(reason);
        }
    }
}

#[async_trait]
impl Connector for FakeBroker {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Transport>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock();
        match behavior {
            Behavior::Accept => {
                let transport = Arc::new(FakeTransport::new(params.endpoint.clone()));
                self.transports.lock().push(transport.clone());
                Ok(transport)
            }
            Behavior::Refuse => Err(TransportError::Connect(format!(
                "connection refused by {}",
                params.endpoint
            ))),
        }
    }
}

/// One fake session
pub struct FakeTransport {
    pub endpoint: Endpoint,
    closes: AtomicUsize,
    killed: watch::Sender<Option<String>>,
}

impl FakeTransport {
    fn new(endpoint: Endpoint) -> Self {
        let (killed, _) = watch::channel(None);
        Self {
            endpoint,
            closes: AtomicUsize::new(0),
            killed,
        }
    }

    pub fn kill(&self, reason: &str) {
        self.killed.send_replace(Some(reason.to_string()));
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn closed(&self) -> TransportError {
        let mut rx = self.killed.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => String::new(),
        };
        TransportError::Closed(reason)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hook calls recorded in order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Opened(ConnectionId),
    OpenFailed(ConnectionId, TransportError),
    Closed(ConnectionId, CloseReason),
}

#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl ConnectionHandler for RecordingHandler {
    fn on_opened(&self, id: ConnectionId, _endpoint: &Endpoint, transport: &dyn Transport) {
        assert!(transport.as_any().downcast_ref::<FakeTransport>().is_some());
        self.events.lock().push(Event::Opened(id));
    }

    fn on_open_failed(&self, id: ConnectionId, _endpoint: &Endpoint, err: &TransportError) {
        self.events.lock().push(Event::OpenFailed(id, err.clone()));
    }

    fn on_closed(&self, id: ConnectionId, _endpoint: &Endpoint, reason: &CloseReason) {
        self.events.lock().push(Event::Closed(id, reason.clone()));
    }
}

/// The table from the sample program
pub fn sample_table() -> ConnectionTable {
    let config = ConnectionConfig {
        host: Some("localhost".to_string()),
        port: Some(5672),
        user: Some("guest".to_string()),
        password: Some("guest".to_string()),
        vhost: Some("pykamq".to_string()),
        ..Default::default()
    }
    .with_option("heartbeat", 20)
    .with_option("connection_attempts", 3)
    .with_option("retry_delay", 0);

    let mut table = ConnectionTable::new();
    table.insert("default".to_string(), config);
    table
}
