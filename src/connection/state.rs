//! Connection state

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next process-wide identifier
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Connection lifecycle state
///
/// `Unopened -> Opening -> Open -> Closing -> Closed`, plus `Opening -> Closed`
/// when the handshake fails. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    /// Constructed, driver not yet running
    Unopened,
    /// Handshake in progress
    Opening,
    /// Handshake complete
    Open,
    /// Graceful close requested
    Closing,
    /// Terminal
    Closed,
}

impl ConnectionPhase {
    pub fn is_open(self) -> bool {
        self == ConnectionPhase::Open
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionPhase::Closed
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Unopened, Opening)
                | (Unopened, Closed)
                | (Opening, Open)
                | (Opening, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Serializable connection information for inspection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection ID (hex string)
    pub id: String,
    /// Registry role, if owned by a manager
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Configuration name, if owned by a manager
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `host:port/vhost`
    pub endpoint: String,
    /// Lifecycle phase
    pub phase: ConnectionPhase,
    /// Age in seconds
    pub age_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert_eq!(format!("{}", ConnectionId(255)), "00000000000000ff");
    }

    #[test]
    fn test_transitions() {
        use ConnectionPhase::*;

        assert!(Opening.can_transition_to(Open));
        assert!(Opening.can_transition_to(Closed));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Closed.can_transition_to(Opening));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Opening));
        assert!(!Opening.can_transition_to(Closing));
    }

    #[test]
    fn test_opening_is_neither_open_nor_closed() {
        let phase = ConnectionPhase::Opening;
        assert!(!phase.is_open());
        assert!(!phase.is_closed());
    }
}
