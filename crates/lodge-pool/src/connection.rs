//! Per-connection bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Usage information tracked for every pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// When the connection was opened
    pub opened_at: Instant,
    /// When the connection was last leased
    pub last_used: Instant,
    /// Number of times the connection has been leased
    pub uses: u64,
}

impl ConnectionInfo {
    /// Creates bookkeeping for a freshly opened connection.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            opened_at: now,
            last_used: now,
            uses: 0,
        }
    }

    /// Records a lease.
    pub fn record_use(&mut self) {
        self.uses += 1;
        self.last_used = Instant::now();
    }

    /// Returns the connection age.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Returns time since the connection was last leased.
    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self::new()
    }
}
