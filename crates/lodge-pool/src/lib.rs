//! Lodge Pool - Bounded pool of reusable connections.
//!
//! The pool bounds how many connections are leased at once, how many are
//! kept idle for reuse and how many are being opened concurrently. Opening and
//! closing connections is delegated to a [`Manager`].

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod connection;
pub mod manager;
pub mod pool;

pub use config::{ExhaustionPolicy, PoolConfig};
pub use connection::{ConnectionId, ConnectionInfo};
pub use manager::Manager;
pub use pool::{Pool, PoolStatus, Pooled};

use thiserror::Error;

/// Pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every handle is leased and the pool does not wait
    #[error("Pool exhausted: {max_active} handles in use")]
    Exhausted {
        /// Configured active ceiling
        max_active: usize,
    },

    /// The manager failed to open a connection
    #[error("Failed to open connection: {0}")]
    Open(String),

    /// The pool has been shut down
    #[error("Pool is shut down")]
    Closed,

    /// Invalid pool configuration
    #[error("Invalid pool configuration: {0}")]
    Config(String),
}
