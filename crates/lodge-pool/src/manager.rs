//! Connection lifecycle callbacks.

use async_trait::async_trait;

/// Opens and closes the connections held by a [`Pool`](crate::Pool).
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// Connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Error returned by `open` and `close`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new connection.
    ///
    /// Failures surface from `Pool::acquire` as `PoolError::Open`; the pool
    /// never retries.
    async fn open(&self) -> Result<Self::Connection, Self::Error>;

    /// Closes a connection the pool no longer keeps.
    ///
    /// Runs from the handle's `Drop`, so it must not block.
    fn close(&self, conn: Self::Connection) -> Result<(), Self::Error>;
}
