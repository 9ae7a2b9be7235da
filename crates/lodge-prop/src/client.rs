//! Pooled TCP client for the propagation service.

use std::io;

use async_trait::async_trait;
use lodge_pool::{Manager, Pool, PoolConfig, PoolError, PoolStatus};
use lodge_proto::{read_frame, write_frame, ErrorCode, PropRequest, PropResponse, Record};
use tokio::net::TcpStream;
use tracing::debug;

use crate::{PropError, Propagator};

/// An open connection to the propagation service.
#[derive(Debug)]
pub struct PropConnection {
    stream: TcpStream,
}

impl PropConnection {
    /// Sends one request and waits for its response.
    pub async fn call(&mut self, request: &PropRequest) -> Result<PropResponse, PropError> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| PropError::Protocol("connection closed by propagation service".into()))
    }
}

/// Opens TCP connections to one propagation service address.
#[derive(Debug, Clone)]
pub struct TcpManager {
    addr: String,
}

impl TcpManager {
    /// Creates a manager for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Returns the service address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Manager for TcpManager {
    type Connection = PropConnection;
    type Error = io::Error;

    async fn open(&self) -> io::Result<PropConnection> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "Connected to propagation service");
        Ok(PropConnection { stream })
    }

    fn close(&self, conn: PropConnection) -> io::Result<()> {
        drop(conn);
        Ok(())
    }
}

/// [`Propagator`] that leases one pooled connection per call.
#[derive(Clone)]
pub struct PooledPropagator {
    pool: Pool<TcpManager>,
}

impl PooledPropagator {
    /// Creates a client for `addr`. Connections are opened lazily.
    pub fn new(addr: impl Into<String>, config: PoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            pool: Pool::new(TcpManager::new(addr), config)?,
        })
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &Pool<TcpManager> {
        &self.pool
    }

    /// Returns the pool counters.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Shuts the pool down.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    async fn call(&self, request: PropRequest) -> Result<PropResponse, PropError> {
        let mut conn = self.pool.acquire().await?;
        debug!(op = request.name(), conn = %conn.info().id, "Propagation call");

        match conn.call(&request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                // The stream may hold half a frame; never hand it out again.
                conn.mark_broken();
                Err(e)
            }
        }
    }
}

fn rejected(code: ErrorCode, message: String) -> PropError {
    match code {
        ErrorCode::NotFound => PropError::NotFound(message),
        code => PropError::Rejected { code, message },
    }
}

fn expect_record(response: PropResponse) -> Result<Record, PropError> {
    match response {
        PropResponse::Record { record } => Ok(record),
        PropResponse::Error { code, message } => Err(rejected(code, message)),
        PropResponse::Ack => Err(PropError::Protocol("expected a record, got ack".into())),
    }
}

fn expect_ack(response: PropResponse) -> Result<(), PropError> {
    match response {
        PropResponse::Ack => Ok(()),
        PropResponse::Error { code, message } => Err(rejected(code, message)),
        PropResponse::Record { .. } => {
            Err(PropError::Protocol("expected ack, got a record".into()))
        }
    }
}

#[async_trait]
impl Propagator for PooledPropagator {
    async fn get(
        &self,
        path: &str,
        access_token: &str,
        force_creation: bool,
    ) -> Result<Record, PropError> {
        let response = self
            .call(PropRequest::Get {
                path: path.to_string(),
                access_token: access_token.to_string(),
                force_creation,
            })
            .await?;
        expect_record(response)
    }

    async fn put(&self, path: &str, access_token: &str) -> Result<(), PropError> {
        let response = self
            .call(PropRequest::Put {
                path: path.to_string(),
                access_token: access_token.to_string(),
            })
            .await?;
        expect_ack(response)
    }

    async fn mv(&self, src: &str, dst: &str, access_token: &str) -> Result<(), PropError> {
        let response = self
            .call(PropRequest::Mv {
                src: src.to_string(),
                dst: dst.to_string(),
                access_token: access_token.to_string(),
            })
            .await?;
        expect_ack(response)
    }

    async fn rm(&self, path: &str, access_token: &str) -> Result<(), PropError> {
        let response = self
            .call(PropRequest::Rm {
                path: path.to_string(),
                access_token: access_token.to_string(),
            })
            .await?;
        expect_ack(response)
    }
}
