//! Lodge Propagation - Access to the propagation service.
//!
//! The propagation service holds the authoritative identifier, entity tag,
//! modification time and checksum of every logical path. This crate provides:
//! - The [`Propagator`] interface used by the metadata service
//! - [`PooledPropagator`], a TCP client leasing connections from a [`Pool`](lodge_pool::Pool)
//! - [`MemoryPropagator`], an in-memory reference backend
//! - [`serve`], a TCP server exposing any backend over the propagation protocol

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod memory;
pub mod server;

pub use client::{PooledPropagator, PropConnection, TcpManager};
pub use memory::MemoryPropagator;
pub use server::{dispatch, serve};

use async_trait::async_trait;
use lodge_pool::PoolError;
use lodge_proto::{ErrorCode, FrameError, Record};
use thiserror::Error;

/// Errors from the propagation service or the path to it.
#[derive(Debug, Error)]
pub enum PropError {
    /// No record exists for the path
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The service rejected the request
    #[error("Propagation service error ({code}): {message}")]
    Rejected {
        /// Error class reported by the service
        code: ErrorCode,
        /// Detail reported by the service
        message: String,
    },

    /// No connection could be leased
    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    /// Transport or encoding failure
    #[error("Transport error: {0}")]
    Frame(#[from] FrameError),

    /// Response did not match the request
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl PropError {
    /// Returns the wire error class for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            PropError::NotFound(_) => ErrorCode::NotFound,
            PropError::Rejected { code, .. } => *code,
            PropError::Pool(PoolError::Exhausted { .. }) => ErrorCode::PoolExhausted,
            PropError::Pool(_) | PropError::Frame(_) | PropError::Protocol(_) => {
                ErrorCode::Internal
            }
        }
    }
}

/// The record interface of the propagation service.
#[async_trait]
pub trait Propagator: Send + Sync {
    /// Returns the record for `path`.
    ///
    /// With `force_creation` a missing record is materialized instead of
    /// failing with `PropError::NotFound`.
    async fn get(
        &self,
        path: &str,
        access_token: &str,
        force_creation: bool,
    ) -> Result<Record, PropError>;

    /// Creates or refreshes the record for `path`.
    async fn put(&self, path: &str, access_token: &str) -> Result<(), PropError>;

    /// Moves the records of `src` and its descendants under `dst`.
    async fn mv(&self, src: &str, dst: &str, access_token: &str) -> Result<(), PropError>;

    /// Removes the records of `path` and its descendants.
    async fn rm(&self, path: &str, access_token: &str) -> Result<(), PropError>;
}
