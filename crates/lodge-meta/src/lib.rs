//! Lodge Meta - The request-processing core of the lodge metadata service.
//!
//! Implements:
//! - Metadata aggregation: filesystem attributes overlaid with propagation records
//! - The client-facing operations (home, mkdir, stat, cp, mv, rm)
//! - Service configuration from TOML files and the environment
//! - Recursive copy helpers for the physical tree
//! - The TCP server for the client-facing protocol

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod aggregate;
pub mod config;
pub mod context;
pub mod executor;
pub mod ops;
pub mod server;

pub use aggregate::{mime_type_for, Aggregator};
pub use config::{ConfigError, ServiceConfig};
pub use context::RequestContext;
pub use executor::Executor;
pub use server::serve;

use std::io;

use lodge_core::PathError;
use lodge_pool::PoolError;
use lodge_prop::PropError;
use lodge_proto::ErrorCode;
use thiserror::Error;

/// Errors returned by the client-facing operations.
///
/// Messages only ever mention logical paths.
#[derive(Debug, Error)]
pub enum MetaError {
    /// Identity could not be established
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Confinement or home-target violation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Request is well-formed but cannot be applied
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No connection to the propagation service could be leased
    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// Propagation service failure
    #[error("Propagation error: {0}")]
    Propagation(PropError),

    /// Filesystem failure not covered above
    #[error("IO error on {path}: {source}")]
    Io {
        /// Logical path the failure relates to
        path: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Any other failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MetaError {
    /// Classifies a filesystem error on the logical `path`.
    pub fn io(path: impl Into<String>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => MetaError::NotFound(path),
            io::ErrorKind::AlreadyExists => MetaError::AlreadyExists(path),
            io::ErrorKind::PermissionDenied => MetaError::PermissionDenied(path),
            _ => MetaError::Io { path, source: err },
        }
    }

    /// Returns the wire error class.
    pub fn code(&self) -> ErrorCode {
        match self {
            MetaError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            MetaError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            MetaError::NotFound(_) => ErrorCode::NotFound,
            MetaError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            MetaError::InvalidArgument(_) => ErrorCode::BadRequest,
            MetaError::PoolExhausted(_) => ErrorCode::PoolExhausted,
            MetaError::Propagation(_) | MetaError::Io { .. } | MetaError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }
}

impl From<PropError> for MetaError {
    fn from(err: PropError) -> Self {
        match err {
            PropError::Pool(PoolError::Exhausted { .. }) => MetaError::PoolExhausted(err.to_string()),
            err => MetaError::Propagation(err),
        }
    }
}

impl From<PathError> for MetaError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::EmptyPrincipal | PathError::InvalidPrincipal(_) => {
                MetaError::Unauthenticated(err.to_string())
            }
            PathError::OutsideDataRoot(_) | PathError::NonUtf8(_) => {
                MetaError::Internal("path could not be resolved".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_classified_by_kind() {
        let not_found = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(MetaError::io("a", not_found), MetaError::NotFound(p) if p == "a"));

        let exists = io::Error::from(io::ErrorKind::AlreadyExists);
        assert_eq!(MetaError::io("a", exists).code(), ErrorCode::AlreadyExists);

        let other = io::Error::new(io::ErrorKind::Other, "disk on fire");
        assert_eq!(MetaError::io("a", other).code(), ErrorCode::Internal);
    }

    #[test]
    fn test_pool_exhaustion_is_its_own_class() {
        let err: MetaError = PropError::Pool(PoolError::Exhausted { max_active: 4 }).into();
        assert_eq!(err.code(), ErrorCode::PoolExhausted);

        let err: MetaError = PropError::Pool(PoolError::Open("refused".into())).into();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_path_errors_never_leak_physical_paths() {
        let err: MetaError = PathError::OutsideDataRoot("/srv/secret".into()).into();
        assert!(!err.to_string().contains("/srv/secret"));

        let err: MetaError = PathError::EmptyPrincipal.into();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);
    }
}
