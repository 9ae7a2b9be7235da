//! Lodge Protocol - Wire messages and framing.
//!
//! This crate defines:
//! - The metadata record returned to clients
//! - The propagation record and the messages exchanged with the propagation service
//! - The client-facing request and response messages
//! - Length-prefixed JSON framing shared by both protocols

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod frame;
pub mod messages;
pub mod metadata;
pub mod propagation;

pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_SIZE};
pub use messages::{Operation, Request, Response};
pub use metadata::{Metadata, Record};
pub use propagation::{PropRequest, PropResponse};

use serde::{Deserialize, Serialize};

/// Error classes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Identity could not be established
    Unauthenticated,
    /// Confinement or home-target violation
    PermissionDenied,
    /// Resource does not exist
    NotFound,
    /// Resource already exists
    AlreadyExists,
    /// Connection ceiling reached; retrying later may succeed
    PoolExhausted,
    /// Request could not be decoded
    BadRequest,
    /// Any other failure
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::NotFound => "not found",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::PoolExhausted => "pool exhausted",
            ErrorCode::BadRequest => "bad request",
            ErrorCode::Internal => "internal",
        };
        f.write_str(name)
    }
}
