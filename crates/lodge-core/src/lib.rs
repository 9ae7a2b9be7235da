//! Lodge Core - Identities, tokens and path resolution for the lodge metadata service.
//!
//! This crate provides:
//! - The authenticated [`Identity`] and shared-secret token verification
//! - Home path derivation and path confinement
//! - Logical/physical path translation rooted at the service data root
//! - Second-resolution timestamps used in metadata records

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod identity;
pub mod path;
pub mod time;
pub mod token;

pub use identity::Identity;
pub use path::{clean, home, is_under_home, Confinement, PathError, PathResolver, Visibility};
pub use time::Timestamp;
pub use token::{issue_token, parse_token, SharedSecret, TokenError};

/// Logical namespace under which every home directory lives.
pub const HOME_NAMESPACE: &str = "local/users";

/// MIME type reported for containers.
pub const CONTAINER_MIME_TYPE: &str = "inode/container";

/// MIME type reported for files with an unrecognized extension.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Permission bits applied to directories created by the service.
pub const DIR_PERMISSIONS: u32 = 0o755;
