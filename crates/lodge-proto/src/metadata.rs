//! Metadata and propagation records.

use lodge_core::Timestamp;
use serde::{Deserialize, Serialize};

/// Attributes the propagation service holds for one logical path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Stable resource identifier
    pub id: String,
    /// Entity tag, changes whenever the resource or a descendant changes
    pub etag: String,
    /// Propagated modification time
    pub modified: Timestamp,
    /// Content checksum, empty when unknown
    #[serde(default)]
    pub checksum: String,
}

/// Metadata describing one resource.
///
/// Size, container flag, MIME type and permissions come from the filesystem
/// at request time. Identifier, entity tag, modification time and checksum are
/// overlaid from the propagation record when one is available.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Logical path
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// True for directories
    pub is_container: bool,
    /// Modification time
    pub modified: Timestamp,
    /// MIME type
    pub mime_type: String,
    /// Permission bits
    pub permissions: u32,
    /// Identifier from the propagation record
    #[serde(default)]
    pub id: String,
    /// Entity tag from the propagation record
    #[serde(default)]
    pub etag: String,
    /// Checksum from the propagation record
    #[serde(default)]
    pub checksum: String,
    /// Direct children, only present when requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Metadata>,
}

impl Metadata {
    /// Overlays the propagation-held attributes of `record`.
    pub fn overlay(&mut self, record: &Record) {
        self.id = record.id.clone();
        self.etag = record.etag.clone();
        self.modified = record.modified;
        self.checksum = record.checksum.clone();
    }

    /// Returns the final segment of the logical path.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}
