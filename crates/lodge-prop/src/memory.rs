//! In-memory propagation backend.
//!
//! Keeps one record per cleaned logical path. Access tokens are accepted
//! without verification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lodge_core::{clean, Timestamp};
use lodge_proto::Record;
use parking_lot::RwLock;
use tracing::debug;

use crate::{PropError, Propagator};

/// Returns true if `path` is `root` or lies below it.
fn is_within(path: &str, root: &str) -> bool {
    match path.strip_prefix(root) {
        Some(rest) => rest.is_empty() || root.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Reference [`Propagator`] holding records in a map.
#[derive(Debug, Default)]
pub struct MemoryPropagator {
    records: RwLock<HashMap<String, Record>>,
    version: AtomicU64,
}

impl MemoryPropagator {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns true if a record exists for `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.records.read().contains_key(&clean(path))
    }

    /// Returns a copy of the record for `path`.
    pub fn record(&self, path: &str) -> Option<Record> {
        self.records.read().get(&clean(path)).cloned()
    }

    fn next_etag(&self) -> String {
        format!("{:016x}", self.version.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn new_record(&self) -> Record {
        Record {
            id: hex::encode(rand::random::<[u8; 16]>()),
            etag: self.next_etag(),
            modified: Timestamp::now(),
            checksum: String::new(),
        }
    }
}

#[async_trait]
impl Propagator for MemoryPropagator {
    async fn get(
        &self,
        path: &str,
        _access_token: &str,
        force_creation: bool,
    ) -> Result<Record, PropError> {
        let path = clean(path);

        if let Some(record) = self.records.read().get(&path) {
            return Ok(record.clone());
        }
        if !force_creation {
            return Err(PropError::NotFound(path));
        }

        let mut records = self.records.write();
        let record = records
            .entry(path.clone())
            .or_insert_with(|| {
                debug!(path = %path, "Materialized record");
                self.new_record()
            })
            .clone();
        Ok(record)
    }

    async fn put(&self, path: &str, _access_token: &str) -> Result<(), PropError> {
        let path = clean(path);
        let mut records = self.records.write();

        match records.get_mut(&path) {
            Some(record) => {
                record.etag = self.next_etag();
                record.modified = Timestamp::now();
            }
            None => {
                records.insert(path.clone(), self.new_record());
            }
        }

        debug!(path = %path, "Stored record");
        Ok(())
    }

    async fn mv(&self, src: &str, dst: &str, _access_token: &str) -> Result<(), PropError> {
        let (src, dst) = (clean(src), clean(dst));
        let mut records = self.records.write();

        let moved: Vec<String> = records
            .keys()
            .filter(|key| is_within(key, &src))
            .cloned()
            .collect();

        for key in &moved {
            if let Some(record) = records.remove(key) {
                let renamed = format!("{}{}", dst, &key[src.len()..]);
                records.insert(renamed, record);
            }
        }

        debug!(src = %src, dst = %dst, records = moved.len(), "Moved records");
        Ok(())
    }

    async fn rm(&self, path: &str, _access_token: &str) -> Result<(), PropError> {
        let path = clean(path);
        let mut records = self.records.write();

        let before = records.len();
        records.retain(|key, _| !is_within(key, &path));

        debug!(path = %path, records = before - records.len(), "Removed records");
        Ok(())
    }
}
