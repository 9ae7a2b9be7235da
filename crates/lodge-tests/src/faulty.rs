//! Propagator wrapper that fails on chosen paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lodge_core::clean;
use lodge_prop::{PropError, Propagator};
use lodge_proto::{ErrorCode, Record};
use parking_lot::Mutex;
use tracing::debug;

/// Delegates to an inner propagator, except for paths marked as failing.
pub struct FaultyPropagator {
    inner: Arc<dyn Propagator>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FaultyPropagator {
    /// Wraps `inner` with no failing paths.
    pub fn new(inner: Arc<dyn Propagator>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Makes every call on `path` fail.
    pub fn fail_on(&self, path: &str) {
        self.failing.lock().insert(clean(path));
    }

    /// Clears all failing paths.
    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    /// Returns the number of calls seen, failing or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn check(&self, path: &str) -> Result<(), PropError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let path = clean(path);
        if self.failing.lock().contains(&path) {
            debug!(path = %path, "Injected propagation failure");
            return Err(PropError::Rejected {
                code: ErrorCode::Internal,
                message: format!("injected failure for {}", path),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Propagator for FaultyPropagator {
    async fn get(
        &self,
        path: &str,
        access_token: &str,
        force_creation: bool,
    ) -> Result<Record, PropError> {
        self.check(path)?;
        self.inner.get(path, access_token, force_creation).await
    }

    async fn put(&self, path: &str, access_token: &str) -> Result<(), PropError> {
        self.check(path)?;
        self.inner.put(path, access_token).await
    }

    async fn mv(&self, src: &str, dst: &str, access_token: &str) -> Result<(), PropError> {
        self.check(src)?;
        self.check(dst)?;
        self.inner.mv(src, dst, access_token).await
    }

    async fn rm(&self, path: &str, access_token: &str) -> Result<(), PropError> {
        self.check(path)?;
        self.inner.rm(path, access_token).await
    }
}
