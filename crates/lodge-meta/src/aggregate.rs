//! Metadata aggregation.
//!
//! Filesystem attributes are read at request time. When a propagator is
//! configured, its record for the same logical path is overlaid on top.

use std::path::Path;
use std::sync::Arc;

use lodge_core::{PathResolver, Timestamp, CONTAINER_MIME_TYPE, DEFAULT_MIME_TYPE};
use lodge_prop::Propagator;
use lodge_proto::Metadata;
use tokio::fs;
use tracing::{debug, warn};

use crate::MetaError;

/// Returns the MIME type reported for `path`.
pub fn mime_type_for(path: &str, is_container: bool) -> String {
    if is_container {
        return CONTAINER_MIME_TYPE.to_string();
    }
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Builds [`Metadata`] from the physical tree and the propagation service.
#[derive(Clone)]
pub struct Aggregator {
    resolver: PathResolver,
    propagator: Option<Arc<dyn Propagator>>,
}

impl Aggregator {
    /// Creates an aggregator. Without a propagator, metadata is
    /// filesystem-only.
    pub fn new(resolver: PathResolver, propagator: Option<Arc<dyn Propagator>>) -> Self {
        Self {
            resolver,
            propagator,
        }
    }

    /// Returns the path resolver.
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Returns the propagator, if any.
    pub fn propagator(&self) -> Option<&dyn Propagator> {
        self.propagator.as_deref()
    }

    /// Describes the resource at `physical` from the filesystem alone.
    ///
    /// Symbolic links below the data root are described as themselves,
    /// never as their targets.
    pub async fn describe(&self, physical: &Path) -> Result<Metadata, MetaError> {
        let path = self.resolver.to_logical(physical)?;
        let meta = if physical == self.resolver.data_root() {
            fs::metadata(physical).await
        } else {
            fs::symlink_metadata(physical).await
        }
        .map_err(|e| MetaError::io(path.as_str(), e))?;

        let is_container = meta.is_dir();
        let modified = meta
            .modified()
            .ok()
            .and_then(Timestamp::from_system_time)
            .unwrap_or_default();

        Ok(Metadata {
            mime_type: mime_type_for(&path, is_container),
            permissions: permission_bits(&meta),
            size: meta.len(),
            is_container,
            modified,
            path,
            ..Default::default()
        })
    }

    /// Overlays the propagation record for `metadata.path`, creating the
    /// record if the service has none.
    pub async fn enrich(&self, metadata: &mut Metadata, access_token: &str) -> Result<(), MetaError> {
        let Some(propagator) = self.propagator() else {
            return Ok(());
        };

        let record = propagator.get(&metadata.path, access_token, true).await?;
        metadata.overlay(&record);
        Ok(())
    }

    /// Describes the logical path `path`.
    ///
    /// With `enrich` the resource itself must be enriched successfully.
    /// With `children` a container also lists its direct children; a child
    /// that cannot be described or enriched is logged and left out.
    pub async fn stat(
        &self,
        path: &str,
        access_token: &str,
        children: bool,
        enrich: bool,
    ) -> Result<Metadata, MetaError> {
        let physical = self.resolver.to_physical(path);
        let mut metadata = self.describe(&physical).await?;

        if enrich {
            self.enrich(&mut metadata, access_token).await?;
        }
        if children && metadata.is_container {
            metadata.children = self
                .list_children(&physical, &metadata.path, access_token, enrich)
                .await?;
        }

        Ok(metadata)
    }

    async fn list_children(
        &self,
        physical: &Path,
        path: &str,
        access_token: &str,
        enrich: bool,
    ) -> Result<Vec<Metadata>, MetaError> {
        let mut entries = fs::read_dir(physical)
            .await
            .map_err(|e| MetaError::io(path, e))?;

        let mut children = Vec::new();
        let mut skipped = 0usize;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MetaError::io(path, e))?
        {
            let mut child = match self.describe(&entry.path()).await {
                Ok(child) => child,
                Err(e) => {
                    warn!(parent = %path, error = %e, "Skipping child that could not be described");
                    skipped += 1;
                    continue;
                }
            };

            if enrich {
                if let Err(e) = self.enrich(&mut child, access_token).await {
                    warn!(path = %child.path, error = %e, "Skipping child whose enrichment failed");
                    skipped += 1;
                    continue;
                }
            }

            children.push(child);
        }

        debug!(parent = %path, children = children.len(), skipped, "Listed children");
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use lodge_core::Confinement;
    use lodge_prop::MemoryPropagator;
    use tempfile::TempDir;

    use super::*;

    fn setup(propagator: Option<Arc<dyn Propagator>>) -> (TempDir, Aggregator) {
        let dir = TempDir::new().unwrap();
        let resolver = PathResolver::new(dir.path(), Confinement::Prefix);
        (dir, Aggregator::new(resolver, propagator))
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for("a/b", true), CONTAINER_MIME_TYPE);
        assert_eq!(mime_type_for("a/b.txt", false), "text/plain");
        assert_eq!(mime_type_for("a/b.unknownext", false), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type_for("a/noext", false), DEFAULT_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_describe_filesystem_only() {
        let (dir, aggregator) = setup(None);
        std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
        std::fs::write(dir.path().join("x/y/notes.txt"), b"hello").unwrap();

        let meta = aggregator.stat("x/y/notes.txt", "tok", false, true).await.unwrap();
        assert_eq!(meta.path, "x/y/notes.txt");
        assert_eq!(meta.size, 5);
        assert!(!meta.is_container);
        assert_eq!(meta.mime_type, "text/plain");
        assert!(meta.id.is_empty());
        assert!(meta.modified.as_secs() > 0);
    }

    #[tokio::test]
    async fn test_enrich_overlays_record() {
        let backend = Arc::new(MemoryPropagator::new());
        let (dir, aggregator) = setup(Some(backend.clone()));
        std::fs::create_dir(dir.path().join("d")).unwrap();

        let meta = aggregator.stat("d", "tok", false, true).await.unwrap();
        let record = backend.record("d").unwrap();
        assert_eq!(meta.id, record.id);
        assert_eq!(meta.etag, record.etag);
        assert_eq!(meta.modified, record.modified);
        assert_eq!(meta.mime_type, CONTAINER_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_children_listed_one_level() {
        let backend = Arc::new(MemoryPropagator::new());
        let (dir, aggregator) = setup(Some(backend.clone()));
        std::fs::create_dir_all(dir.path().join("d/sub/deeper")).unwrap();
        std::fs::write(dir.path().join("d/f"), b"x").unwrap();

        let meta = aggregator.stat("d", "tok", true, true).await.unwrap();
        let mut names: Vec<&str> = meta.children.iter().map(|c| c.name()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["f", "sub"]);
        assert!(meta.children.iter().all(|c| c.children.is_empty()));
        assert!(backend.contains("d/sub"));
        assert!(!backend.contains("d/sub/deeper"));
    }

    #[tokio::test]
    async fn test_children_of_a_file_are_empty() {
        let (dir, aggregator) = setup(None);
        std::fs::write(dir.path().join("f"), b"x").unwrap();

        let meta = aggregator.stat("f", "tok", true, false).await.unwrap();
        assert!(meta.children.is_empty());
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let (_dir, aggregator) = setup(None);
        let err = aggregator.stat("nope", "tok", false, false).await.unwrap_err();
        assert!(matches!(err, MetaError::NotFound(p) if p == "nope"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_is_not_listed_through() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"keep out").unwrap();

        let (dir, aggregator) = setup(None);
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("d/link")).unwrap();

        let meta = aggregator.stat("d/link", "tok", true, false).await.unwrap();
        assert!(!meta.is_container);
        assert!(meta.children.is_empty());

        let meta = aggregator.stat("d", "tok", true, false).await.unwrap();
        assert_eq!(meta.children.len(), 1);
        assert!(!meta.children[0].is_container);
    }
}
