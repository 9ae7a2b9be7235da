//! Client-facing operations.
//!
//! Every operation authenticates the access token, cleans and confines its
//! paths, performs the filesystem action and then brings the propagation
//! service in line. Steps are not transactional: a failure after the
//! filesystem action leaves that action in place.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use lodge_core::{clean, home, parse_token, Identity, PathResolver, SharedSecret, Visibility};
use lodge_prop::Propagator;
use lodge_proto::{Metadata, Operation, Request, Response};
use tokio::fs;
use tracing::{debug, info, warn, Instrument};

use crate::aggregate::Aggregator;
use crate::config::ServiceConfig;
use crate::context::RequestContext;
use crate::ops;
use crate::MetaError;

/// Returns true if `path` is `root` or lies below it.
fn is_within(path: &str, root: &str) -> bool {
    match path.strip_prefix(root) {
        Some(rest) => rest.is_empty() || root.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Runs client operations against one data root.
#[derive(Clone)]
pub struct Executor {
    aggregator: Aggregator,
    secret: SharedSecret,
}

impl Executor {
    /// Creates an executor. Without a propagator, metadata is filesystem-only
    /// and mutations are not propagated.
    pub fn new(
        resolver: PathResolver,
        secret: SharedSecret,
        propagator: Option<Arc<dyn Propagator>>,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(resolver, propagator),
            secret,
        }
    }

    /// Creates an executor for `config`.
    pub fn from_config(config: &ServiceConfig, propagator: Option<Arc<dyn Propagator>>) -> Self {
        Self::new(config.resolver(), config.shared_secret.clone(), propagator)
    }

    /// Returns the aggregator.
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Returns the path resolver.
    pub fn resolver(&self) -> &PathResolver {
        self.aggregator.resolver()
    }

    fn propagator(&self) -> Option<&dyn Propagator> {
        self.aggregator.propagator()
    }

    fn authenticate(&self, access_token: &str) -> Result<Identity, MetaError> {
        let identity = parse_token(access_token, &self.secret).map_err(|e| {
            warn!(error = %e, "Rejected access token");
            MetaError::Unauthenticated(e.to_string())
        })?;
        debug!(identity = %identity, "Authenticated");
        Ok(identity)
    }

    /// Cleans `path` and checks it may be the target of a mutation.
    fn confine(&self, path: &str, identity: &Identity) -> Result<String, MetaError> {
        let path = clean(path);
        let home = home(identity)?;

        if !self.resolver().is_under_home(&path, identity)? {
            return Err(MetaError::PermissionDenied(format!(
                "{} is not under the home of {}",
                path, identity.pid
            )));
        }
        if path == home {
            return Err(MetaError::PermissionDenied(format!(
                "{} is a home directory",
                path
            )));
        }
        Ok(path)
    }

    /// Runs `operation` inside the request span and writes the access line.
    async fn observe<T, F>(
        &self,
        ctx: &RequestContext,
        method: &'static str,
        operation: F,
    ) -> Result<T, MetaError>
    where
        F: Future<Output = Result<T, MetaError>>,
    {
        async move {
            let start = Instant::now();
            let result = operation.await;
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(_) => info!(duration_ms, outcome = "ok", "access"),
                Err(e) => info!(duration_ms, outcome = %e.code(), error = %e, "access"),
            }
            result
        }
        .instrument(ctx.span(method))
        .await
    }

    /// Ensures the caller's home directory and its propagation record exist.
    pub async fn home(&self, ctx: &RequestContext, access_token: &str) -> Result<(), MetaError> {
        self.observe(ctx, "home", self.provision_home(access_token)).await
    }

    /// Creates one directory. The parent must exist.
    pub async fn mkdir(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        path: &str,
    ) -> Result<(), MetaError> {
        self.observe(ctx, "mkdir", self.create_dir(access_token, path)).await
    }

    /// Describes `path`, optionally with its direct children.
    pub async fn stat(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        path: &str,
        children: bool,
    ) -> Result<Metadata, MetaError> {
        self.observe(ctx, "stat", self.describe(access_token, path, children)).await
    }

    /// Copies `src` to `dst`, recursively for containers.
    pub async fn cp(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        src: &str,
        dst: &str,
    ) -> Result<(), MetaError> {
        self.observe(ctx, "cp", self.copy(access_token, src, dst)).await
    }

    /// Renames `src` to `dst`.
    pub async fn mv(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        src: &str,
        dst: &str,
    ) -> Result<(), MetaError> {
        self.observe(ctx, "mv", self.rename(access_token, src, dst)).await
    }

    /// Removes `path` and everything below it.
    pub async fn rm(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        path: &str,
    ) -> Result<(), MetaError> {
        self.observe(ctx, "rm", self.remove(access_token, path)).await
    }

    async fn provision_home(&self, access_token: &str) -> Result<(), MetaError> {
        let identity = self.authenticate(access_token)?;
        let home = home(&identity)?;
        let physical = self.resolver().to_physical(&home);

        match fs::metadata(&physical).await {
            Ok(meta) if meta.is_dir() => debug!(home = %home, "Home already exists"),
            Ok(_) => {
                return Err(MetaError::Internal(format!(
                    "{} exists and is not a directory",
                    home
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ops::create_dir_all(&physical)
                    .await
                    .map_err(|e| MetaError::io(home.as_str(), e))?;
                info!(home = %home, "Created home directory");
            }
            Err(e) => return Err(MetaError::io(home.as_str(), e)),
        }

        if let Some(propagator) = self.propagator() {
            propagator.get(&home, access_token, true).await?;
        }
        Ok(())
    }

    async fn create_dir(&self, access_token: &str, path: &str) -> Result<(), MetaError> {
        let identity = self.authenticate(access_token)?;
        let path = self.confine(path, &identity)?;

        ops::create_dir(&self.resolver().to_physical(&path))
            .await
            .map_err(|e| MetaError::io(path.as_str(), e))?;
        debug!(path = %path, "Created directory");

        if let Some(propagator) = self.propagator() {
            propagator.put(&path, access_token).await?;
        }
        Ok(())
    }

    async fn describe(
        &self,
        access_token: &str,
        path: &str,
        children: bool,
    ) -> Result<Metadata, MetaError> {
        let identity = self.authenticate(access_token)?;
        let path = clean(path);

        match self.resolver().visibility(&path, &identity)? {
            Visibility::Own => {
                self.aggregator
                    .stat(&path, access_token, children, true)
                    .await
            }
            Visibility::Common => {
                self.aggregator
                    .stat(&path, access_token, children, false)
                    .await
            }
            Visibility::Foreign if !children => {
                self.aggregator.stat(&path, access_token, false, false).await
            }
            Visibility::Foreign => Err(MetaError::PermissionDenied(format!(
                "cannot list {}",
                path
            ))),
            Visibility::Outside => Err(MetaError::PermissionDenied(format!(
                "{} is outside the home namespace",
                path
            ))),
        }
    }

    async fn copy(&self, access_token: &str, src: &str, dst: &str) -> Result<(), MetaError> {
        let identity = self.authenticate(access_token)?;
        let src = self.confine(src, &identity)?;
        let dst = self.confine(dst, &identity)?;

        if is_within(&dst, &src) {
            return Err(MetaError::InvalidArgument(format!(
                "cannot copy {} into itself",
                src
            )));
        }

        let from = self.resolver().to_physical(&src);
        let to = self.resolver().to_physical(&dst);
        let source = self.aggregator.describe(&from).await?;

        if fs::symlink_metadata(&from)
            .await
            .map_or(false, |meta| meta.file_type().is_symlink())
        {
            return Err(MetaError::InvalidArgument(format!(
                "cannot copy symbolic link {}",
                src
            )));
        }

        if fs::symlink_metadata(&to).await.is_ok() {
            return Err(MetaError::AlreadyExists(dst));
        }

        if source.is_container {
            let stats = ops::copy_dir(&from, &to)
                .await
                .map_err(|e| MetaError::io(dst.as_str(), e))?;
            debug!(
                src = %src,
                dst = %dst,
                dirs = stats.dirs,
                files = stats.files,
                bytes = stats.bytes,
                "Copied directory"
            );
        } else {
            let bytes = ops::copy_file(&from, &to, source.size)
                .await
                .map_err(|e| MetaError::io(dst.as_str(), e))?;
            debug!(src = %src, dst = %dst, bytes, "Copied file");
        }

        if let Some(propagator) = self.propagator() {
            propagator.put(&dst, access_token).await?;
        }
        Ok(())
    }

    async fn rename(&self, access_token: &str, src: &str, dst: &str) -> Result<(), MetaError> {
        let identity = self.authenticate(access_token)?;
        let src = self.confine(src, &identity)?;
        let dst = self.confine(dst, &identity)?;

        fs::rename(self.resolver().to_physical(&src), self.resolver().to_physical(&dst))
            .await
            .map_err(|e| MetaError::io(src.as_str(), e))?;
        debug!(src = %src, dst = %dst, "Renamed");

        if let Some(propagator) = self.propagator() {
            propagator.mv(&src, &dst, access_token).await?;
        }
        Ok(())
    }

    async fn remove(&self, access_token: &str, path: &str) -> Result<(), MetaError> {
        let identity = self.authenticate(access_token)?;
        let path = self.confine(path, &identity)?;

        ops::remove(&self.resolver().to_physical(&path))
            .await
            .map_err(|e| MetaError::io(path.as_str(), e))?;
        debug!(path = %path, "Removed");

        if let Some(propagator) = self.propagator() {
            propagator.rm(&path, access_token).await?;
        }
        Ok(())
    }

    /// Runs one wire request and converts the outcome to a response.
    pub async fn handle(&self, request: Request) -> Response {
        let ctx = RequestContext::from_trace_id(request.trace_id);
        let token = request.access_token.as_str();

        let result = match request.op {
            Operation::Home => self.home(&ctx, token).await.map(|_| Response::Ack),
            Operation::Mkdir { path } => self.mkdir(&ctx, token, &path).await.map(|_| Response::Ack),
            Operation::Stat { path, children } => self
                .stat(&ctx, token, &path, children)
                .await
                .map(|metadata| Response::Metadata { metadata }),
            Operation::Cp { src, dst } => self.cp(&ctx, token, &src, &dst).await.map(|_| Response::Ack),
            Operation::Mv { src, dst } => self.mv(&ctx, token, &src, &dst).await.map(|_| Response::Ack),
            Operation::Rm { path } => self.rm(&ctx, token, &path).await.map(|_| Response::Ack),
        };

        result.unwrap_or_else(|e| Response::Error {
            code: e.code(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use lodge_core::{issue_token, Confinement};
    use lodge_prop::MemoryPropagator;
    use lodge_proto::ErrorCode;
    use tempfile::TempDir;

    use super::*;

    const SECRET: &str = "test-secret";

    struct Fixture {
        dir: TempDir,
        executor: Executor,
        backend: Arc<MemoryPropagator>,
        token: String,
        ctx: RequestContext,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryPropagator::new());
        let executor = Executor::new(
            PathResolver::new(dir.path(), Confinement::Prefix),
            SharedSecret::from(SECRET),
            Some(backend.clone()),
        );
        let identity = Identity::new("hugo", "localhost", "Hugo");
        let token = issue_token(&identity, &SharedSecret::from(SECRET), None).unwrap();

        Fixture {
            dir,
            executor,
            backend,
            token,
            ctx: RequestContext::generate(),
        }
    }

    #[tokio::test]
    async fn test_home_is_idempotent() {
        let f = fixture();
        f.executor.home(&f.ctx, &f.token).await.unwrap();
        f.executor.home(&f.ctx, &f.token).await.unwrap();

        assert!(f.dir.path().join("local/users/h/hugo").is_dir());
        assert!(f.backend.contains("local/users/h/hugo"));
        assert_eq!(f.backend.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthenticated() {
        let f = fixture();
        let err = f.executor.home(&f.ctx, "garbage").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);

        let other = issue_token(
            &Identity::new("hugo", "localhost", "Hugo"),
            &SharedSecret::from("other-secret"),
            None,
        )
        .unwrap();
        let err = f.executor.mkdir(&f.ctx, &other, "local/users/h/hugo/a").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);
    }

    #[tokio::test]
    async fn test_mutations_outside_home_denied() {
        let f = fixture();
        f.executor.home(&f.ctx, &f.token).await.unwrap();

        for path in ["local/users/b/bob/x", "etc", "local/users/h/hugo/../../b/bob/x"] {
            let err = f.executor.mkdir(&f.ctx, &f.token, path).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::PermissionDenied, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_home_is_never_a_target() {
        let f = fixture();
        f.executor.home(&f.ctx, &f.token).await.unwrap();
        let home = "local/users/h/hugo/";

        assert_eq!(
            f.executor.rm(&f.ctx, &f.token, home).await.unwrap_err().code(),
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            f.executor
                .cp(&f.ctx, &f.token, home, "local/users/h/hugo/copy")
                .await
                .unwrap_err()
                .code(),
            ErrorCode::PermissionDenied
        );
        assert!(f.dir.path().join("local/users/h/hugo").is_dir());
    }

    #[tokio::test]
    async fn test_cp_into_itself_rejected() {
        let f = fixture();
        f.executor.home(&f.ctx, &f.token).await.unwrap();
        f.executor.mkdir(&f.ctx, &f.token, "local/users/h/hugo/a").await.unwrap();

        let err = f
            .executor
            .cp(&f.ctx, &f.token, "local/users/h/hugo/a", "local/users/h/hugo/a/b")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert!(!f.dir.path().join("local/users/h/hugo/a/b").exists());
    }

    #[tokio::test]
    async fn test_mv_and_rm_follow_propagation() {
        let f = fixture();
        f.executor.home(&f.ctx, &f.token).await.unwrap();
        f.executor.mkdir(&f.ctx, &f.token, "local/users/h/hugo/a").await.unwrap();
        let id = f.backend.record("local/users/h/hugo/a").unwrap().id;

        f.executor
            .mv(&f.ctx, &f.token, "local/users/h/hugo/a", "local/users/h/hugo/b")
            .await
            .unwrap();
        assert_eq!(f.backend.record("local/users/h/hugo/b").unwrap().id, id);

        f.executor.rm(&f.ctx, &f.token, "local/users/h/hugo/b").await.unwrap();
        assert!(!f.backend.contains("local/users/h/hugo/b"));
        assert!(!f.dir.path().join("local/users/h/hugo/b").exists());
    }

    #[tokio::test]
    async fn test_stat_visibility() {
        let f = fixture();
        f.executor.home(&f.ctx, &f.token).await.unwrap();
        std::fs::create_dir_all(f.dir.path().join("local/users/b/bob/private")).unwrap();
        std::fs::create_dir_all(f.dir.path().join("etc")).unwrap();

        let common = f.executor.stat(&f.ctx, &f.token, "local/users", true).await.unwrap();
        assert!(common.id.is_empty());
        assert_eq!(common.children.len(), 2);

        let foreign = f
            .executor
            .stat(&f.ctx, &f.token, "local/users/b/bob", false)
            .await
            .unwrap();
        assert!(foreign.is_container);
        assert!(!f.backend.contains("local/users/b/bob"));

        let err = f
            .executor
            .stat(&f.ctx, &f.token, "local/users/b/bob", true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);

        let err = f.executor.stat(&f.ctx, &f.token, "etc", false).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_handle_maps_errors() {
        let f = fixture();
        let response = f
            .executor
            .handle(Request::new(
                f.token.clone(),
                Operation::Stat {
                    path: "local/users/h/hugo/missing".into(),
                    children: false,
                },
            ))
            .await;

        match response {
            Response::Error { code, message } => {
                assert_eq!(code, ErrorCode::NotFound);
                assert!(!message.contains(&f.dir.path().display().to_string()));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
