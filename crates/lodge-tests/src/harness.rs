//! Service harness for integration testing.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lodge_core::{issue_token, Identity, SharedSecret};
use lodge_meta::{Executor, RequestContext, ServiceConfig};
use lodge_pool::{PoolConfig, PoolStatus};
use lodge_prop::{MemoryPropagator, PooledPropagator, Propagator};
use lodge_proto::{read_frame, write_frame, Request, Response};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Result type of harness setup.
pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Secret every harness service signs its tokens with.
pub const TEST_SECRET: &str = "lodge-test-secret";

/// A metadata service over a temporary data root.
pub struct TestService {
    _dir: TempDir,
    /// Effective configuration
    pub config: ServiceConfig,
    /// Operation executor under test
    pub executor: Arc<Executor>,
    /// Records held by the propagation backend
    pub backend: Arc<MemoryPropagator>,
    client: Option<PooledPropagator>,
}

impl TestService {
    /// Creates a service with an in-process memory backend.
    pub fn new() -> TestResult<Self> {
        Self::with_propagator(|backend| backend)
    }

    /// Creates a service with no propagator configured.
    pub fn without_propagation() -> TestResult<Self> {
        Self::build(None, Arc::new(MemoryPropagator::new()), None)
    }

    /// Creates a service whose propagator is built around the memory backend.
    pub fn with_propagator<F>(wrap: F) -> TestResult<Self>
    where
        F: FnOnce(Arc<MemoryPropagator>) -> Arc<dyn Propagator>,
    {
        let backend = Arc::new(MemoryPropagator::new());
        let propagator = wrap(Arc::clone(&backend));
        Self::build(Some(propagator), backend, None)
    }

    /// Creates a service reaching the memory backend over TCP through a
    /// connection pool.
    pub async fn over_tcp(pool: PoolConfig) -> TestResult<Self> {
        let backend = Arc::new(MemoryPropagator::new());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(lodge_prop::serve(listener, backend.clone()));

        let client = PooledPropagator::new(addr.to_string(), pool)?;
        info!(addr = %addr, "Started propagation backend");

        let mut service = Self::build(Some(Arc::new(client.clone())), backend, Some(client))?;
        service.config.prop_addr = Some(addr.to_string());
        Ok(service)
    }

    fn build(
        propagator: Option<Arc<dyn Propagator>>,
        backend: Arc<MemoryPropagator>,
        client: Option<PooledPropagator>,
    ) -> TestResult<Self> {
        let dir = TempDir::new()?;
        let mut config = ServiceConfig::new(dir.path().join("data"), TEST_SECRET);
        config.tmp_dir = dir.path().join("tmp");
        config.validate()?;
        config.create_dirs()?;

        let executor = Arc::new(Executor::from_config(&config, propagator));

        Ok(Self {
            _dir: dir,
            config,
            executor,
            backend,
            client,
        })
    }

    /// Issues a token for `pid`.
    pub fn token(&self, pid: &str) -> String {
        let identity = Identity::new(pid, "localhost", pid);
        issue_token(&identity, &SharedSecret::from(TEST_SECRET), None)
            .expect("test identity is valid")
    }

    /// Returns the logical home of `pid`.
    pub fn home(pid: &str) -> String {
        lodge_core::home(&Identity::new(pid, "localhost", pid)).expect("test pid is valid")
    }

    /// Returns the data root.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Maps a logical path to the physical tree.
    pub fn physical(&self, logical: &str) -> PathBuf {
        self.executor.resolver().to_physical(logical)
    }

    /// Returns a fresh request context.
    pub fn ctx(&self) -> RequestContext {
        RequestContext::generate()
    }

    /// Returns the pooled client when running over TCP.
    pub fn client(&self) -> Option<&PooledPropagator> {
        self.client.as_ref()
    }

    /// Returns the pool counters when running over TCP.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.client.as_ref().map(PooledPropagator::status)
    }

    /// Serves the client protocol on an ephemeral local port.
    pub async fn spawn_server(&self) -> TestResult<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(lodge_meta::serve(listener, Arc::clone(&self.executor)));
        Ok(addr)
    }
}

/// A client connection speaking the framed request protocol.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connects to a served executor.
    pub async fn connect(addr: SocketAddr) -> TestResult<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    /// Sends one request and waits for the response.
    pub async fn call(&mut self, request: &Request) -> TestResult<Response> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| "connection closed".into())
    }
}
