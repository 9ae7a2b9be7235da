//! Service configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `LODGE_*` environment variables. The daemon applies its command
//! line flags last.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use lodge_core::{Confinement, PathResolver, SharedSecret};
use lodge_pool::{ExhaustionPolicy, PoolConfig};
use thiserror::Error;

/// Default listen port of the metadata service.
pub const DEFAULT_PORT: u16 = 57001;

/// Root of the physical tree.
pub const ENV_DATA_DIR: &str = "LODGE_DATADIR";
/// Scratch directory.
pub const ENV_TMP_DIR: &str = "LODGE_TMPDIR";
/// Listen port.
pub const ENV_PORT: &str = "LODGE_PORT";
/// Propagation service address (`host:port`).
pub const ENV_PROP: &str = "LODGE_PROP";
/// Pool ceiling on leased connections.
pub const ENV_PROP_MAX_ACTIVE: &str = "LODGE_PROP_MAXACTIVE";
/// Pool ceiling on idle connections.
pub const ENV_PROP_MAX_IDLE: &str = "LODGE_PROP_MAXIDLE";
/// Pool ceiling on concurrent connection opens.
pub const ENV_PROP_MAX_CONCURRENCY: &str = "LODGE_PROP_MAXCONCURRENCY";
/// Whether `acquire` waits when the pool is exhausted.
pub const ENV_PROP_WAIT: &str = "LODGE_PROP_WAIT";
/// Token signing secret.
pub const ENV_SHARED_SECRET: &str = "LODGE_SHAREDSECRET";
/// Home confinement mode (`prefix` or `strict`).
pub const ENV_CONFINEMENT: &str = "LODGE_CONFINEMENT";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting has an unusable value
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Setting name
        key: String,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Settings of one metadata service instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of the physical tree
    pub data_dir: PathBuf,
    /// Scratch directory, created at startup
    pub tmp_dir: PathBuf,
    /// Client listen address
    pub listen_addr: SocketAddr,
    /// Propagation service address; `None` disables propagation
    pub prop_addr: Option<String>,
    /// Propagation connection pool limits
    pub pool: PoolConfig,
    /// Token signing secret
    pub shared_secret: SharedSecret,
    /// Home confinement mode
    pub confinement: Confinement,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/lodge/data"),
            tmp_dir: PathBuf::from("/var/lib/lodge/tmp"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            prop_addr: None,
            pool: PoolConfig::default(),
            shared_secret: SharedSecret::new(Vec::new()),
            confinement: Confinement::default(),
        }
    }
}

impl ServiceConfig {
    /// Creates a config rooted at `data_dir` with a sibling `tmp` directory.
    pub fn new(data_dir: impl Into<PathBuf>, shared_secret: impl Into<SharedSecret>) -> Self {
        let data_dir = data_dir.into();
        let tmp_dir = data_dir
            .parent()
            .map(|p| p.join("tmp"))
            .unwrap_or_else(|| PathBuf::from("tmp"));

        Self {
            data_dir,
            tmp_dir,
            shared_secret: shared_secret.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_lookup(|key| std::env::var(key).ok())
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::default().apply_toml(&content)
    }

    /// Applies the sections of a TOML document.
    ///
    /// ```toml
    /// [storage]
    /// data_dir = "/srv/lodge/data"
    /// tmp_dir = "/srv/lodge/tmp"
    ///
    /// [server]
    /// listen = "0.0.0.0:57001"
    /// shared_secret = "..."
    /// confinement = "prefix"
    ///
    /// [propagation]
    /// addr = "127.0.0.1:57003"
    /// max_active = 32
    /// max_idle = 8
    /// max_concurrency = 4
    /// wait = false
    /// ```
    pub fn apply_toml(mut self, content: &str) -> Result<Self, ConfigError> {
        let doc: toml::Table = content.parse()?;

        if let Some(storage) = doc.get("storage") {
            if let Some(dir) = storage.get("data_dir").and_then(|v| v.as_str()) {
                self.data_dir = PathBuf::from(dir);
            }
            if let Some(dir) = storage.get("tmp_dir").and_then(|v| v.as_str()) {
                self.tmp_dir = PathBuf::from(dir);
            }
        }

        if let Some(server) = doc.get("server") {
            if let Some(listen) = server.get("listen").and_then(|v| v.as_str()) {
                self.listen_addr = listen
                    .parse()
                    .map_err(|_| ConfigError::invalid("server.listen", "not a socket address"))?;
            }
            if let Some(secret) = server.get("shared_secret").and_then(|v| v.as_str()) {
                self.shared_secret = SharedSecret::from(secret);
            }
            if let Some(mode) = server.get("confinement").and_then(|v| v.as_str()) {
                self.confinement = parse_confinement("server.confinement", mode)?;
            }
        }

        if let Some(prop) = doc.get("propagation") {
            if let Some(addr) = prop.get("addr").and_then(|v| v.as_str()) {
                self.prop_addr = non_empty(addr);
            }
            if let Some(n) = prop.get("max_active").and_then(|v| v.as_integer()) {
                self.pool.max_active = to_count("propagation.max_active", n)?;
            }
            if let Some(n) = prop.get("max_idle").and_then(|v| v.as_integer()) {
                self.pool.max_idle = to_count("propagation.max_idle", n)?;
            }
            if let Some(n) = prop.get("max_concurrency").and_then(|v| v.as_integer()) {
                self.pool.max_concurrent_opens = to_count("propagation.max_concurrency", n)?;
            }
            if let Some(wait) = prop.get("wait").and_then(|v| v.as_bool()) {
                self.pool.exhaustion = exhaustion(wait);
            }
        }

        Ok(self)
    }

    /// Applies `LODGE_*` settings found through `lookup`.
    ///
    /// Empty values are treated as unset.
    pub fn apply_lookup<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(ENV_TMP_DIR) {
            self.tmp_dir = PathBuf::from(dir);
        }
        if let Some(port) = get(ENV_PORT) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_PORT, "not a port number"))?;
            self.listen_addr.set_port(port);
        }
        if let Some(addr) = get(ENV_PROP) {
            self.prop_addr = non_empty(&addr);
        }
        if let Some(n) = get(ENV_PROP_MAX_ACTIVE) {
            self.pool.max_active = parse_count(ENV_PROP_MAX_ACTIVE, &n)?;
        }
        if let Some(n) = get(ENV_PROP_MAX_IDLE) {
            self.pool.max_idle = parse_count(ENV_PROP_MAX_IDLE, &n)?;
        }
        if let Some(n) = get(ENV_PROP_MAX_CONCURRENCY) {
            self.pool.max_concurrent_opens = parse_count(ENV_PROP_MAX_CONCURRENCY, &n)?;
        }
        if let Some(wait) = get(ENV_PROP_WAIT) {
            self.pool.exhaustion = exhaustion(parse_bool(ENV_PROP_WAIT, &wait)?);
        }
        if let Some(secret) = get(ENV_SHARED_SECRET) {
            self.shared_secret = SharedSecret::from(secret);
        }
        if let Some(mode) = get(ENV_CONFINEMENT) {
            self.confinement = parse_confinement(ENV_CONFINEMENT, &mode)?;
        }

        Ok(self)
    }

    /// Applies the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    /// Rejects settings the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid(ENV_DATA_DIR, "must not be empty"));
        }
        if self.tmp_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid(ENV_TMP_DIR, "must not be empty"));
        }
        if self.shared_secret.is_empty() {
            return Err(ConfigError::invalid(ENV_SHARED_SECRET, "must not be empty"));
        }
        self.pool
            .validate()
            .map_err(|e| ConfigError::invalid("propagation pool", e.to_string()))?;
        Ok(())
    }

    /// Creates the data and tmp directories.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.tmp_dir)?;
        Ok(())
    }

    /// Builds the path resolver for this data root.
    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(self.data_dir.clone(), self.confinement)
    }

    /// Returns a printable view with the secret masked.
    pub fn display(&self) -> ConfigDisplay<'_> {
        ConfigDisplay(self)
    }
}

/// Printable settings, see [`ServiceConfig::display`].
pub struct ConfigDisplay<'a>(&'a ServiceConfig);

impl fmt::Display for ConfigDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.0;
        let secret = if c.shared_secret.is_empty() {
            "(unset)"
        } else {
            "******"
        };
        let wait = c.pool.exhaustion == ExhaustionPolicy::Wait;

        writeln!(f, "{}={}", ENV_DATA_DIR, c.data_dir.display())?;
        writeln!(f, "{}={}", ENV_TMP_DIR, c.tmp_dir.display())?;
        writeln!(f, "{}={}", ENV_PORT, c.listen_addr.port())?;
        writeln!(f, "{}={}", ENV_PROP, c.prop_addr.as_deref().unwrap_or(""))?;
        writeln!(f, "{}={}", ENV_PROP_MAX_ACTIVE, c.pool.max_active)?;
        writeln!(f, "{}={}", ENV_PROP_MAX_IDLE, c.pool.max_idle)?;
        writeln!(f, "{}={}", ENV_PROP_MAX_CONCURRENCY, c.pool.max_concurrent_opens)?;
        writeln!(f, "{}={}", ENV_PROP_WAIT, wait)?;
        writeln!(f, "{}={}", ENV_CONFINEMENT, c.confinement)?;
        write!(f, "{}={}", ENV_SHARED_SECRET, secret)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn exhaustion(wait: bool) -> ExhaustionPolicy {
    if wait {
        ExhaustionPolicy::Wait
    } else {
        ExhaustionPolicy::Fail
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("{:?} is not a count", value)))
}

fn to_count(key: &str, value: i64) -> Result<usize, ConfigError> {
    usize::try_from(value).map_err(|_| ConfigError::invalid(key, "must not be negative"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("{:?} is not a boolean", value))),
    }
}

fn parse_confinement(key: &str, value: &str) -> Result<Confinement, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("{:?} is not prefix or strict", value)))
}
