//! Store and session configuration
//!
//! [`StoreConfig`] is plain data, loadable from TOML:
//!
//! ```toml
//! max_sessions = 256
//! lock_timeout_ms = 2000
//! constraint_workers = 4
//! default_isolation = "serializable"
//! ```
//!
//! Missing keys take their defaults. [`SessionConfiguration`] is the per-session
//! builder passed to `Store::begin_session`.

use hyperstore_concurrency::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL, MAX_CAPACITY};
use hyperstore_core::{CancellationToken, Error, IsolationLevel, Result, SessionId, SessionMode, StoreId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of concurrent session lineages
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// Store-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Fixed store id; a random one is generated when absent
    pub store_id: Option<StoreId>,
    /// Capacity of the session index pool
    pub max_sessions: usize,
    /// Lock wait budget in milliseconds
    pub lock_timeout_ms: u64,
    /// Upper bound between two checks of a waiting lock request
    pub lock_poll_interval_ms: u64,
    /// Worker threads for constraint validation; 0 means one per CPU
    pub constraint_workers: usize,
    /// Isolation used when a session does not ask for one
    pub default_isolation: IsolationLevel,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_id: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            lock_poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            constraint_workers: 0,
            default_isolation: IsolationLevel::default(),
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// `Config` if the document is malformed or fails [`validate`](Self::validate).
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&source)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 || self.max_sessions > MAX_CAPACITY {
            return Err(Error::Config(format!(
                "max_sessions must be in 1..={}, got {}",
                MAX_CAPACITY, self.max_sessions
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(Error::Config("lock_timeout_ms must be positive".into()));
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(Error::Config("lock_poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Lock wait budget
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Lock poll interval
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

// ============================================================================
// Session configuration
// ============================================================================

/// Options of one session
///
/// # Example
///
/// ```ignore
/// let cfg = SessionConfiguration::new()
///     .isolation_level(IsolationLevel::Serializable)
///     .mode(SessionMode::SILENT)
///     .default_domain("hr");
/// let session = store.begin_session(cfg)?;
/// ```
///
/// Read-only status, isolation level, session id and cancellation token
/// only apply to a top-level session; nested sessions inherit the lineage's.
#[derive(Debug, Clone, Default)]
pub struct SessionConfiguration {
    pub(crate) read_only: bool,
    pub(crate) isolation: Option<IsolationLevel>,
    pub(crate) mode: SessionMode,
    pub(crate) origin: Option<StoreId>,
    pub(crate) default_domain: Option<String>,
    pub(crate) session_id: Option<SessionId>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl SessionConfiguration {
    /// Writable session with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only session
    pub fn read_only() -> Self {
        Self::default().with_read_only(true)
    }

    /// Set the read-only status
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the isolation level
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    /// Add mode flags
    pub fn mode(mut self, mode: SessionMode) -> Self {
        self.mode |= mode;
        self
    }

    /// Set the origin store id
    pub fn origin(mut self, origin: StoreId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Domain used when an operation does not name one
    pub fn default_domain(mut self, domain: impl Into<String>) -> Self {
        self.default_domain = Some(domain.into());
        self
    }

    /// Use a caller-chosen session id
    pub fn session_id(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }

    /// Attach a cancellation token
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Configured read-only status
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Configured mode flags
    pub fn session_mode(&self) -> SessionMode {
        self.mode
    }
}
