//! Extension points a replication backend implements.
//!
//! Databases are opened through a backend selected by name. The backend owns
//! the storage the engine writes to, is told which connection leads WAL
//! replication for a database, and shares a [`WalFile`] whose transaction
//! refcount tells it whether a write epoch is open.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

const REPLICATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::replication");

/// Errors reported by replication backends.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The backend refused to install the leader hook.
    #[error("backend '{backend}' rejected leader registration for '{database}': {message}")]
    LeaderRejected {
        backend: String,
        database: String,
        message: String,
    },
    /// The database name cannot be mapped onto the backend's storage.
    #[error("invalid database name '{database}': {reason}")]
    InvalidName {
        database: String,
        reason: &'static str,
    },
    /// Backend state is unusable.
    #[error("replication backend state is poisoned")]
    Poisoned,
}

/// Replication-aware view of a database's main file.
///
/// `tx_refcount` is raised by `begin` and lowered by `commit` and
/// `rollback`. A non-zero value means a write transaction is open.
#[derive(Debug, Default)]
pub struct WalFile {
    tx_refcount: AtomicI64,
}

impl WalFile {
    /// Creates a file object with no open transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of open write transactions.
    #[must_use]
    pub fn tx_refcount(&self) -> i64 {
        self.tx_refcount.load(Ordering::SeqCst)
    }

    /// Applies `delta` to the refcount, returning the new value.
    pub fn update_tx_refcount(&self, delta: i64) -> i64 {
        self.tx_refcount.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

/// A replication backend registered under a name.
pub trait Replication: Send + Sync {
    /// Name clients pass when opening a database.
    fn name(&self) -> &str;

    /// SQLite VFS routing main-file I/O through the backend, or `None` for
    /// the engine default.
    fn vfs(&self) -> Option<&str>;

    /// Path handed to the engine when opening `database`.
    ///
    /// Fails when `database` does not name a file the backend owns.
    fn resolve(&self, database: &str) -> Result<PathBuf, ReplicationError>;

    /// Installs `conn` as the WAL replication leader for `database`.
    fn register_leader(
        &self,
        conn: &rusqlite::Connection,
        database: &str,
    ) -> Result<(), ReplicationError>;

    /// Removes the leader hook installed for `database`.
    fn unregister_leader(&self, database: &str);

    /// File object shared by every connection on `database`.
    fn file(&self, database: &str) -> Arc<WalFile>;
}

/// Backends available to the gateway, keyed by name.
#[derive(Default, Clone)]
pub struct ReplicationRegistry {
    backends: HashMap<String, Arc<dyn Replication>>,
}

impl ReplicationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` under its own name, replacing any previous entry.
    pub fn register(&mut self, backend: Arc<dyn Replication>) {
        debug!(
            target: REPLICATION_TARGET,
            backend = backend.name(),
            "registered replication backend"
        );
        self.backends.insert(backend.name().to_owned(), backend);
    }

    /// Looks up a backend by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Replication>> {
        self.backends.get(name).cloned()
    }

    /// Registered backend names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ReplicationRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReplicationRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

/// Single-node backend storing database files in a local directory.
///
/// It uses the engine's default VFS and tracks the write-transaction
/// refcount locally; there are no followers to ship frames to. Database
/// names are plain relative paths below the root: absolute paths, `..`
/// components and `file:` URIs are refused.
#[derive(Debug)]
pub struct LocalReplication {
    name: String,
    root: PathBuf,
    files: Mutex<HashMap<String, Arc<WalFile>>>,
    leaders: Mutex<HashMap<String, usize>>,
}

impl LocalReplication {
    /// Creates a backend named `name` rooted at `root`.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
            files: Mutex::new(HashMap::new()),
            leaders: Mutex::new(HashMap::new()),
        }
    }

    /// Number of connections currently leading `database`.
    #[must_use]
    pub fn leader_count(&self, database: &str) -> usize {
        self.leaders
            .lock()
            .map(|leaders| leaders.get(database).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of databases with a live file object.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    fn forget_file(&self, database: &str) {
        if let Ok(mut files) = self.files.lock()
            && files
                .get(database)
                .is_some_and(|file| file.tx_refcount() == 0)
        {
            files.remove(database);
        }
    }
}

fn check_database_name(database: &str) -> Result<(), &'static str> {
    if database.is_empty() {
        return Err("name is empty");
    }
    if database
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("file:"))
    {
        return Err("URI names are not supported");
    }
    let path = Path::new(database);
    if path.is_absolute() || database.starts_with('/') {
        return Err("name must be relative");
    }
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err("name must stay inside the data directory");
    }
    Ok(())
}

impl Replication for LocalReplication {
    fn name(&self) -> &str {
        &self.name
    }

    fn vfs(&self) -> Option<&str> {
        None
    }

    fn resolve(&self, database: &str) -> Result<PathBuf, ReplicationError> {
        check_database_name(database).map_err(|reason| ReplicationError::InvalidName {
            database: database.to_owned(),
            reason,
        })?;
        Ok(self.root.join(database))
    }

    fn register_leader(
        &self,
        _conn: &rusqlite::Connection,
        database: &str,
    ) -> Result<(), ReplicationError> {
        let mut leaders = self
            .leaders
            .lock()
            .map_err(|_| ReplicationError::Poisoned)?;
        *leaders.entry(database.to_owned()).or_insert(0) += 1;
        Ok(())
    }

    fn unregister_leader(&self, database: &str) {
        let last = match self.leaders.lock() {
            Ok(mut leaders) => match leaders.get_mut(database) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    leaders.remove(database);
                    true
                }
                None => false,
            },
            Err(_) => false,
        };
        if last {
            self.forget_file(database);
        }
    }

    fn file(&self, database: &str) -> Arc<WalFile> {
        match self.files.lock() {
            Ok(mut files) => Arc::clone(files.entry(database.to_owned()).or_default()),
            // A poisoned map still hands out a usable, unshared file object.
            Err(_) => Arc::new(WalFile::new()),
        }
    }
}

/// A cluster member advertised to clients.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerInfo {
    /// Stable member ID.
    pub id: u64,
    /// Address clients connect to.
    pub address: String,
}

/// Cluster membership as seen by this server.
pub trait Cluster: Send + Sync {
    /// Address of the current leader.
    fn leader(&self) -> String;

    /// Every known member.
    fn servers(&self) -> Vec<ServerInfo>;
}

/// Membership of a single-node deployment: this server leads itself.
#[derive(Debug, Clone)]
pub struct StaticCluster {
    me: ServerInfo,
}

impl StaticCluster {
    /// Creates a one-member cluster at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            me: ServerInfo {
                id: 1,
                address: address.into(),
            },
        }
    }
}

impl Cluster for StaticCluster {
    fn leader(&self) -> String {
        self.me.address.clone()
    }

    fn servers(&self) -> Vec<ServerInfo> {
        vec![self.me.clone()]
    }
}
