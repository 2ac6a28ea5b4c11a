//! Per-cluster run exclusion
//!
//! `RunLocks` serializes runs inside one process; `LockFile` extends that
//! across processes sharing a lock directory.

use crate::error::{ProvisionError, ProvisionResult};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// In-process lock table keyed by cluster name
#[derive(Clone, Default)]
pub struct RunLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `cluster_name`, failing if a run already holds it
    pub fn try_acquire(&self, cluster_name: &str) -> ProvisionResult<RunGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(cluster_name.to_string()) {
            return Err(ProvisionError::RunInProgress(cluster_name.to_string()));
        }

        debug!(cluster = %cluster_name, "Run lock acquired");
        Ok(RunGuard {
            held: self.held.clone(),
            cluster_name: cluster_name.to_string(),
        })
    }
}

/// Releases its cluster name when dropped
pub struct RunGuard {
    held: Arc<Mutex<HashSet<String>>>,
    cluster_name: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.cluster_name);
        debug!(cluster = %self.cluster_name, "Run lock released");
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock file {0} exists; another run for this cluster may be in progress")]
    Held(PathBuf),

    #[error("Cluster name {0:?} cannot be used as a lock file name")]
    InvalidName(String),

    #[error("Lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive lock file, removed on drop
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Create `<dir>/<cluster_name>.lock`, failing if it already exists
    pub fn acquire(dir: &Path, cluster_name: &str) -> Result<Self, LockError> {
        if !is_plain_file_name(cluster_name) {
            return Err(LockError::InvalidName(cluster_name.to_string()));
        }

        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.lock", cluster_name));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LockError::Held(path));
            }
            Err(e) => return Err(e.into()),
        };

        // From here on the file is ours; dropping the guard removes it if the
        // header cannot be written
        let lock = Self { path };
        writeln!(file, "pid={}", std::process::id())?;
        writeln!(file, "acquired_at={}", chrono::Utc::now().to_rfc3339())?;

        debug!(path = %lock.path.display(), "Lock file acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A single path component that cannot climb out of the lock directory
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}
