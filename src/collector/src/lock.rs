//! Run exclusion: at most one collection run per environment scope.
//!
//! Two overlapping runs could tombstone and sweep the same artifacts from
//! different corpora. The orchestrator acquires a [`RunLock`] before building
//! the corpus and holds the returned guard until the report is produced.

use crate::error::{GcError, GcResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Held lock. The lock is released when the guard is dropped.
pub struct RunGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RunGuard {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

pub trait RunLock: Send + Sync {
    /// Acquire the lock for `scope`, failing with [`GcError::LockHeld`] when
    /// another run holds it.
    fn acquire(&self, scope: &str) -> GcResult<RunGuard>;
}

/// No exclusion. Callers guarantee a single run themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRunLock;

impl RunLock for NoopRunLock {
    fn acquire(&self, _scope: &str) -> GcResult<RunGuard> {
        Ok(RunGuard::noop())
    }
}

/// Exclusion between runs sharing this value within one process.
#[derive(Debug, Default, Clone)]
pub struct InProcessRunLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InProcessRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, scope: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(scope)
    }
}

impl RunLock for InProcessRunLock {
    fn acquire(&self, scope: &str) -> GcResult<RunGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(scope.to_string()) {
            return Err(GcError::LockHeld {
                scope: scope.to_string(),
            });
        }

        let set = Arc::clone(&self.held);
        let scope = scope.to_string();
        Ok(RunGuard::new(move || {
            set.lock().unwrap_or_else(|e| e.into_inner()).remove(&scope);
        }))
    }
}

/// Contents written to a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFileMeta {
    pub scope: String,
    pub pid: u32,
    pub started_at_ms: i64,
}

/// Exclusion across processes through an exclusively created lock file.
///
/// A crashed run leaves its file behind; it has to be removed by hand.
#[derive(Debug, Clone)]
pub struct FileRunLock {
    path: PathBuf,
}

impl FileRunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata of the run currently holding the lock, if any.
    pub fn holder(&self) -> Option<LockFileMeta> {
        let bytes = fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

fn open_new_lock_file(path: &Path) -> io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true).mode(0o600);
        options.open(path)
    }
    #[cfg(not(unix))]
    {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
    }
}

impl RunLock for FileRunLock {
    fn acquire(&self, scope: &str) -> GcResult<RunGuard> {
        let lock_error = |source: io::Error| GcError::Lock {
            scope: scope.to_string(),
            source,
        };

        let mut file = match open_new_lock_file(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if let Some(holder) = self.holder() {
                    tracing::warn!(
                        path = %self.path.display(),
                        holder_scope = %holder.scope,
                        holder_pid = holder.pid,
                        "Run lock already held"
                    );
                }
                return Err(GcError::LockHeld {
                    scope: scope.to_string(),
                });
            }
            Err(e) => return Err(lock_error(e)),
        };

        let meta = LockFileMeta {
            scope: scope.to_string(),
            pid: std::process::id(),
            started_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        let written = serde_json::to_writer(&mut file, &meta)
            .map_err(io::Error::from)
            .and_then(|()| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&self.path);
            return Err(lock_error(e));
        }

        tracing::debug!(path = %self.path.display(), scope = %scope, "Acquired run lock");

        let path = self.path.clone();
        Ok(RunGuard::new(move || {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove run lock file");
            }
        }))
    }
}
