//! Repository write lock: an in-process mutex plus an on-disk lockfile.
//!
//! Every ref mutation, reflog append, and stale-snapshot check runs inside
//! [`RepoLock::with`]. The mutex serializes threads of this process; the
//! exclusively-created lockfile serializes against other processes.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

const LOCK_FILE_NAME: &str = "gitvault.lock";
const MAX_ATTEMPTS: u32 = 100;

/// One shared mutex per canonical repository path, so two `Vault`s opened on
/// the same directory still serialize in-process.
fn mutex_registry() -> &'static Mutex<HashMap<PathBuf, Weak<Mutex<()>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// Removes the lockfile when the critical section ends, including on unwind.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Per-store write lock, constructed once at store open from the canonical
/// repository path.
#[derive(Debug, Clone)]
pub struct RepoLock {
    mutex: Arc<Mutex<()>>,
    lock_path: PathBuf,
}

impl RepoLock {
    pub(crate) fn new(canonical_gitdir: &Path) -> Self {
        let mut registry = mutex_registry()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry.retain(|_, weak| weak.strong_count() > 0);

        let mutex = match registry.get(canonical_gitdir).and_then(Weak::upgrade) {
            Some(existing) => existing,
            None => {
                let fresh = Arc::new(Mutex::new(()));
                registry.insert(canonical_gitdir.to_path_buf(), Arc::downgrade(&fresh));
                fresh
            }
        };

        Self {
            mutex,
            lock_path: canonical_gitdir.join(LOCK_FILE_NAME),
        }
    }

    /// Run `f` with exclusive access to the repository's refs.
    pub fn with<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _thread_guard = self
            .mutex
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _file_guard = self.acquire_lock_file()?;
        f()
    }

    /// Create the lockfile with exclusive-create semantics, retrying with
    /// jittered sleeps while another process holds it.
    fn acquire_lock_file(&self) -> Result<LockFile> {
        for attempt in 0..MAX_ATTEMPTS {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_file) => {
                    return Ok(LockFile {
                        path: self.lock_path.clone(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt == 0 {
                        log::trace!("lockfile {} held, waiting", self.lock_path.display());
                    }
                    let jitter_ms = rand::rng().random_range(10..=30);
                    std::thread::sleep(Duration::from_millis(jitter_ms));
                }
                Err(e) => return Err(Error::io_at(&self.lock_path, e)),
            }
        }

        Err(Error::lock_timeout(format!(
            "gave up after {} attempts on {}",
            MAX_ATTEMPTS,
            self.lock_path.display()
        )))
    }
}
