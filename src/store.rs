use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::lock::RepoLock;
use crate::mirror::{self, BackupOptions, RestoreOptions};
use crate::notes::Notes;
use crate::refs::{RefKind, RefMap};
use crate::snapshot::Snapshot;
use crate::types::{MirrorDiff, OpenOptions, Signature};

/// State shared by every handle derived from one `Vault`.
pub(crate) struct VaultInner {
    pub(crate) repo: Mutex<git2::Repository>,
    /// Canonical path of the bare repository.
    pub(crate) path: PathBuf,
    pub(crate) signature: Signature,
    pub(crate) lock: RepoLock,
}

impl VaultInner {
    /// Lock the repository handle and run `f` with it.
    pub(crate) fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&git2::Repository) -> Result<T>,
    {
        let repo = self
            .repo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&repo)
    }
}

impl std::fmt::Debug for VaultInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultInner")
            .field("path", &self.path)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A versioned filesystem backed by a bare git repository.
///
/// Cheap to clone; all handles derived from a `Vault` (snapshots, ref maps,
/// notes) share the same underlying repository and write lock.
#[derive(Clone, Debug)]
pub struct Vault {
    pub(crate) inner: Arc<VaultInner>,
}

impl Vault {
    /// Open (or, with `options.create`, initialize) a bare repository.
    ///
    /// Opening always enables reflog recording
    /// (`core.logAllRefUpdates = always`) and writes the store signature
    /// into the repository config, so undo/redo have a complete journal no
    /// matter which tool touches the refs.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the repository does not exist and
    /// `options.create` is false.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();

        let signature = Signature {
            name: options.author.unwrap_or_else(|| "gitvault".into()),
            email: options.email.unwrap_or_else(|| "gitvault@localhost".into()),
        };

        let (repo, created) = if path.exists() {
            (git2::Repository::open_bare(path).map_err(Error::store)?, false)
        } else if options.create {
            std::fs::create_dir_all(path).map_err(|e| Error::io_at(path, e))?;
            (git2::Repository::init_bare(path).map_err(Error::store)?, true)
        } else {
            return Err(Error::not_found(format!(
                "repository not found: {}",
                path.display()
            )));
        };

        let mut config = repo.config().map_err(Error::store)?;
        config
            .set_str("core.logAllRefUpdates", "always")
            .map_err(Error::store)?;
        config
            .set_str("user.name", &signature.name)
            .map_err(Error::store)?;
        config
            .set_str("user.email", &signature.email)
            .map_err(Error::store)?;

        if created {
            if let Some(ref branch) = options.branch {
                crate::path::validate_ref_name(branch)?;
                init_branch(&repo, branch, &signature)?;
            }
        }

        let canonical = std::fs::canonicalize(path).map_err(|e| Error::io_at(path, e))?;
        let lock = RepoLock::new(&canonical);

        Ok(Vault {
            inner: Arc::new(VaultInner {
                repo: Mutex::new(repo),
                path: canonical,
                signature,
                lock,
            }),
        })
    }

    /// Canonical path of the bare repository.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Signature used for commits that do not override it.
    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    /// Branch map over `refs/heads/`. Snapshots obtained here are writable.
    pub fn branches(&self) -> RefMap {
        RefMap::new(Arc::clone(&self.inner), RefKind::Branch)
    }

    /// Tag map over `refs/tags/`. Snapshots obtained here are read-only.
    pub fn tags(&self) -> RefMap {
        RefMap::new(Arc::clone(&self.inner), RefKind::Tag)
    }

    /// Git-notes access (`refs/notes/*` namespaces).
    pub fn notes(&self) -> Notes {
        Notes::new(Arc::clone(&self.inner))
    }

    /// A detached, read-only snapshot of the commit named by `hash`.
    pub fn snapshot(&self, hash: &str) -> Result<Snapshot> {
        let oid = git2::Oid::from_str(hash)
            .map_err(|e| Error::store_msg(format!("invalid commit hash {:?}: {}", hash, e)))?;
        Snapshot::from_commit(Arc::clone(&self.inner), oid, None, false)
    }

    /// Push this store's refs to `dest` (repository URL/path, or a
    /// `.bundle` file).
    ///
    /// Without a ref filter this is a full mirror and deletes
    /// destination-only refs; with `opts.refs` only the named refs move and
    /// nothing is deleted.
    pub fn backup(&self, dest: &str, opts: &BackupOptions) -> Result<MirrorDiff> {
        mirror::backup(&self.inner.path, dest, opts)
    }

    /// Fetch refs from `src` (repository URL/path, or a `.bundle` file).
    ///
    /// Restore is always additive: local-only refs survive and `HEAD` is
    /// untouched. Use [`RefMap::set_current`] afterwards to move `HEAD`.
    pub fn restore(&self, src: &str, opts: &RestoreOptions) -> Result<MirrorDiff> {
        mirror::restore(&self.inner.path, src, opts)
    }
}

/// Write the initial empty-tree commit and point the branch and `HEAD` at it.
fn init_branch(repo: &git2::Repository, branch: &str, signature: &Signature) -> Result<()> {
    let builder = repo.treebuilder(None).map_err(Error::store)?;
    let tree_oid = builder.write().map_err(Error::store)?;
    let tree = repo.find_tree(tree_oid).map_err(Error::store)?;

    let who = git2::Signature::now(&signature.name, &signature.email).map_err(Error::store)?;
    let message = format!("Initialize {}", branch);
    let commit_oid = repo
        .commit(None, &who, &who, &message, &tree, &[])
        .map_err(Error::store)?;

    let refname = format!("refs/heads/{}", branch);
    repo.reference(&refname, commit_oid, false, &format!("commit: {}", message))
        .map_err(Error::store)?;
    repo.set_head(&refname).map_err(Error::store)?;

    log::debug!("initialized branch {} at {}", branch, commit_oid);
    Ok(())
}
