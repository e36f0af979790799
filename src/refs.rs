//! Dictionary-style access to branches and tags.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::store::VaultInner;
use crate::types::ReflogEntry;

/// Annotated tags are peeled through at most this many hops.
const MAX_TAG_PEEL: usize = 50;

/// Which ref namespace a [`RefMap`] covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    fn prefix(self) -> &'static str {
        match self {
            RefKind::Branch => "refs/heads/",
            RefKind::Tag => "refs/tags/",
        }
    }
}

/// Name-keyed access to one ref namespace.
///
/// [`Vault::branches`](crate::Vault::branches) snapshots are writable;
/// [`Vault::tags`](crate::Vault::tags) snapshots are read-only, and setting
/// an existing tag fails rather than moving it.
#[derive(Clone)]
pub struct RefMap {
    inner: Arc<VaultInner>,
    kind: RefKind,
}

impl RefMap {
    pub(crate) fn new(inner: Arc<VaultInner>, kind: RefKind) -> Self {
        Self { inner, kind }
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}{}", self.kind.prefix(), name)
    }

    /// The snapshot the named ref points at.
    ///
    /// Tags peel through annotated-tag objects to the underlying commit.
    pub fn get(&self, name: &str) -> Result<Snapshot> {
        let refname = self.full_name(name);
        let commit_oid = self.inner.with_repo(|repo| {
            let reference = repo
                .find_reference(&refname)
                .map_err(|_| Error::key_not_found(name))?;
            let target = reference
                .target()
                .ok_or_else(|| Error::key_not_found(name))?;
            peel_to_commit(repo, target, name)
        })?;

        Snapshot::from_commit(
            Arc::clone(&self.inner),
            commit_oid,
            Some(name.to_string()),
            self.kind == RefKind::Branch,
        )
    }

    /// Point the named ref at `snapshot`'s commit.
    ///
    /// Branches force-update (the reflog records the movement); setting a
    /// tag that already exists fails with [`Error::AlreadyExists`].
    pub fn set(&self, name: &str, snapshot: &Snapshot) -> Result<()> {
        crate::path::validate_ref_name(name)?;
        if !Arc::ptr_eq(&self.inner, &snapshot.inner) && self.inner.path != snapshot.inner.path {
            return Err(Error::invalid_path(
                "snapshot belongs to a different store",
            ));
        }

        let refname = self.full_name(name);
        let target = snapshot.commit_oid;
        let subject = snapshot
            .message()
            .unwrap_or_default()
            .lines()
            .next()
            .unwrap_or("")
            .to_string();
        let kind = self.kind;

        self.inner.lock.with(|| {
            self.inner.with_repo(|repo| {
                let exists = repo.find_reference(&refname).is_ok();
                if exists && kind == RefKind::Tag {
                    return Err(Error::already_exists(name));
                }
                let log_message = if exists {
                    format!("branch: set to {}", subject)
                } else {
                    format!("branch: Created from {}", subject)
                };
                repo.reference(&refname, target, true, &log_message)
                    .map_err(Error::store)?;
                Ok(())
            })
        })
    }

    /// [`set`](Self::set) followed by [`get`](Self::get).
    pub fn set_and_get(&self, name: &str, snapshot: &Snapshot) -> Result<Snapshot> {
        self.set(name, snapshot)?;
        self.get(name)
    }

    /// Delete the named ref.
    pub fn delete(&self, name: &str) -> Result<()> {
        let refname = self.full_name(name);
        self.inner.lock.with(|| {
            self.inner.with_repo(|repo| {
                let mut reference = repo
                    .find_reference(&refname)
                    .map_err(|_| Error::key_not_found(name))?;
                reference.delete().map_err(Error::store)
            })
        })
    }

    /// Whether the named ref exists.
    pub fn contains(&self, name: &str) -> Result<bool> {
        let refname = self.full_name(name);
        self.inner
            .with_repo(|repo| Ok(repo.find_reference(&refname).is_ok()))
    }

    /// Sorted short names of every ref in this namespace.
    pub fn list(&self) -> Result<Vec<String>> {
        let prefix = self.kind.prefix();
        let mut names = self.inner.with_repo(|repo| {
            let refs = repo.references().map_err(Error::store)?;
            let mut names = Vec::new();
            for reference in refs.flatten() {
                if let Some(short) = reference.name().and_then(|n| n.strip_prefix(prefix)) {
                    names.push(short.to_string());
                }
            }
            Ok(names)
        })?;
        names.sort();
        Ok(names)
    }

    /// `(name, snapshot)` pairs for every ref in this namespace, sorted by
    /// name.
    pub fn entries(&self) -> Result<Vec<(String, Snapshot)>> {
        let mut out = Vec::new();
        for name in self.list()? {
            let snapshot = self.get(&name)?;
            out.push((name, snapshot));
        }
        Ok(out)
    }

    /// Short name of the branch `HEAD` points at, even when that branch no
    /// longer resolves. Only branches appear here; on a tag map this is
    /// always `None`.
    pub fn current_name(&self) -> Result<Option<String>> {
        let prefix = self.kind.prefix();
        self.inner.with_repo(|repo| {
            let head = match repo.find_reference("HEAD") {
                Ok(head) => head,
                Err(_) => return Ok(None),
            };
            Ok(head
                .symbolic_target()
                .and_then(|target| target.strip_prefix(prefix))
                .map(|s| s.to_string()))
        })
    }

    /// The snapshot of the current branch, or `None` when `HEAD` is
    /// detached or dangling.
    pub fn current(&self) -> Result<Option<Snapshot>> {
        match self.current_name()? {
            None => Ok(None),
            Some(name) => match self.get(&name) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(Error::KeyNotFound(_)) => Ok(None),
                Err(other) => Err(other),
            },
        }
    }

    /// Point `HEAD` at the named branch, which must exist.
    pub fn set_current(&self, name: &str) -> Result<()> {
        if self.kind != RefKind::Branch {
            return Err(Error::permission_denied("HEAD can only point at branches"));
        }
        let refname = self.full_name(name);
        self.inner.lock.with(|| {
            self.inner.with_repo(|repo| {
                if repo.find_reference(&refname).is_err() {
                    return Err(Error::key_not_found(name));
                }
                repo.set_head(&refname).map_err(Error::store)
            })
        })
    }

    /// Reflog entries for the named ref, newest first.
    pub fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        crate::reflog::read_reflog(&self.inner.path, &self.full_name(name))
    }
}

impl std::fmt::Debug for RefMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefMap")
            .field("prefix", &self.kind.prefix())
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Follow annotated-tag objects until a commit appears.
pub(crate) fn peel_to_commit(
    repo: &git2::Repository,
    oid: git2::Oid,
    name: &str,
) -> Result<git2::Oid> {
    let mut current = oid;
    for _ in 0..MAX_TAG_PEEL {
        let object = repo
            .find_object(current, None)
            .map_err(|_| Error::key_not_found(name))?;
        match object.kind() {
            Some(git2::ObjectType::Commit) => return Ok(current),
            Some(git2::ObjectType::Tag) => {
                let tag = repo.find_tag(current).map_err(Error::store)?;
                current = tag.target_id();
            }
            _ => {
                return Err(Error::store_msg(format!(
                    "ref {:?} does not peel to a commit",
                    name
                )))
            }
        }
    }
    Err(Error::store_msg(format!(
        "tag {:?} peel exceeded {} hops",
        name, MAX_TAG_PEEL
    )))
}
