//! Immutable snapshots of committed trees, and the commit protocol that
//! turns staged changes into new snapshots.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::reflog::ZERO_SHA;
use crate::store::{Vault, VaultInner};
use crate::tree::{self, Change, PendingWrite};
use crate::types::{
    ChangeReport, CommitInfo, DirListing, FileChange, FileType, StatResult, TreeItem,
    WriteValue, MODE_DIR, MODE_FILE, MODE_SYMLINK,
};

// ---------------------------------------------------------------------------
// Option structs
// ---------------------------------------------------------------------------

/// Options for the single-path write family.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Commit message; auto-generated when `None`. May contain the
    /// placeholders `{default}`, `{operation}`, `{add_count}`,
    /// `{update_count}`, `{delete_count}`, `{total}`.
    pub message: Option<String>,
    /// Filemode override; detected or defaulted when `None`.
    pub mode: Option<u32>,
}

/// Options for [`Snapshot::apply`].
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Commit message; auto-generated when `None`.
    pub message: Option<String>,
    /// Operation label used in auto-generated messages (default `"apply"`).
    pub operation: Option<String>,
}

/// Options for [`Snapshot::remove`].
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Allow removing directories and their contents.
    pub recursive: bool,
    /// Classify only; do not commit.
    pub dry_run: bool,
    pub message: Option<String>,
}

/// Options for [`Snapshot::move_paths`].
#[derive(Debug, Clone, Default)]
pub struct MoveOptions {
    /// Allow moving directories and their contents.
    pub recursive: bool,
    /// Classify only; do not commit.
    pub dry_run: bool,
    pub message: Option<String>,
}

/// Options for [`Snapshot::copy_from_ref`].
#[derive(Debug, Clone, Default)]
pub struct CopyFromRefOptions {
    /// Remove destination files absent from the source (sync semantics).
    pub delete: bool,
    /// Classify only; do not commit.
    pub dry_run: bool,
    pub message: Option<String>,
}

/// Options for [`Snapshot::log`].
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Stop after this many entries.
    pub limit: Option<usize>,
    /// Skip this many matching entries first.
    pub skip: Option<usize>,
    /// Only commits where the entry at this path differs from the parent's.
    pub path: Option<String>,
    /// Only commits whose message matches this glob pattern.
    pub match_pattern: Option<String>,
    /// Only commits with committer time at or before this epoch second.
    pub before: Option<u64>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable view of one committed tree.
///
/// Reads never change state. Writes run the commit protocol and return a
/// **new** snapshot; the original keeps pointing at its commit. Snapshots
/// obtained from a branch are writable; tag and detached snapshots are not.
///
/// Cheap to clone and freely shareable across threads.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub(crate) inner: Arc<VaultInner>,
    pub(crate) commit_oid: git2::Oid,
    pub(crate) tree_oid: git2::Oid,
    /// Branch or tag short name; `None` for detached snapshots.
    pub(crate) ref_name: Option<String>,
    pub(crate) writable: bool,
    pub(crate) changes: Option<ChangeReport>,
}

impl Snapshot {
    pub(crate) fn from_commit(
        inner: Arc<VaultInner>,
        commit_oid: git2::Oid,
        ref_name: Option<String>,
        writable: bool,
    ) -> Result<Self> {
        let tree_oid = inner.with_repo(|repo| {
            let commit = repo.find_commit(commit_oid).map_err(Error::store)?;
            Ok(commit.tree_id())
        })?;

        Ok(Snapshot {
            inner,
            commit_oid,
            tree_oid,
            ref_name,
            writable,
            changes: None,
        })
    }

    // -- Identity -----------------------------------------------------------

    /// 40-char hex SHA of this snapshot's commit.
    pub fn commit_hash(&self) -> String {
        self.commit_oid.to_string()
    }

    /// 40-char hex SHA of this snapshot's root tree.
    pub fn tree_hash(&self) -> String {
        self.tree_oid.to_string()
    }

    /// The branch or tag short name, or `None` when detached.
    pub fn ref_name(&self) -> Option<&str> {
        self.ref_name.as_deref()
    }

    /// Whether write operations are allowed (branch snapshots only).
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// The report from the mutating operation that produced this snapshot,
    /// if any.
    pub fn changes(&self) -> Option<&ChangeReport> {
        self.changes.as_ref()
    }

    /// Commit message, trailing newline stripped.
    pub fn message(&self) -> Result<String> {
        let oid = self.commit_oid;
        self.inner.with_repo(|repo| {
            let commit = repo.find_commit(oid).map_err(Error::store)?;
            Ok(commit
                .message()
                .unwrap_or("")
                .trim_end_matches('\n')
                .to_string())
        })
    }

    /// Committer time, POSIX epoch seconds.
    pub fn time(&self) -> Result<u64> {
        let oid = self.commit_oid;
        self.inner.with_repo(|repo| {
            let commit = repo.find_commit(oid).map_err(Error::store)?;
            Ok(commit.time().seconds().max(0) as u64)
        })
    }

    pub fn author_name(&self) -> Result<String> {
        let oid = self.commit_oid;
        self.inner.with_repo(|repo| {
            let commit = repo.find_commit(oid).map_err(Error::store)?;
            let name = commit.author().name().unwrap_or("").to_string();
            Ok(name)
        })
    }

    pub fn author_email(&self) -> Result<String> {
        let oid = self.commit_oid;
        self.inner.with_repo(|repo| {
            let commit = repo.find_commit(oid).map_err(Error::store)?;
            let email = commit.author().email().unwrap_or("").to_string();
            Ok(email)
        })
    }

    fn branch_name(&self, verb: &str) -> Result<&str> {
        if !self.writable {
            return Err(Error::permission_denied(match &self.ref_name {
                Some(name) => format!("cannot {} read-only snapshot of {:?}", verb, name),
                None => format!("cannot {} detached snapshot", verb),
            }));
        }
        self.ref_name
            .as_deref()
            .ok_or_else(|| Error::permission_denied(format!("cannot {} without a branch", verb)))
    }

    // -- Reads --------------------------------------------------------------

    /// File contents at `path`.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let tree_oid = self.tree_oid;
        self.inner
            .with_repo(|repo| tree::read_blob(repo, tree_oid, path))
    }

    /// A byte range of the file at `path`.
    pub fn read_range(&self, path: &str, offset: usize, size: Option<usize>) -> Result<Vec<u8>> {
        let data = self.read(path)?;
        Ok(slice_range(&data, offset, size))
    }

    /// File contents at `path` as UTF-8 text.
    pub fn read_text(&self, path: &str) -> Result<String> {
        String::from_utf8(self.read(path)?)
            .map_err(|e| Error::store_msg(format!("{}: invalid UTF-8: {}", path, e)))
    }

    /// Blob contents by object hash, bypassing path lookup. Used by
    /// FUSE-style adapters that cache `(path, hash)` pairs.
    pub fn read_by_hash(&self, hash: &str, offset: usize, size: Option<usize>) -> Result<Vec<u8>> {
        let oid = git2::Oid::from_str(hash)
            .map_err(|e| Error::store_msg(format!("invalid hash {:?}: {}", hash, e)))?;
        self.inner.with_repo(|repo| {
            let blob = repo.find_blob(oid).map_err(Error::store)?;
            Ok(slice_range(blob.content(), offset, size))
        })
    }

    /// Names of the entries in the directory at `path` (root when empty).
    pub fn ls(&self, path: &str) -> Result<Vec<String>> {
        let tree_oid = self.tree_oid;
        self.inner.with_repo(|repo| {
            let items = tree::list_dir(repo, tree_oid, path)?;
            Ok(items.into_iter().map(|i| i.name).collect())
        })
    }

    /// Directory entries at `path` with oid and mode.
    pub fn listdir(&self, path: &str) -> Result<Vec<TreeItem>> {
        let tree_oid = self.tree_oid;
        self.inner
            .with_repo(|repo| tree::list_dir(repo, tree_oid, path))
    }

    /// os.walk-style traversal rooted at `path`, parents before children.
    pub fn walk(&self, path: &str) -> Result<Vec<DirListing>> {
        let tree_oid = self.tree_oid;
        let prefix = crate::path::normalize(path)?;
        self.inner.with_repo(|repo| {
            let start = tree::subtree_at(repo, tree_oid, &prefix)?;
            let mut listings = tree::walk_dirs(repo, start)?;
            if !prefix.is_empty() {
                for listing in &mut listings {
                    listing.dirpath = crate::path::join(&prefix, &listing.dirpath);
                }
            }
            Ok(listings)
        })
    }

    /// Whether anything exists at `path`.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let tree_oid = self.tree_oid;
        self.inner
            .with_repo(|repo| Ok(tree::lookup(repo, tree_oid, path)?.is_some()))
    }

    /// Whether `path` names a directory.
    pub fn is_dir(&self, path: &str) -> Result<bool> {
        let tree_oid = self.tree_oid;
        self.inner.with_repo(|repo| {
            Ok(tree::lookup(repo, tree_oid, path)?
                .map(|e| e.is_tree())
                .unwrap_or(false))
        })
    }

    /// The [`FileType`] at `path`.
    pub fn file_type(&self, path: &str) -> Result<FileType> {
        let tree_oid = self.tree_oid;
        self.inner.with_repo(|repo| {
            let entry =
                tree::lookup(repo, tree_oid, path)?.ok_or_else(|| Error::not_found(path))?;
            FileType::from_mode(entry.mode)
                .ok_or_else(|| Error::store_msg(format!("unknown filemode {:#o}", entry.mode)))
        })
    }

    /// Size in bytes of the blob at `path`.
    pub fn size(&self, path: &str) -> Result<u64> {
        let tree_oid = self.tree_oid;
        self.inner.with_repo(|repo| {
            let entry =
                tree::lookup(repo, tree_oid, path)?.ok_or_else(|| Error::not_found(path))?;
            if entry.is_tree() {
                return Err(Error::is_a_directory(path));
            }
            let blob = repo.find_blob(entry.oid).map_err(Error::store)?;
            Ok(blob.size() as u64)
        })
    }

    /// 40-char hex SHA of the object at `path`.
    pub fn object_hash(&self, path: &str) -> Result<String> {
        let tree_oid = self.tree_oid;
        self.inner.with_repo(|repo| {
            let entry =
                tree::lookup(repo, tree_oid, path)?.ok_or_else(|| Error::not_found(path))?;
            Ok(entry.oid.to_string())
        })
    }

    /// Symlink target at `path`.
    pub fn readlink(&self, path: &str) -> Result<String> {
        let tree_oid = self.tree_oid;
        self.inner.with_repo(|repo| {
            let entry =
                tree::lookup(repo, tree_oid, path)?.ok_or_else(|| Error::not_found(path))?;
            if entry.mode != MODE_SYMLINK {
                return Err(Error::invalid_path(format!("{} is not a symlink", path)));
            }
            let blob = repo.find_blob(entry.oid).map_err(Error::store)?;
            String::from_utf8(blob.content().to_vec())
                .map_err(|e| Error::store_msg(format!("{}: invalid UTF-8 target: {}", path, e)))
        })
    }

    /// Single-call attributes for `path` (`""` for the root directory).
    ///
    /// `mtime` is the commit's committer time; `nlink` follows POSIX
    /// conventions (1 for files and symlinks, 2 + subdirectory count for
    /// directories).
    pub fn stat(&self, path: &str) -> Result<StatResult> {
        let tree_oid = self.tree_oid;
        let mtime = self.time()?;

        self.inner.with_repo(|repo| {
            let normalized = crate::path::normalize(path)?;
            let entry = if normalized.is_empty() {
                tree::EntryRef {
                    oid: tree_oid,
                    mode: MODE_DIR,
                }
            } else {
                tree::lookup(repo, tree_oid, &normalized)?
                    .ok_or_else(|| Error::not_found(&normalized))?
            };

            let file_type = FileType::from_mode(entry.mode)
                .ok_or_else(|| Error::store_msg(format!("unknown filemode {:#o}", entry.mode)))?;

            if entry.is_tree() {
                Ok(StatResult {
                    mode: entry.mode,
                    file_type,
                    size: 0,
                    hash: entry.oid.to_string(),
                    nlink: 2 + tree::count_subdirs(repo, entry.oid)?,
                    mtime,
                })
            } else {
                let blob = repo.find_blob(entry.oid).map_err(Error::store)?;
                Ok(StatResult {
                    mode: entry.mode,
                    file_type,
                    size: blob.size() as u64,
                    hash: entry.oid.to_string(),
                    nlink: 1,
                    mtime,
                })
            }
        })
    }

    // -- Glob ---------------------------------------------------------------

    /// Paths matching `pattern`, sorted and deduplicated.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let mut paths = self.iglob(pattern)?;
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// Paths matching `pattern`, in traversal order.
    ///
    /// `*` and `?` match within one segment (dotfiles excluded unless the
    /// pattern segment starts with `.`); `**` spans zero or more directory
    /// levels and does not descend into dot-directories.
    pub fn iglob(&self, pattern: &str) -> Result<Vec<String>> {
        let tree_oid = self.tree_oid;
        let segments: Vec<&str> = pattern.split('/').collect();
        self.inner.with_repo(|repo| {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            glob_tree(repo, tree_oid, &segments, "", &mut seen, &mut out)?;
            Ok(out)
        })
    }

    // -- Writes -------------------------------------------------------------

    /// Write `data` at `path` and commit. Returns the new snapshot.
    pub fn write(&self, path: &str, data: &[u8], opts: WriteOptions) -> Result<Snapshot> {
        self.branch_name("write to")?;
        let normalized = crate::path::normalize(path)?;
        if normalized.is_empty() {
            return Err(Error::invalid_path("cannot write to the root path"));
        }
        let mode = opts.mode.unwrap_or(MODE_FILE);

        let write = self.inner.with_repo(|repo| {
            let oid = repo.blob(data).map_err(Error::store)?;
            Ok(PendingWrite { oid, mode })
        })?;

        self.commit_staged(
            &[(normalized, Some(write))],
            opts.message.as_deref(),
            "write",
            None,
        )
    }

    /// Write UTF-8 `text` at `path` and commit.
    pub fn write_text(&self, path: &str, text: &str, opts: WriteOptions) -> Result<Snapshot> {
        self.write(path, text.as_bytes(), opts)
    }

    /// Write the contents of the disk file `src` at `path` and commit.
    /// The executable bit is detected from disk unless a mode is given.
    pub fn write_from_file(&self, path: &str, src: &Path, opts: WriteOptions) -> Result<Snapshot> {
        let data = std::fs::read(src).map_err(|e| Error::io_at(src, e))?;
        let mode = match opts.mode {
            Some(mode) => mode,
            None => tree::mode_from_disk(src)?,
        };
        self.write(
            path,
            &data,
            WriteOptions {
                mode: Some(mode),
                ..opts
            },
        )
    }

    /// Create a symlink entry at `path` pointing at `target` and commit.
    pub fn write_symlink(&self, path: &str, target: &str, opts: WriteOptions) -> Result<Snapshot> {
        self.write(
            path,
            target.as_bytes(),
            WriteOptions {
                mode: Some(MODE_SYMLINK),
                ..opts
            },
        )
    }

    /// Apply a set of writes and removes in one atomic commit.
    pub fn apply(
        &self,
        writes: &[(&str, WriteValue)],
        removes: &[&str],
        opts: ApplyOptions,
    ) -> Result<Snapshot> {
        self.branch_name("write to")?;

        let mut changes: Vec<Change> = Vec::with_capacity(writes.len() + removes.len());
        for (path, value) in writes {
            let normalized = crate::path::normalize(path)?;
            let entry = value.clone().into_entry()?;
            let payload = match entry.mode {
                MODE_SYMLINK => entry.target.unwrap_or_default().into_bytes(),
                _ => entry.data.unwrap_or_default(),
            };
            let write = self.inner.with_repo(|repo| {
                let oid = repo.blob(&payload).map_err(Error::store)?;
                Ok(PendingWrite {
                    oid,
                    mode: entry.mode,
                })
            })?;
            changes.push((normalized, Some(write)));
        }
        for path in removes {
            changes.push((crate::path::normalize(path)?, None));
        }

        let operation = opts.operation.as_deref().unwrap_or("apply").to_string();
        self.commit_staged(&changes, opts.message.as_deref(), &operation, None)
    }

    /// A [`Batch`] that accumulates writes/removes for one atomic commit.
    pub fn batch(&self, opts: crate::batch::BatchOptions) -> Batch {
        Batch::new(self.clone(), opts)
    }

    /// A buffered writer whose `close()` performs a single [`write`](Self::write).
    pub fn writer(&self, path: &str) -> Result<crate::writer::SnapshotWriter> {
        self.branch_name("write to")?;
        let normalized = crate::path::normalize(path)?;
        Ok(crate::writer::SnapshotWriter::new(self.clone(), normalized))
    }

    /// Remove `paths` and commit. Directories require `recursive`.
    pub fn remove(&self, paths: &[&str], opts: RemoveOptions) -> Result<Snapshot> {
        self.branch_name("remove from")?;
        let tree_oid = self.tree_oid;

        let changes = self.inner.with_repo(|repo| {
            let mut changes: Vec<Change> = Vec::new();
            for path in paths {
                let normalized = crate::path::normalize(path)?;
                let entry = tree::lookup(repo, tree_oid, &normalized)?
                    .ok_or_else(|| Error::not_found(&normalized))?;

                if entry.is_tree() {
                    if !opts.recursive {
                        return Err(Error::is_a_directory(&normalized));
                    }
                    for (rel, _) in tree::walk_files(repo, entry.oid)? {
                        changes.push((crate::path::join(&normalized, &rel), None));
                    }
                } else {
                    changes.push((normalized, None));
                }
            }
            Ok(changes)
        })?;

        if opts.dry_run {
            return self.classify_only(&changes);
        }
        self.commit_staged(&changes, opts.message.as_deref(), "rm", None)
    }

    /// Rename `src` to `dest` and commit. Directory renames move every
    /// child; blobs are carried by oid, never re-read.
    pub fn rename(&self, src: &str, dest: &str, opts: WriteOptions) -> Result<Snapshot> {
        self.branch_name("write to")?;
        let tree_oid = self.tree_oid;
        let src_norm = crate::path::normalize(src)?;
        let dest_norm = crate::path::normalize(dest)?;

        let changes = self.inner.with_repo(|repo| {
            relocation_changes(repo, tree_oid, &src_norm, &dest_norm, true)
        })?;

        let message = opts.message.clone();
        self.commit_staged(&changes, message.as_deref(), "mv", None)
    }

    /// Move `sources` to `dest` with POSIX `mv` semantics: multiple sources
    /// (or a source moved into an existing directory) land under `dest`.
    pub fn move_paths(&self, sources: &[&str], dest: &str, opts: MoveOptions) -> Result<Snapshot> {
        self.branch_name("write to")?;
        let tree_oid = self.tree_oid;
        let dest_norm = crate::path::normalize(dest)?;

        let changes = self.inner.with_repo(|repo| {
            let dest_is_dir = tree::lookup(repo, tree_oid, &dest_norm)?
                .map(|e| e.is_tree())
                .unwrap_or(false);
            if sources.len() > 1 && !dest_is_dir {
                return Err(Error::not_a_directory(&dest_norm));
            }

            let mut changes: Vec<Change> = Vec::new();
            for src in sources {
                let src_norm = crate::path::normalize(src)?;
                let target = if dest_is_dir {
                    crate::path::join(&dest_norm, crate::path::basename(&src_norm))
                } else {
                    dest_norm.clone()
                };
                changes.extend(relocation_changes(
                    repo,
                    tree_oid,
                    &src_norm,
                    &target,
                    opts.recursive,
                )?);
            }
            Ok(changes)
        })?;

        if opts.dry_run {
            return self.classify_only(&changes);
        }
        self.commit_staged(&changes, opts.message.as_deref(), "mv", None)
    }

    // -- Copy / sync (disk) --------------------------------------------------

    /// Copy disk files into the tree. See [`TransferOptions`] for rsync-style
    /// source conventions, `delete`, checksum/mtime comparison, and filters.
    ///
    /// [`TransferOptions`]: crate::transfer::TransferOptions
    pub fn copy_in(
        &self,
        sources: &[&str],
        dest: &str,
        opts: crate::transfer::TransferOptions,
    ) -> Result<Snapshot> {
        crate::transfer::copy_in(self, sources, dest, opts)
    }

    /// Copy tree files out to disk. Returns the report directly since no
    /// commit is made.
    pub fn copy_out(
        &self,
        sources: &[&str],
        dest: &Path,
        opts: crate::transfer::TransferOptions,
    ) -> Result<ChangeReport> {
        crate::transfer::copy_out(self, sources, dest, opts)
    }

    /// [`copy_in`](Self::copy_in) with `delete: true`: make the tree side
    /// identical to the disk side.
    pub fn sync_in(
        &self,
        sources: &[&str],
        dest: &str,
        opts: crate::transfer::TransferOptions,
    ) -> Result<Snapshot> {
        crate::transfer::copy_in(
            self,
            sources,
            dest,
            crate::transfer::TransferOptions {
                delete: true,
                ..opts
            },
        )
    }

    /// [`copy_out`](Self::copy_out) with `delete: true`: make the disk side
    /// identical to the tree side.
    pub fn sync_out(
        &self,
        sources: &[&str],
        dest: &Path,
        opts: crate::transfer::TransferOptions,
    ) -> Result<ChangeReport> {
        crate::transfer::copy_out(
            self,
            sources,
            dest,
            crate::transfer::TransferOptions {
                delete: true,
                ..opts
            },
        )
    }

    /// Copy files from another snapshot of the **same** store, staging blob
    /// references by `(oid, mode)`; content bytes are never read. Sources
    /// follow rsync conventions: `"dir"` copies the directory itself,
    /// `"dir/"` copies its contents, `""` copies the source root's contents.
    pub fn copy_from_ref(
        &self,
        source: &Snapshot,
        sources: &[&str],
        dest: &str,
        opts: CopyFromRefOptions,
    ) -> Result<Snapshot> {
        self.branch_name("write to")?;

        if !Arc::ptr_eq(&self.inner, &source.inner) && self.inner.path != source.inner.path {
            return Err(Error::invalid_path(
                "copy_from_ref source must belong to the same store",
            ));
        }

        let dest_norm = crate::path::normalize(dest)?;
        let src_tree = source.tree_oid;
        let dest_tree = self.tree_oid;

        // Map of destination path -> source (oid, mode), plus the dest
        // prefixes a sync-delete pass must scan.
        let mut staged = BTreeMap::<String, PendingWrite>::new();
        let mut dest_prefixes = BTreeSet::<String>::new();

        self.inner.with_repo(|repo| {
            for &raw in sources {
                let contents_mode = raw.ends_with('/') || raw.is_empty();
                let normalized = crate::path::normalize(raw.trim_end_matches('/'))?;

                if contents_mode || normalized.is_empty() {
                    if !normalized.is_empty() {
                        match tree::lookup(repo, src_tree, &normalized)? {
                            Some(e) if e.is_tree() => {}
                            Some(_) => return Err(Error::not_a_directory(&normalized)),
                            None => return Err(Error::not_found(&normalized)),
                        }
                    }
                    for (rel, entry) in tree::subtree_files(repo, src_tree, &normalized)? {
                        staged.insert(
                            crate::path::join(&dest_norm, &rel),
                            PendingWrite {
                                oid: entry.oid,
                                mode: entry.mode,
                            },
                        );
                    }
                    dest_prefixes.insert(dest_norm.clone());
                    continue;
                }

                let entry = tree::lookup(repo, src_tree, &normalized)?
                    .ok_or_else(|| Error::not_found(&normalized))?;
                let name = crate::path::basename(&normalized);

                if entry.is_tree() {
                    let target = crate::path::join(&dest_norm, name);
                    for (rel, sub) in tree::subtree_files(repo, src_tree, &normalized)? {
                        staged.insert(
                            crate::path::join(&target, &rel),
                            PendingWrite {
                                oid: sub.oid,
                                mode: sub.mode,
                            },
                        );
                    }
                    dest_prefixes.insert(target);
                } else {
                    staged.insert(
                        crate::path::join(&dest_norm, name),
                        PendingWrite {
                            oid: entry.oid,
                            mode: entry.mode,
                        },
                    );
                    dest_prefixes.insert(dest_norm.clone());
                }
            }
            Ok(())
        })?;

        let mut changes: Vec<Change> = staged
            .iter()
            .map(|(path, write)| (path.clone(), Some(*write)))
            .collect();

        if opts.delete {
            let existing = self.inner.with_repo(|repo| {
                let mut existing = BTreeMap::new();
                for prefix in &dest_prefixes {
                    for (rel, entry) in tree::subtree_files(repo, dest_tree, prefix)? {
                        existing.insert(crate::path::join(prefix, &rel), entry);
                    }
                }
                Ok(existing)
            })?;
            for path in existing.keys() {
                if !staged.contains_key(path) {
                    changes.push((path.clone(), None));
                }
            }
        }

        if opts.dry_run {
            return self.classify_only(&changes);
        }
        self.commit_staged(&changes, opts.message.as_deref(), "cp", None)
    }

    // -- History ------------------------------------------------------------

    /// The parent snapshot, or `None` at the initial commit.
    pub fn parent(&self) -> Result<Option<Snapshot>> {
        let oid = self.commit_oid;
        let parent_oid = self.inner.with_repo(|repo| {
            let commit = repo.find_commit(oid).map_err(Error::store)?;
            Ok(if commit.parent_count() > 0 {
                Some(commit.parent_id(0).map_err(Error::store)?)
            } else {
                None
            })
        })?;

        parent_oid
            .map(|oid| {
                Snapshot::from_commit(
                    Arc::clone(&self.inner),
                    oid,
                    self.ref_name.clone(),
                    self.writable,
                )
            })
            .transpose()
    }

    /// The snapshot `n` commits back along the first-parent chain.
    pub fn back(&self, n: usize) -> Result<Snapshot> {
        let mut current = self.clone();
        for _ in 0..n {
            current = current
                .parent()?
                .ok_or_else(|| Error::not_found("not enough history"))?;
        }
        Ok(current)
    }

    /// Move the branch back `n` commits. The abandoned commits stay
    /// reachable through the reflog, so [`redo`](Self::redo) can return.
    pub fn undo(&self, n: usize) -> Result<Snapshot> {
        let branch = self.branch_name("undo")?.to_string();
        let target = self.back(n).map_err(|_| Error::not_found("not enough history to undo"))?;

        let refname = format!("refs/heads/{}", branch);
        let expected = self.commit_oid;
        let target_oid = target.commit_oid;

        self.inner.lock.with(|| {
            self.inner.with_repo(|repo| {
                check_branch_at(repo, &refname, &branch, expected)?;
                cas_ref(repo, &refname, expected, target_oid, "undo: move back")
            })
        })?;

        Ok(target)
    }

    /// Move the branch forward `n` reflog steps, resurrecting commits that
    /// only the reflog remembers.
    ///
    /// Starting from the newest reflog entry whose `new_sha` is the current
    /// commit, each step takes that entry's `old_sha` and continues with the
    /// next older entry.
    pub fn redo(&self, n: usize) -> Result<Snapshot> {
        let branch = self.branch_name("redo")?.to_string();
        let refname = format!("refs/heads/{}", branch);
        let current_hex = self.commit_hash();

        let entries = crate::reflog::read_reflog(&self.inner.path, &refname)?;
        let start = entries
            .iter()
            .position(|e| e.new_sha == current_hex)
            .ok_or_else(|| Error::not_found("no redo target in reflog"))?;

        let mut target_hex = current_hex;
        for step in 0..n {
            let entry = entries
                .get(start + step)
                .ok_or_else(|| Error::not_found("reflog exhausted, nothing to redo"))?;
            if entry.old_sha == ZERO_SHA {
                return Err(Error::not_found("reached branch creation, nothing to redo"));
            }
            target_hex = entry.old_sha.clone();
        }

        let target_oid = git2::Oid::from_str(&target_hex)
            .map_err(|e| Error::store_msg(format!("bad sha in reflog: {}", e)))?;
        let expected = self.commit_oid;

        self.inner.lock.with(|| {
            self.inner.with_repo(|repo| {
                check_branch_at(repo, &refname, &branch, expected)?;
                cas_ref(repo, &refname, expected, target_oid, "redo: move forward")
            })
        })?;

        Snapshot::from_commit(
            Arc::clone(&self.inner),
            target_oid,
            self.ref_name.clone(),
            self.writable,
        )
    }

    /// Ancestor commits of this snapshot, newest first, with optional
    /// filtering by touched path, message glob, and timestamp cutoff.
    pub fn log(&self, opts: LogOptions) -> Result<Vec<CommitInfo>> {
        let skip = opts.skip.unwrap_or(0);
        let limit = opts.limit.unwrap_or(usize::MAX);
        let path_filter = opts
            .path
            .as_deref()
            .map(crate::path::normalize)
            .transpose()?;

        let start = self.commit_oid;
        self.inner.with_repo(|repo| {
            let mut out = Vec::new();
            let mut matched = 0usize;
            let mut cursor = Some(start);

            while let Some(oid) = cursor {
                if out.len() >= limit {
                    break;
                }

                let commit = repo.find_commit(oid).map_err(Error::store)?;
                let time = commit.time().seconds().max(0) as u64;
                let message = commit.message().unwrap_or("").to_string();
                let parent_oid = if commit.parent_count() > 0 {
                    Some(commit.parent_id(0).map_err(Error::store)?)
                } else {
                    None
                };

                let mut include = opts.before.map_or(true, |cutoff| time <= cutoff);

                if include {
                    if let Some(pattern) = opts.match_pattern.as_deref() {
                        include = crate::glob::glob_match(pattern, &message);
                    }
                }

                if include {
                    if let Some(ref path) = path_filter {
                        let here = tree::lookup(repo, commit.tree_id(), path)?;
                        let before = match parent_oid {
                            Some(pid) => {
                                let parent = repo.find_commit(pid).map_err(Error::store)?;
                                tree::lookup(repo, parent.tree_id(), path)?
                            }
                            None => None,
                        };
                        include = match (here, before) {
                            (Some(a), Some(b)) => a.oid != b.oid || a.mode != b.mode,
                            (None, None) => false,
                            _ => true,
                        };
                    }
                }

                if include {
                    matched += 1;
                    if matched > skip {
                        out.push(CommitInfo {
                            commit_hash: oid.to_string(),
                            message,
                            time,
                            author_name: commit.author().name().unwrap_or("").to_string(),
                            author_email: commit.author().email().unwrap_or("").to_string(),
                        });
                    }
                }

                cursor = parent_oid;
            }

            Ok(out)
        })
    }

    // -- Commit protocol ----------------------------------------------------

    /// Run the staged `changes` through a dry classification only, returning
    /// `self` with the report attached.
    pub(crate) fn classify_only(&self, changes: &[Change]) -> Result<Snapshot> {
        let tree_oid = self.tree_oid;
        let report = self
            .inner
            .with_repo(|repo| classify(repo, tree_oid, changes).map(|(report, _)| report))?;
        let mut snapshot = self.clone();
        snapshot.changes = Some(report);
        Ok(snapshot)
    }

    /// The commit protocol. Under the repo lock: stale-check the branch,
    /// classify staged changes, rebuild the tree, create the commit, and
    /// CAS the branch ref. No-op rebuilds return `self` unchanged, but only
    /// after the stale check has passed.
    ///
    /// `attach` overrides the classified report on the returned snapshot
    /// (copy/sync callers carry source paths and per-file errors).
    pub(crate) fn commit_staged(
        &self,
        changes: &[Change],
        message: Option<&str>,
        operation: &str,
        attach: Option<ChangeReport>,
    ) -> Result<Snapshot> {
        let branch = self.branch_name("commit to")?.to_string();
        let refname = format!("refs/heads/{}", branch);
        let expected = self.commit_oid;
        let base_tree = self.tree_oid;

        let outcome = self.inner.lock.with(|| {
            self.inner.with_repo(|repo| {
                check_branch_at(repo, &refname, &branch, expected)?;

                let (classified, effective) = classify(repo, base_tree, changes)?;
                let report = attach.unwrap_or(classified);

                if effective.is_empty() {
                    return Ok((expected, base_tree, report));
                }

                let new_tree = tree::rebuild(repo, Some(base_tree), &effective)?;
                if new_tree == base_tree {
                    return Ok((expected, base_tree, report));
                }

                let text = render_message(message, operation, &report);
                let full = if text.ends_with('\n') {
                    text.clone()
                } else {
                    format!("{}\n", text)
                };

                let who = git2::Signature::now(
                    &self.inner.signature.name,
                    &self.inner.signature.email,
                )
                .map_err(Error::store)?;
                let tree = repo.find_tree(new_tree).map_err(Error::store)?;
                let parent = repo.find_commit(expected).map_err(Error::store)?;

                let new_commit = repo
                    .commit(None, &who, &who, &full, &tree, &[&parent])
                    .map_err(Error::store)?;

                let subject = text.lines().next().unwrap_or("");
                cas_ref(
                    repo,
                    &refname,
                    expected,
                    new_commit,
                    &format!("commit: {}", subject),
                )?;

                log::debug!("{}: {} -> {} ({})", refname, expected, new_commit, subject);
                Ok((new_commit, new_tree, report))
            })
        })?;

        let (commit_oid, tree_oid, report) = outcome;
        Ok(Snapshot {
            inner: Arc::clone(&self.inner),
            commit_oid,
            tree_oid,
            ref_name: self.ref_name.clone(),
            writable: self.writable,
            changes: Some(report),
        })
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hash = self.commit_hash();
        let short = &hash[..7.min(hash.len())];
        match &self.ref_name {
            Some(name) if self.writable => write!(f, "Snapshot({} @ {})", name, short),
            Some(name) => write!(f, "Snapshot({} @ {}, readonly)", name, short),
            None => write!(f, "Snapshot(detached @ {})", short),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol helpers
// ---------------------------------------------------------------------------

/// Verify that `refname` still points at `expected`.
fn check_branch_at(
    repo: &git2::Repository,
    refname: &str,
    branch: &str,
    expected: git2::Oid,
) -> Result<()> {
    let reference = repo
        .find_reference(refname)
        .map_err(|_| Error::not_found(format!("branch {:?} not found", branch)))?;
    let actual = reference
        .target()
        .ok_or_else(|| Error::store_msg(format!("{} is unexpectedly symbolic", refname)))?;
    if actual != expected {
        return Err(Error::stale_snapshot(format!(
            "branch {:?} moved: snapshot at {}, branch at {}",
            branch, expected, actual
        )));
    }
    Ok(())
}

/// Compare-and-swap `refname` from `expected` to `new`, appending a reflog
/// entry with `log_message`.
fn cas_ref(
    repo: &git2::Repository,
    refname: &str,
    expected: git2::Oid,
    new: git2::Oid,
    log_message: &str,
) -> Result<()> {
    repo.reference_matching(refname, new, true, expected, log_message)
        .map_err(|e| {
            if e.code() == git2::ErrorCode::Modified {
                Error::stale_snapshot(format!("{} moved during update", refname))
            } else {
                Error::store(e)
            }
        })?;
    Ok(())
}

/// Classify staged changes against the base tree.
///
/// Returns the report plus the effective change list: writes identical to
/// the existing entry and removes of missing paths are dropped.
fn classify(
    repo: &git2::Repository,
    base_tree: git2::Oid,
    changes: &[Change],
) -> Result<(ChangeReport, Vec<Change>)> {
    let mut report = ChangeReport::new();
    let mut effective: Vec<Change> = Vec::with_capacity(changes.len());

    for (path, op) in changes {
        let existing = tree::lookup(repo, base_tree, path)?;
        match op {
            Some(write) => {
                let file_type = FileType::from_mode(write.mode).unwrap_or(FileType::Regular);
                match existing {
                    None => {
                        report.add.push(FileChange::new(path, file_type));
                        effective.push((path.clone(), Some(*write)));
                    }
                    Some(e) if e.oid != write.oid || e.mode != write.mode => {
                        report.update.push(FileChange::new(path, file_type));
                        effective.push((path.clone(), Some(*write)));
                    }
                    Some(_) => {} // identical, skip
                }
            }
            None => {
                if let Some(e) = existing {
                    let file_type = FileType::from_mode(e.mode).unwrap_or(FileType::Regular);
                    report.delete.push(FileChange::new(path, file_type));
                    effective.push((path.clone(), None));
                }
                // removing a missing path is a silent no-op here; surface
                // layers reject it explicitly where the contract demands
            }
        }
    }

    Ok((report, effective))
}

/// Render the commit message: the `+/~/-` summary for a single change, a
/// `Batch <op>: +A ~U -D` summary otherwise, with placeholder expansion for
/// user-supplied templates.
fn render_message(user: Option<&str>, operation: &str, report: &ChangeReport) -> String {
    let default = default_summary(operation, report);
    match user {
        None => default,
        Some(template) => template
            .replace("{default}", &default)
            .replace("{operation}", operation)
            .replace("{add_count}", &report.add.len().to_string())
            .replace("{update_count}", &report.update.len().to_string())
            .replace("{delete_count}", &report.delete.len().to_string())
            .replace("{total}", &report.total().to_string()),
    }
}

fn default_summary(operation: &str, report: &ChangeReport) -> String {
    if report.total() == 1 {
        if let Some(change) = report.add.first() {
            return format!("+ {}", change.path);
        }
        if let Some(change) = report.update.first() {
            return format!("~ {}", change.path);
        }
        if let Some(change) = report.delete.first() {
            return format!("- {}", change.path);
        }
    }

    let mut parts = Vec::new();
    if !report.add.is_empty() {
        parts.push(format!("+{}", report.add.len()));
    }
    if !report.update.is_empty() {
        parts.push(format!("~{}", report.update.len()));
    }
    if !report.delete.is_empty() {
        parts.push(format!("-{}", report.delete.len()));
    }

    if parts.is_empty() {
        operation.to_string()
    } else {
        format!("Batch {}: {}", operation, parts.join(" "))
    }
}

/// Stage the delete+write pairs that move the entry at `src` to `dest`.
fn relocation_changes(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    src: &str,
    dest: &str,
    recursive: bool,
) -> Result<Vec<Change>> {
    let entry = tree::lookup(repo, tree_oid, src)?.ok_or_else(|| Error::not_found(src))?;

    let mut changes = Vec::new();
    if entry.is_tree() {
        if !recursive {
            return Err(Error::is_a_directory(src));
        }
        for (rel, item) in tree::walk_files(repo, entry.oid)? {
            changes.push((crate::path::join(src, &rel), None));
            changes.push((
                crate::path::join(dest, &rel),
                Some(PendingWrite {
                    oid: item.oid,
                    mode: item.mode,
                }),
            ));
        }
    } else {
        changes.push((src.to_string(), None));
        changes.push((
            dest.to_string(),
            Some(PendingWrite {
                oid: entry.oid,
                mode: entry.mode,
            }),
        ));
    }
    Ok(changes)
}

fn slice_range(data: &[u8], offset: usize, size: Option<usize>) -> Vec<u8> {
    let start = offset.min(data.len());
    let end = match size {
        Some(n) => start.saturating_add(n).min(data.len()),
        None => data.len(),
    };
    data[start..end].to_vec()
}

/// Recursive glob over a tree. `**` matches zero or more levels and skips
/// dot-directories.
fn glob_tree(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    segments: &[&str],
    prefix: &str,
    seen: &mut HashSet<String>,
    out: &mut Vec<String>,
) -> Result<()> {
    let Some((&segment, rest)) = segments.split_first() else {
        return Ok(());
    };

    let tree = repo.find_tree(tree_oid).map_err(Error::store)?;

    if segment == "**" {
        // Zero levels: match the remainder right here.
        glob_tree(repo, tree_oid, rest, prefix, seen, out)?;
        // One or more levels: recurse into non-dot subtrees with the same
        // pattern.
        for entry in tree.iter() {
            let name = entry.name().unwrap_or("");
            if name.starts_with('.') || entry.filemode() as u32 != MODE_DIR {
                continue;
            }
            let full = crate::path::join(prefix, name);
            glob_tree(repo, entry.id(), segments, &full, seen, out)?;
        }
        return Ok(());
    }

    for entry in tree.iter() {
        let name = entry.name().unwrap_or("");
        if !crate::glob::glob_match(segment, name) {
            continue;
        }
        let full = crate::path::join(prefix, name);
        let is_dir = entry.filemode() as u32 == MODE_DIR;

        if rest.is_empty() {
            if !is_dir && seen.insert(full.clone()) {
                out.push(full);
            }
        } else if is_dir {
            glob_tree(repo, entry.id(), rest, &full, seen, out)?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// retry_write
// ---------------------------------------------------------------------------

/// Fetch-and-write with optimistic-concurrency retry.
///
/// Fetches the branch snapshot and writes `data` at `path`; on
/// [`Error::StaleSnapshot`] the attempt is retried after
/// `min(10·2^attempt, 200)` ms plus up to 10 ms of jitter, at most
/// `retries` times. Any other error, and exhaustion, surface to the caller.
pub fn retry_write(
    vault: &Vault,
    branch: &str,
    path: &str,
    data: &[u8],
    retries: u32,
) -> Result<Snapshot> {
    let mut attempt = 0u32;
    loop {
        let snapshot = vault.branches().get(branch)?;
        match snapshot.write(path, data, WriteOptions::default()) {
            Ok(next) => return Ok(next),
            Err(Error::StaleSnapshot(msg)) => {
                if attempt >= retries {
                    return Err(Error::StaleSnapshot(msg));
                }
                let backoff = (10u64 << attempt).min(200);
                let jitter = rand::rng().random_range(0..=10);
                log::trace!("stale write on {:?}, retry {} in {}ms", branch, attempt + 1, backoff);
                std::thread::sleep(Duration::from_millis(backoff + jitter));
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}
