//! Disk/tree file transfer with rsync conventions.
//!
//! Sources select what to copy: `"name"` copies the file or directory
//! itself, `"name/"` copies a directory's contents, and `""` (tree side
//! only) copies the root's contents. With `delete` set, destination files
//! absent from the source are removed, turning a copy into a sync.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::error::{Error, Result};
use crate::exclude::ExcludeFilter;
use crate::snapshot::Snapshot;
use crate::tree::{self, Change, PendingWrite};
use crate::types::{ChangeError, ChangeReport, FileChange, FileType, MODE_EXEC, MODE_SYMLINK};

/// Options shared by [`Snapshot::copy_in`] and [`Snapshot::copy_out`].
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Commit message for copy-in; auto-generated when `None`.
    pub message: Option<String>,
    /// Remove destination files absent from the source (sync semantics).
    pub delete: bool,
    /// Compare by content hash (`true`, the default via
    /// [`TransferOptions::new`]) or fall back to the mtime-vs-commit-time
    /// fast path (`false`).
    pub checksum: bool,
    /// Classify only; perform no writes.
    pub dry_run: bool,
    /// Skip paths that already exist at the destination.
    pub ignore_existing: bool,
    /// Collect per-file errors in the report instead of aborting.
    pub ignore_errors: bool,
    /// Gitignore-style filter pruning files and directories on both sides.
    pub exclude: Option<ExcludeFilter>,
}

impl TransferOptions {
    /// The defaults used when options are built field-by-field: checksum
    /// comparison on, everything else off.
    pub fn new() -> Self {
        Self {
            checksum: true,
            ..Self::default()
        }
    }
}

/// One disk file selected for copy-in.
struct PlannedIn {
    /// Destination path inside the tree.
    target: String,
    /// Disk source, carried into the report.
    disk: PathBuf,
}

/// One tree entry selected for copy-out.
struct PlannedOut {
    /// Destination path relative to the disk destination; empty for a
    /// single-file rename onto `dest` itself.
    target: String,
    entry: tree::EntryRef,
}

fn excluded(filter: Option<&ExcludeFilter>, rel: &str, is_dir: bool) -> bool {
    match filter {
        Some(f) if f.active() => {
            // A path is excluded if it matches, or if any ancestor
            // directory matches a directory rule.
            if f.is_excluded(rel, is_dir) {
                return true;
            }
            let mut prefix = String::new();
            for segment in rel.split('/') {
                if !prefix.is_empty() || !segment.is_empty() {
                    let candidate = crate::path::join(&prefix, segment);
                    if candidate != rel && f.is_excluded(&candidate, true) {
                        return true;
                    }
                    prefix = candidate;
                }
            }
            false
        }
        _ => false,
    }
}

/// Relative paths of all files and symlinks under `root`, sorted, with
/// excluded directories pruned during the walk.
fn walk_disk(root: &Path, filter: Option<&ExcludeFilter>) -> Result<Vec<String>> {
    fn descend(
        root: &Path,
        dir: &Path,
        filter: Option<&ExcludeFilter>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io_at(dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| Error::io_at(dir, e))?;
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let meta = std::fs::symlink_metadata(&path).map_err(|e| Error::io_at(&path, e))?;

            if meta.is_dir() {
                if let Some(f) = filter {
                    if f.active() && f.is_excluded(&rel, true) {
                        continue;
                    }
                }
                descend(root, &path, filter, out)?;
            } else {
                if let Some(f) = filter {
                    if f.active() && f.is_excluded(&rel, false) {
                        continue;
                    }
                }
                out.push(rel);
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    descend(root, root, filter, &mut out)?;
    out.sort();
    Ok(out)
}

fn mtime_of(path: &Path) -> Option<u64> {
    let meta = std::fs::symlink_metadata(path).ok()?;
    let mtime = FileTime::from_last_modification_time(&meta).unix_seconds();
    (mtime >= 0).then_some(mtime as u64)
}

fn read_disk_entry(path: &Path, mode: u32) -> Result<Vec<u8>> {
    if mode == MODE_SYMLINK {
        let target = std::fs::read_link(path).map_err(|e| Error::io_at(path, e))?;
        Ok(target.to_string_lossy().into_owned().into_bytes())
    } else {
        std::fs::read(path).map_err(|e| Error::io_at(path, e))
    }
}

/// Drop deletions that collide with a write path: removing `a` while
/// writing `a/b` (or `a` itself) would fight the blob-to-tree transition the
/// rebuild already handles.
fn filter_delete_conflicts(deletes: &mut Vec<String>, writes: &BTreeSet<String>) {
    deletes.retain(|candidate| {
        if writes.contains(candidate) {
            return false;
        }
        let prefix = format!("{}/", candidate);
        !writes.iter().any(|w| w.starts_with(&prefix))
    });
}

/// Remove now-empty directories under `root`, deepest first.
fn prune_empty_dirs(root: &Path) {
    fn collect(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    out.push(path.clone());
                    collect(root, &path, out);
                }
            }
        }
    }

    let mut dirs = Vec::new();
    collect(root, root, &mut dirs);
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let _ = std::fs::remove_dir(dir);
    }
}

// ---------------------------------------------------------------------------
// copy_in: disk -> tree
// ---------------------------------------------------------------------------

pub(crate) fn copy_in(
    snapshot: &Snapshot,
    sources: &[&str],
    dest: &str,
    opts: TransferOptions,
) -> Result<Snapshot> {
    let dest_norm = crate::path::normalize(dest)?;
    let tree_oid = snapshot.tree_oid;
    let commit_time = snapshot.time()?;
    let filter = opts.exclude.as_ref();

    let mut report = ChangeReport::new();

    let dest_is_dir = dest_norm.is_empty()
        || snapshot.inner.with_repo(|repo| {
            Ok(tree::lookup(repo, tree_oid, &dest_norm)?
                .map(|e| e.is_tree())
                .unwrap_or(false))
        })?;

    if sources.len() > 1 && !dest_is_dir {
        let dest_exists = snapshot
            .inner
            .with_repo(|repo| Ok(tree::lookup(repo, tree_oid, &dest_norm)?.is_some()))?;
        if dest_exists {
            return Err(Error::not_a_directory(&dest_norm));
        }
    }

    // Resolve each source into planned files and the destination prefixes a
    // sync-delete pass must scan.
    let mut plan: Vec<PlannedIn> = Vec::new();
    let mut prefixes = BTreeSet::<String>::new();
    let single_rename = sources.len() == 1 && !dest_is_dir && !dest_norm.is_empty();

    for &raw in sources {
        let contents_mode = raw.ends_with('/');
        let source = Path::new(raw.trim_end_matches('/'));

        let meta = match std::fs::symlink_metadata(source) {
            Ok(meta) => meta,
            Err(e) => {
                let err = Error::io_at(source, e);
                if opts.ignore_errors {
                    report
                        .errors
                        .push(ChangeError::new(raw, err.to_string()));
                    continue;
                }
                return Err(err);
            }
        };

        if meta.is_dir() {
            let base = if contents_mode {
                dest_norm.clone()
            } else {
                let name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                crate::path::join(&dest_norm, &name)
            };
            for rel in walk_disk(source, filter)? {
                plan.push(PlannedIn {
                    target: crate::path::join(&base, &rel),
                    disk: source.join(&rel),
                });
            }
            prefixes.insert(base);
        } else {
            if contents_mode {
                let err = Error::not_a_directory(raw);
                if opts.ignore_errors {
                    report.errors.push(ChangeError::new(raw, err.to_string()));
                    continue;
                }
                return Err(err);
            }
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = if single_rename {
                dest_norm.clone()
            } else {
                crate::path::join(&dest_norm, &name)
            };
            plan.push(PlannedIn {
                target,
                disk: source.to_path_buf(),
            });
        }
    }

    // Stage adds and updates.
    let mut changes: Vec<Change> = Vec::new();
    let mut write_targets = BTreeSet::<String>::new();

    for planned in &plan {
        let disk = &planned.disk;
        let target = &planned.target;

        let staged = snapshot.inner.with_repo(|repo| {
            let existing = tree::lookup(repo, tree_oid, target)?;

            if opts.ignore_existing && existing.is_some() {
                return Ok(None);
            }

            // Fast path: without checksums, a file no newer than the commit
            // is assumed unchanged.
            if !opts.checksum && existing.is_some() {
                if let Some(mtime) = mtime_of(disk) {
                    if mtime <= commit_time {
                        return Ok(None);
                    }
                }
            }

            let mode = tree::mode_from_disk(disk)?;
            let data = read_disk_entry(disk, mode)?;
            let oid = repo.blob(&data).map_err(Error::store)?;
            let file_type = FileType::from_mode(mode).unwrap_or(FileType::Regular);

            match existing {
                Some(e) if e.oid == oid && e.mode == mode => Ok(None),
                Some(_) => Ok(Some((PendingWrite { oid, mode }, file_type, true))),
                None => Ok(Some((PendingWrite { oid, mode }, file_type, false))),
            }
        });

        match staged {
            Ok(Some((write, file_type, is_update))) => {
                write_targets.insert(target.clone());
                changes.push((target.clone(), Some(write)));
                let change = FileChange::from_source(target, file_type, disk);
                if is_update {
                    report.update.push(change);
                } else {
                    report.add.push(change);
                }
            }
            Ok(None) => {}
            Err(err) => {
                if opts.ignore_errors {
                    report.errors.push(ChangeError::new(target, err.to_string()));
                } else {
                    return Err(err);
                }
            }
        }
    }

    // Sync semantics: remove tree files under the copied prefixes that the
    // source no longer has.
    if opts.delete {
        let planned_targets: BTreeSet<&str> = plan.iter().map(|p| p.target.as_str()).collect();
        let mut deletes: Vec<String> = Vec::new();
        let mut delete_types = BTreeMap::new();

        snapshot.inner.with_repo(|repo| {
            for prefix in &prefixes {
                for (rel, entry) in tree::subtree_files(repo, tree_oid, prefix)? {
                    let full = crate::path::join(prefix, &rel);
                    if planned_targets.contains(full.as_str()) {
                        continue;
                    }
                    if excluded(filter, &rel, false) {
                        continue;
                    }
                    delete_types.insert(
                        full.clone(),
                        FileType::from_mode(entry.mode).unwrap_or(FileType::Regular),
                    );
                    deletes.push(full);
                }
            }
            Ok(())
        })?;

        filter_delete_conflicts(&mut deletes, &write_targets);
        for path in deletes {
            let file_type = delete_types
                .get(&path)
                .copied()
                .unwrap_or(FileType::Regular);
            report.delete.push(FileChange::new(&path, file_type));
            changes.push((path, None));
        }
    }

    if opts.dry_run {
        let mut preview = snapshot.clone();
        preview.changes = Some(report);
        return Ok(preview);
    }

    snapshot.commit_staged(&changes, opts.message.as_deref(), "copy", Some(report))
}

// ---------------------------------------------------------------------------
// copy_out: tree -> disk
// ---------------------------------------------------------------------------

pub(crate) fn copy_out(
    snapshot: &Snapshot,
    sources: &[&str],
    dest: &Path,
    opts: TransferOptions,
) -> Result<ChangeReport> {
    let tree_oid = snapshot.tree_oid;
    let commit_time = snapshot.time()?;
    let filter = opts.exclude.as_ref();

    let mut report = ChangeReport::new();

    let dest_is_dir = dest.is_dir();
    let single_rename = sources.len() == 1 && !dest_is_dir;
    if sources.len() > 1 && dest.exists() && !dest_is_dir {
        return Err(Error::not_a_directory(dest.to_string_lossy()));
    }

    // Resolve tree sources into planned exports and the local roots a
    // sync-delete pass must scan.
    let mut plan: Vec<PlannedOut> = Vec::new();
    let mut local_roots = BTreeSet::<PathBuf>::new();

    snapshot.inner.with_repo(|repo| {
        for &raw in sources {
            let contents_mode = raw.ends_with('/') || crate::path::is_root(raw);
            let normalized = crate::path::normalize(raw.trim_end_matches('/'))?;

            if contents_mode {
                if !normalized.is_empty() {
                    match tree::lookup(repo, tree_oid, &normalized)? {
                        Some(e) if e.is_tree() => {}
                        Some(_) => return Err(Error::not_a_directory(&normalized)),
                        None => return Err(Error::not_found(&normalized)),
                    }
                }
                for (rel, entry) in tree::subtree_files(repo, tree_oid, &normalized)? {
                    if excluded(filter, &rel, false) {
                        continue;
                    }
                    plan.push(PlannedOut { target: rel, entry });
                }
                local_roots.insert(dest.to_path_buf());
                continue;
            }

            let entry = tree::lookup(repo, tree_oid, &normalized)?
                .ok_or_else(|| Error::not_found(&normalized))?;
            let name = crate::path::basename(&normalized).to_string();

            if entry.is_tree() {
                for (rel, sub) in tree::subtree_files(repo, tree_oid, &normalized)? {
                    if excluded(filter, &rel, false) {
                        continue;
                    }
                    plan.push(PlannedOut {
                        target: crate::path::join(&name, &rel),
                        entry: sub,
                    });
                }
                local_roots.insert(dest.join(&name));
            } else {
                plan.push(PlannedOut {
                    target: if single_rename { String::new() } else { name },
                    entry,
                });
            }
        }
        Ok(())
    })?;

    // Write planned files to disk.
    let mut written = BTreeSet::<PathBuf>::new();

    for planned in &plan {
        let entry = planned.entry;
        let local = if planned.target.is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(&planned.target)
        };

        let result = export_one(snapshot, entry, &local, commit_time, &opts);
        match result {
            Ok(Exported::Skipped) => {
                written.insert(local);
            }
            Ok(Exported::Added) => {
                let file_type = FileType::from_mode(entry.mode).unwrap_or(FileType::Regular);
                report
                    .add
                    .push(FileChange::from_source(&planned.target, file_type, &local));
                written.insert(local);
            }
            Ok(Exported::Updated) => {
                let file_type = FileType::from_mode(entry.mode).unwrap_or(FileType::Regular);
                report
                    .update
                    .push(FileChange::from_source(&planned.target, file_type, &local));
                written.insert(local);
            }
            Err(err) => {
                if opts.ignore_errors {
                    report
                        .errors
                        .push(ChangeError::new(&planned.target, err.to_string()));
                } else {
                    return Err(err);
                }
            }
        }
    }

    // Sync semantics: remove local files the tree no longer has, then prune
    // directories emptied by the removals.
    if opts.delete {
        for root in &local_roots {
            for rel in walk_disk(root, filter)? {
                let local = root.join(&rel);
                if written.contains(&local) {
                    continue;
                }
                if opts.dry_run {
                    report
                        .delete
                        .push(FileChange::from_source(&rel, FileType::Regular, &local));
                    continue;
                }
                match std::fs::remove_file(&local) {
                    Ok(()) => {
                        report
                            .delete
                            .push(FileChange::from_source(&rel, FileType::Regular, &local));
                    }
                    Err(e) => {
                        let err = Error::io_at(&local, e);
                        if opts.ignore_errors {
                            report.errors.push(ChangeError::new(&rel, err.to_string()));
                        } else {
                            return Err(err);
                        }
                    }
                }
            }
            if !opts.dry_run {
                prune_empty_dirs(root);
            }
        }
    }

    Ok(report)
}

enum Exported {
    Added,
    Updated,
    Skipped,
}

/// Export one tree entry to `local`, honoring dry-run, ignore-existing, and
/// the checksum/mtime comparison.
fn export_one(
    snapshot: &Snapshot,
    entry: tree::EntryRef,
    local: &Path,
    commit_time: u64,
    opts: &TransferOptions,
) -> Result<Exported> {
    let exists = local.symlink_metadata().is_ok();

    if exists {
        if opts.ignore_existing {
            return Ok(Exported::Skipped);
        }
        if opts.checksum {
            let mode = tree::mode_from_disk(local).unwrap_or(0);
            let local_data = read_disk_entry(local, mode).unwrap_or_default();
            let local_oid = git2::Oid::hash_object(git2::ObjectType::Blob, &local_data)
                .map_err(Error::store)?;
            if local_oid == entry.oid {
                return Ok(Exported::Skipped);
            }
        } else if let Some(mtime) = mtime_of(local) {
            if mtime <= commit_time {
                return Ok(Exported::Skipped);
            }
        }
    }

    if opts.dry_run {
        return Ok(if exists {
            Exported::Updated
        } else {
            Exported::Added
        });
    }

    let data = snapshot.inner.with_repo(|repo| {
        let blob = repo.find_blob(entry.oid).map_err(Error::store)?;
        Ok(blob.content().to_vec())
    })?;

    if let Some(parent) = local.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
    }

    if entry.mode == MODE_SYMLINK {
        let target = String::from_utf8_lossy(&data).into_owned();
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(local);
            std::os::unix::fs::symlink(&target, local).map_err(|e| Error::io_at(local, e))?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(local, target.as_bytes()).map_err(|e| Error::io_at(local, e))?;
        }
    } else {
        std::fs::write(local, &data).map_err(|e| Error::io_at(local, e))?;

        #[cfg(unix)]
        if entry.mode == MODE_EXEC {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(local, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| Error::io_at(local, e))?;
        }

        // Stamp the export with the commit time so the mtime fast path can
        // recognize it as in-sync later.
        let stamp = FileTime::from_unix_time(commit_time as i64, 0);
        let _ = filetime::set_file_mtime(local, stamp);
    }

    Ok(if exists {
        Exported::Updated
    } else {
        Exported::Added
    })
}
