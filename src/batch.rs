//! Staged multi-path changes committed in one atomic commit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::tree::{self, Change, PendingWrite};
use crate::types::{MODE_FILE, MODE_SYMLINK};

/// Options for [`Snapshot::batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Commit message; auto-generated when `None`.
    pub message: Option<String>,
    /// Operation label used in auto-generated messages (default `"batch"`).
    pub operation: Option<String>,
}

/// Accumulates writes and removes against one snapshot, committing them all
/// at once.
///
/// Blobs are written to the object store as they are staged, so a batch
/// holds only `(oid, mode)` pairs regardless of payload size. `commit`
/// consumes the batch; a batch commits exactly once.
pub struct Batch {
    snapshot: Snapshot,
    writes: BTreeMap<String, PendingWrite>,
    removes: BTreeSet<String>,
    message: Option<String>,
    operation: Option<String>,
    closed: bool,
}

impl Batch {
    pub(crate) fn new(snapshot: Snapshot, opts: BatchOptions) -> Self {
        Self {
            snapshot,
            writes: BTreeMap::new(),
            removes: BTreeSet::new(),
            message: opts.message,
            operation: opts.operation,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::BatchClosed)
        } else {
            Ok(())
        }
    }

    /// Stage `data` as a regular file at `path`.
    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.write_with_mode(path, data, MODE_FILE)
    }

    /// Stage `data` at `path` with an explicit filemode.
    pub fn write_with_mode(&mut self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        self.ensure_open()?;
        let normalized = crate::path::normalize(path)?;
        if normalized.is_empty() {
            return Err(Error::invalid_path("cannot write to the root path"));
        }

        let oid = self
            .snapshot
            .inner
            .with_repo(|repo| repo.blob(data).map_err(Error::store))?;

        self.removes.remove(&normalized);
        self.writes.insert(normalized, PendingWrite { oid, mode });
        Ok(())
    }

    /// Stage UTF-8 `text` as a regular file at `path`.
    pub fn write_text(&mut self, path: &str, text: &str) -> Result<()> {
        self.write(path, text.as_bytes())
    }

    /// Stage a symlink at `path` pointing at `target`.
    pub fn write_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        self.write_with_mode(path, target.as_bytes(), MODE_SYMLINK)
    }

    /// Stage the contents of the disk file `src` at `path`, detecting the
    /// executable bit from disk.
    pub fn write_from_file(&mut self, path: &str, src: &Path) -> Result<()> {
        self.ensure_open()?;
        let data = std::fs::read(src).map_err(|e| Error::io_at(src, e))?;
        let mode = tree::mode_from_disk(src)?;
        self.write_with_mode(path, &data, mode)
    }

    /// Stage a removal of `path`.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the path is neither staged in this batch nor
    /// present in the base tree; [`Error::IsADirectory`] when the base tree
    /// has a directory there.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let normalized = crate::path::normalize(path)?;

        let base_tree = self.snapshot.tree_oid;
        let existing = self
            .snapshot
            .inner
            .with_repo(|repo| tree::lookup(repo, base_tree, &normalized))?;

        if let Some(entry) = existing {
            if entry.is_tree() {
                return Err(Error::is_a_directory(&normalized));
            }
        } else if !self.writes.contains_key(&normalized) {
            return Err(Error::not_found(&normalized));
        }

        self.writes.remove(&normalized);
        self.removes.insert(normalized);
        Ok(())
    }

    /// A buffered writer that stages into this batch on `close()`.
    pub fn writer(&mut self, path: &str) -> Result<crate::writer::BatchWriter<'_>> {
        self.ensure_open()?;
        let normalized = crate::path::normalize(path)?;
        Ok(crate::writer::BatchWriter::new(self, normalized))
    }

    /// Number of staged writes and removes.
    pub fn pending(&self) -> usize {
        self.writes.len() + self.removes.len()
    }

    /// Whether `commit` has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Commit everything staged. Consumes the batch; with nothing staged the
    /// base snapshot is returned unchanged.
    pub fn commit(mut self) -> Result<Snapshot> {
        self.closed = true;

        if self.writes.is_empty() && self.removes.is_empty() {
            return Ok(self.snapshot);
        }

        let mut changes: Vec<Change> = self
            .writes
            .iter()
            .map(|(path, write)| (path.clone(), Some(*write)))
            .collect();
        for path in &self.removes {
            changes.push((path.clone(), None));
        }

        let operation = self.operation.as_deref().unwrap_or("batch");
        self.snapshot
            .commit_staged(&changes, self.message.as_deref(), operation, None)
    }
}
