//! Git notes: per-namespace text annotations keyed by commit hash.
//!
//! A namespace lives at `refs/notes/<name>` as a linear commit chain whose
//! tree maps commit hashes to note blobs. Reads understand both the flat
//! layout (entries named by the full 40-hex hash) and the 2/38 fanout layout
//! git produces at scale; writes always produce flat entries and scrub any
//! fanout remnant for the same hash.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::VaultInner;
use crate::types::{MODE_DIR, MODE_FILE};

fn is_hex40(s: &str) -> bool {
    s.len() == 40
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Entry point for notes namespaces on a store.
pub struct Notes {
    inner: Arc<VaultInner>,
}

impl Notes {
    pub(crate) fn new(inner: Arc<VaultInner>) -> Self {
        Self { inner }
    }

    /// The default namespace, `refs/notes/commits`.
    pub fn commits(&self) -> NoteSpace {
        self.namespace("commits")
    }

    /// A named namespace, `refs/notes/<name>`.
    pub fn namespace(&self, name: &str) -> NoteSpace {
        NoteSpace {
            inner: Arc::clone(&self.inner),
            namespace: name.to_string(),
            refname: format!("refs/notes/{}", name),
        }
    }
}

/// One notes namespace: a map from commit hash to UTF-8 text.
///
/// Keys are 40-hex commit hashes, or branch/tag names which resolve to
/// their commit. Every mutation is one commit on the namespace ref.
#[derive(Clone)]
pub struct NoteSpace {
    inner: Arc<VaultInner>,
    namespace: String,
    refname: String,
}

impl NoteSpace {
    /// Resolve a key: 40-hex passes through, otherwise branch and tag names
    /// resolve to their commit hash.
    fn resolve_key(&self, key: &str) -> Result<String> {
        if is_hex40(key) {
            return Ok(key.to_string());
        }
        self.inner.with_repo(|repo| {
            for prefix in ["refs/heads/", "refs/tags/"] {
                if let Ok(reference) = repo.find_reference(&format!("{}{}", prefix, key)) {
                    if let Some(target) = reference.target() {
                        let commit = crate::refs::peel_to_commit(repo, target, key)?;
                        return Ok(commit.to_string());
                    }
                }
            }
            Err(Error::key_not_found(key))
        })
    }

    fn tip(&self, repo: &git2::Repository) -> Option<git2::Oid> {
        repo.find_reference(&self.refname)
            .ok()
            .and_then(|r| r.target())
    }

    fn tip_tree(&self, repo: &git2::Repository) -> Result<Option<git2::Oid>> {
        match self.tip(repo) {
            None => Ok(None),
            Some(tip) => {
                let commit = repo.find_commit(tip).map_err(Error::store)?;
                Ok(Some(commit.tree_id()))
            }
        }
    }

    /// The note text for `key`.
    pub fn get(&self, key: &str) -> Result<String> {
        let hash = self.resolve_key(key)?;
        self.inner.with_repo(|repo| {
            let tree = self
                .tip_tree(repo)?
                .ok_or_else(|| Error::key_not_found(&hash))?;
            let blob_oid =
                find_note(repo, tree, &hash)?.ok_or_else(|| Error::key_not_found(&hash))?;
            let blob = repo.find_blob(blob_oid).map_err(Error::store)?;
            String::from_utf8(blob.content().to_vec())
                .map_err(|e| Error::store_msg(format!("note {}: invalid UTF-8: {}", hash, e)))
        })
    }

    /// Whether a note exists for `key`.
    pub fn contains(&self, key: &str) -> Result<bool> {
        let hash = self.resolve_key(key)?;
        self.inner.with_repo(|repo| match self.tip_tree(repo)? {
            None => Ok(false),
            Some(tree) => Ok(find_note(repo, tree, &hash)?.is_some()),
        })
    }

    /// Create or replace the note for `key`. One commit per call.
    pub fn set(&self, key: &str, text: &str) -> Result<()> {
        let hash = self.resolve_key(key)?;
        let message = format!("Notes added by 'git notes' on {}", &hash[..7]);
        self.mutate(&[(hash, text.to_string())], &[], &message)
    }

    /// Delete the note for `key`.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] when no note exists.
    pub fn delete(&self, key: &str) -> Result<()> {
        let hash = self.resolve_key(key)?;
        let message = format!("Notes removed by 'git notes' on {}", &hash[..7]);
        self.mutate(&[], &[hash], &message)
    }

    /// Sorted hashes of every annotated commit in this namespace.
    pub fn list(&self) -> Result<Vec<String>> {
        self.inner.with_repo(|repo| {
            let Some(tree) = self.tip_tree(repo)? else {
                return Ok(Vec::new());
            };
            let mut hashes: Vec<String> =
                all_notes(repo, tree)?.into_keys().collect();
            hashes.sort();
            Ok(hashes)
        })
    }

    /// Number of notes in this namespace.
    pub fn len(&self) -> Result<usize> {
        self.inner.with_repo(|repo| match self.tip_tree(repo)? {
            None => Ok(0),
            Some(tree) => Ok(all_notes(repo, tree)?.len()),
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// A batch that defers staged sets/deletes to a single commit.
    pub fn batch(&self) -> NotesBatch {
        NotesBatch {
            space: self.clone(),
            writes: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Apply writes and deletes as one commit on the namespace ref, under
    /// the repo lock. The previous tip (if any) becomes the parent.
    fn mutate(&self, writes: &[(String, String)], deletes: &[String], message: &str) -> Result<()> {
        self.inner.lock.with(|| {
            self.inner.with_repo(|repo| {
                let tip = self.tip(repo);
                let base_tree = self.tip_tree(repo)?;
                let new_tree = build_note_tree(repo, base_tree, writes, deletes)?;

                let who = git2::Signature::now(
                    &self.inner.signature.name,
                    &self.inner.signature.email,
                )
                .map_err(Error::store)?;
                let tree = repo.find_tree(new_tree).map_err(Error::store)?;

                let parent = tip
                    .map(|oid| repo.find_commit(oid))
                    .transpose()
                    .map_err(Error::store)?;
                let parents: Vec<&git2::Commit> = parent.iter().collect();

                let commit_oid = repo
                    .commit(None, &who, &who, &format!("{}\n", message), &tree, &parents)
                    .map_err(Error::store)?;
                repo.reference(&self.refname, commit_oid, true, message)
                    .map_err(Error::store)?;

                log::debug!("{}: {}", self.refname, message);
                Ok(())
            })
        })
    }
}

impl std::fmt::Display for NoteSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NoteSpace({:?})", self.namespace)
    }
}

/// Staged note changes applied in one commit.
pub struct NotesBatch {
    space: NoteSpace,
    writes: Vec<(String, String)>,
    deletes: Vec<String>,
}

impl NotesBatch {
    /// Stage a set; last write per key wins.
    pub fn set(&mut self, key: &str, text: &str) -> Result<()> {
        let hash = self.space.resolve_key(key)?;
        self.deletes.retain(|h| h != &hash);
        self.writes.retain(|(h, _)| h != &hash);
        self.writes.push((hash, text.to_string()));
        Ok(())
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let hash = self.space.resolve_key(key)?;
        self.writes.retain(|(h, _)| h != &hash);
        if !self.deletes.contains(&hash) {
            self.deletes.push(hash);
        }
        Ok(())
    }

    /// Commit everything staged as a single notes commit. Consumes the
    /// batch; with nothing staged, no commit is made.
    pub fn commit(self) -> Result<()> {
        if self.writes.is_empty() && self.deletes.is_empty() {
            return Ok(());
        }
        let count = self.writes.len() + self.deletes.len();
        let message = format!("Notes batch update ({} changes)", count);
        self.space.mutate(&self.writes, &self.deletes, &message)
    }
}

// ---------------------------------------------------------------------------
// Tree plumbing
// ---------------------------------------------------------------------------

fn tree_entries(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
) -> Result<Vec<(String, git2::Oid, u32)>> {
    let tree = repo.find_tree(tree_oid).map_err(Error::store)?;
    Ok(tree
        .iter()
        .map(|e| {
            (
                e.name().unwrap_or("").to_string(),
                e.id(),
                e.filemode() as u32,
            )
        })
        .collect())
}

/// Locate the note blob for `hash`, flat entries first, then 2/38 fanout.
fn find_note(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    hash: &str,
) -> Result<Option<git2::Oid>> {
    let tree = repo.find_tree(tree_oid).map_err(Error::store)?;

    if let Some(entry) = tree.get_name(hash) {
        if entry.filemode() as u32 != MODE_DIR {
            return Ok(Some(entry.id()));
        }
    }

    let (prefix, suffix) = hash.split_at(2);
    if let Some(entry) = tree.get_name(prefix) {
        if entry.filemode() as u32 == MODE_DIR {
            let subtree = repo.find_tree(entry.id()).map_err(Error::store)?;
            let sub_entry = subtree.get_name(suffix);
            if let Some(sub) = sub_entry {
                let sub_id = sub.id();
                return Ok(Some(sub_id));
            }
        }
    }

    Ok(None)
}

/// Every `(hash, blob_oid)` in the namespace tree, from both layouts.
fn all_notes(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
) -> Result<BTreeMap<String, git2::Oid>> {
    let mut out = BTreeMap::new();
    for (name, oid, mode) in tree_entries(repo, tree_oid)? {
        if mode == MODE_DIR && name.len() == 2 {
            for (sub_name, sub_oid, _) in tree_entries(repo, oid)? {
                let full = format!("{}{}", name, sub_name);
                if is_hex40(&full) {
                    out.insert(full, sub_oid);
                }
            }
        } else if is_hex40(&name) {
            out.insert(name, oid);
        }
    }
    Ok(out)
}

/// Remove the 2/38 fanout entry for `hash`, if present, pruning a fanout
/// subtree that becomes empty. Returns whether an entry was removed.
fn remove_fanout_entry(
    repo: &git2::Repository,
    entries: &mut BTreeMap<String, (git2::Oid, u32)>,
    hash: &str,
) -> Result<bool> {
    let (prefix, suffix) = hash.split_at(2);
    let Some(&(subtree_oid, mode)) = entries.get(prefix) else {
        return Ok(false);
    };
    if mode != MODE_DIR {
        return Ok(false);
    }

    let children = tree_entries(repo, subtree_oid)?;
    if !children.iter().any(|(name, _, _)| name == suffix) {
        return Ok(false);
    }

    let kept: Vec<_> = children
        .into_iter()
        .filter(|(name, _, _)| name != suffix)
        .collect();
    if kept.is_empty() {
        entries.remove(prefix);
    } else {
        let mut builder = repo.treebuilder(None).map_err(Error::store)?;
        for (name, oid, mode) in &kept {
            builder
                .insert(name, *oid, *mode as i32)
                .map_err(Error::store)?;
        }
        let new_subtree = builder.write().map_err(Error::store)?;
        entries.insert(prefix.to_string(), (new_subtree, MODE_DIR));
    }
    Ok(true)
}

/// Build the new namespace tree: deletes first (either layout), then flat
/// writes with fanout scrubbing.
fn build_note_tree(
    repo: &git2::Repository,
    base_tree: Option<git2::Oid>,
    writes: &[(String, String)],
    deletes: &[String],
) -> Result<git2::Oid> {
    let mut entries: BTreeMap<String, (git2::Oid, u32)> = BTreeMap::new();
    if let Some(base) = base_tree {
        for (name, oid, mode) in tree_entries(repo, base)? {
            entries.insert(name, (oid, mode));
        }
    }

    for hash in deletes {
        let flat = matches!(entries.get(hash), Some(&(_, mode)) if mode != MODE_DIR);
        if flat {
            entries.remove(hash);
            continue;
        }
        if !remove_fanout_entry(repo, &mut entries, hash)? {
            return Err(Error::key_not_found(hash));
        }
    }

    for (hash, text) in writes {
        let blob = repo.blob(text.as_bytes()).map_err(Error::store)?;
        remove_fanout_entry(repo, &mut entries, hash)?;
        entries.insert(hash.clone(), (blob, MODE_FILE));
    }

    let mut builder = repo.treebuilder(None).map_err(Error::store)?;
    for (name, (oid, mode)) in &entries {
        builder
            .insert(name, *oid, *mode as i32)
            .map_err(Error::store)?;
    }
    builder.write().map_err(Error::store)
}
