//! Tree engine: path-indexed reads over git trees and the recursive rebuild
//! that turns staged writes/removes into a new root tree.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{DirListing, TreeItem, MODE_DIR, MODE_EXEC, MODE_FILE, MODE_SYMLINK};

/// `(oid, mode)` of one resolved tree entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryRef {
    pub oid: git2::Oid,
    pub mode: u32,
}

impl EntryRef {
    pub fn is_tree(&self) -> bool {
        self.mode == MODE_DIR
    }
}

/// A staged blob reference destined for the rebuilt tree. Holds only the
/// object id and mode; content lives in the object store already.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingWrite {
    pub oid: git2::Oid,
    pub mode: u32,
}

/// One staged change: write (`Some`) or remove (`None`) at a store path.
pub(crate) type Change = (String, Option<PendingWrite>);

fn entries_of(repo: &git2::Repository, tree_oid: git2::Oid) -> Result<Vec<TreeItem>> {
    let tree = repo.find_tree(tree_oid).map_err(Error::store)?;
    let mut items = Vec::with_capacity(tree.len());
    for entry in tree.iter() {
        items.push(TreeItem {
            name: entry.name().unwrap_or("").to_string(),
            oid: entry.id(),
            mode: entry.filemode() as u32,
        });
    }
    Ok(items)
}

/// Resolve `path` against the tree rooted at `root`, returning the entry or
/// `None` when any segment is missing or crosses a non-tree.
pub(crate) fn lookup(
    repo: &git2::Repository,
    root: git2::Oid,
    path: &str,
) -> Result<Option<EntryRef>> {
    let normalized = crate::path::normalize(path)?;
    if normalized.is_empty() {
        return Ok(Some(EntryRef {
            oid: root,
            mode: MODE_DIR,
        }));
    }

    let mut current = root;
    let mut segments = normalized.split('/').peekable();

    while let Some(segment) = segments.next() {
        let tree = repo.find_tree(current).map_err(Error::store)?;
        let entry = match tree.get_name(segment) {
            Some(e) => EntryRef {
                oid: e.id(),
                mode: e.filemode() as u32,
            },
            None => return Ok(None),
        };

        if segments.peek().is_none() {
            return Ok(Some(entry));
        }
        if !entry.is_tree() {
            return Ok(None);
        }
        current = entry.oid;
    }

    Ok(None)
}

/// Like [`lookup`], but distinguishes failure modes: a missing segment is
/// [`Error::NotFound`], an intermediate non-tree is [`Error::NotADirectory`].
pub(crate) fn walk_to(
    repo: &git2::Repository,
    root: git2::Oid,
    path: &str,
) -> Result<EntryRef> {
    let normalized = crate::path::normalize(path)?;
    if normalized.is_empty() {
        return Ok(EntryRef {
            oid: root,
            mode: MODE_DIR,
        });
    }

    let segments: Vec<&str> = normalized.split('/').collect();
    let mut current = EntryRef {
        oid: root,
        mode: MODE_DIR,
    };

    for (i, segment) in segments.iter().enumerate() {
        if !current.is_tree() {
            return Err(Error::not_a_directory(segments[..i].join("/")));
        }
        let tree = repo.find_tree(current.oid).map_err(Error::store)?;
        current = match tree.get_name(segment) {
            Some(e) => EntryRef {
                oid: e.id(),
                mode: e.filemode() as u32,
            },
            None => return Err(Error::not_found(segments[..=i].join("/"))),
        };
    }

    Ok(current)
}

/// Read the blob at `path`.
pub(crate) fn read_blob(
    repo: &git2::Repository,
    root: git2::Oid,
    path: &str,
) -> Result<Vec<u8>> {
    let entry = walk_to(repo, root, path)?;
    if entry.is_tree() {
        return Err(Error::is_a_directory(path));
    }
    let blob = repo.find_blob(entry.oid).map_err(Error::store)?;
    Ok(blob.content().to_vec())
}

/// Resolve `path` to a subtree oid; the root path resolves to `root` itself.
pub(crate) fn subtree_at(
    repo: &git2::Repository,
    root: git2::Oid,
    path: &str,
) -> Result<git2::Oid> {
    if crate::path::is_root(path) {
        return Ok(root);
    }
    let entry = lookup(repo, root, path)?.ok_or_else(|| Error::not_found(path))?;
    if !entry.is_tree() {
        return Err(Error::not_a_directory(path));
    }
    Ok(entry.oid)
}

/// Immediate children of the directory at `path`.
pub(crate) fn list_dir(
    repo: &git2::Repository,
    root: git2::Oid,
    path: &str,
) -> Result<Vec<TreeItem>> {
    let oid = subtree_at(repo, root, path)?;
    entries_of(repo, oid)
}

/// All non-tree entries under `tree_oid`, depth-first, as
/// `(full_path, item)` pairs. Directories are traversed, not emitted.
pub(crate) fn walk_files(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
) -> Result<Vec<(String, TreeItem)>> {
    fn descend(
        repo: &git2::Repository,
        tree_oid: git2::Oid,
        prefix: &str,
        out: &mut Vec<(String, TreeItem)>,
    ) -> Result<()> {
        for item in entries_of(repo, tree_oid)? {
            let full = crate::path::join(prefix, &item.name);
            if item.mode == MODE_DIR {
                descend(repo, item.oid, &full, out)?;
            } else {
                out.push((full, item));
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    descend(repo, tree_oid, "", &mut out)?;
    Ok(out)
}

/// `{rel_path: (oid, mode)}` for all files under the subtree at `path`.
/// Missing or non-tree paths yield an empty map.
pub(crate) fn subtree_files(
    repo: &git2::Repository,
    root: git2::Oid,
    path: &str,
) -> Result<BTreeMap<String, EntryRef>> {
    let oid = if crate::path::is_root(path) {
        Some(root)
    } else {
        lookup(repo, root, path)?.and_then(|e| e.is_tree().then_some(e.oid))
    };

    let mut out = BTreeMap::new();
    if let Some(oid) = oid {
        for (rel, item) in walk_files(repo, oid)? {
            out.insert(
                rel,
                EntryRef {
                    oid: item.oid,
                    mode: item.mode,
                },
            );
        }
    }
    Ok(out)
}

/// os.walk-style traversal: one [`DirListing`] per directory, parents before
/// children.
pub(crate) fn walk_dirs(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
) -> Result<Vec<DirListing>> {
    fn descend(
        repo: &git2::Repository,
        tree_oid: git2::Oid,
        prefix: &str,
        out: &mut Vec<DirListing>,
    ) -> Result<()> {
        let mut listing = DirListing {
            dirpath: prefix.to_string(),
            dirnames: Vec::new(),
            files: Vec::new(),
        };
        let mut subdirs: Vec<(String, git2::Oid)> = Vec::new();

        for item in entries_of(repo, tree_oid)? {
            if item.mode == MODE_DIR {
                listing.dirnames.push(item.name.clone());
                subdirs.push((item.name, item.oid));
            } else {
                listing.files.push(item);
            }
        }

        out.push(listing);
        for (name, oid) in subdirs {
            let sub_prefix = crate::path::join(prefix, &name);
            descend(repo, oid, &sub_prefix, out)?;
        }
        Ok(())
    }

    let mut out = Vec::new();
    descend(repo, tree_oid, "", &mut out)?;
    Ok(out)
}

/// Number of immediate subdirectories, for directory `nlink` values.
pub(crate) fn count_subdirs(repo: &git2::Repository, tree_oid: git2::Oid) -> Result<u32> {
    let tree = repo.find_tree(tree_oid).map_err(Error::store)?;
    Ok(tree
        .iter()
        .filter(|e| e.filemode() as u32 == MODE_DIR)
        .count() as u32)
}

/// Apply `changes` to the tree at `base`, returning the new root tree oid.
///
/// Only the ancestor chain of changed leaves is rewritten; untouched sibling
/// subtrees are carried over by oid. Writing over a tree entry replaces it
/// (tree to blob), writing below a blob entry discards it (blob to tree),
/// removes of missing leaves are no-ops, and subtrees left empty are pruned
/// from their parent.
pub(crate) fn rebuild(
    repo: &git2::Repository,
    base: Option<git2::Oid>,
    changes: &[Change],
) -> Result<git2::Oid> {
    // Partition into this level's leaf operations and per-subdirectory
    // change lists.
    let mut leaf_ops: BTreeMap<&str, Option<PendingWrite>> = BTreeMap::new();
    let mut nested: BTreeMap<&str, Vec<Change>> = BTreeMap::new();

    for (path, op) in changes {
        match path.split_once('/') {
            Some((dir, rest)) => nested
                .entry(dir)
                .or_default()
                .push((rest.to_string(), *op)),
            None => {
                leaf_ops.insert(path, *op);
            }
        }
    }

    let mut entries: BTreeMap<String, (git2::Oid, u32)> = BTreeMap::new();
    if let Some(base_oid) = base {
        for item in entries_of(repo, base_oid)? {
            entries.insert(item.name, (item.oid, item.mode));
        }
    }

    for (name, op) in leaf_ops {
        match op {
            Some(write) => {
                entries.insert(name.to_string(), (write.oid, write.mode));
            }
            None => {
                entries.remove(name);
            }
        }
    }

    for (dir, sub_changes) in nested {
        // A non-tree entry in the way of a subdirectory gives way to it.
        let existing_subtree = match entries.get(dir) {
            Some(&(oid, mode)) if mode == MODE_DIR => Some(oid),
            Some(_) => {
                entries.remove(dir);
                None
            }
            None => None,
        };

        let new_subtree = rebuild(repo, existing_subtree, &sub_changes)?;
        let subtree_len = repo.find_tree(new_subtree).map_err(Error::store)?.len();
        if subtree_len == 0 {
            entries.remove(dir);
        } else {
            entries.insert(dir.to_string(), (new_subtree, MODE_DIR));
        }
    }

    let mut builder = repo.treebuilder(None).map_err(Error::store)?;
    for (name, (oid, mode)) in &entries {
        builder
            .insert(name, *oid, *mode as i32)
            .map_err(Error::store)?;
    }
    builder.write().map_err(Error::store)
}

/// Git filemode for a file on disk: symlink, executable (Unix), or regular.
pub(crate) fn mode_from_disk(path: &std::path::Path) -> Result<u32> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| Error::io_at(path, e))?;
    if meta.file_type().is_symlink() {
        return Ok(MODE_SYMLINK);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 != 0 {
            return Ok(MODE_EXEC);
        }
    }
    Ok(MODE_FILE)
}
