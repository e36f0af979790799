use std::path::PathBuf;

// ---------------------------------------------------------------------------
// File modes
// ---------------------------------------------------------------------------

/// Regular (non-executable) blob mode.
pub const MODE_FILE: u32 = 0o100644;
/// Executable blob mode.
pub const MODE_EXEC: u32 = 0o100755;
/// Symbolic link mode.
pub const MODE_SYMLINK: u32 = 0o120000;
/// Tree (directory) mode.
pub const MODE_DIR: u32 = 0o040000;

// ---------------------------------------------------------------------------
// FileType
// ---------------------------------------------------------------------------

/// What kind of object a tree entry points at.
///
/// Conversions to and from raw git filemodes are bijective over the closed
/// set of modes gitvault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Regular file (`0o100644`).
    Regular,
    /// Executable file (`0o100755`).
    Executable,
    /// Symbolic link (`0o120000`).
    Symlink,
    /// Directory (`0o040000`).
    Directory,
}

impl FileType {
    /// Parse a raw git filemode. `None` for modes outside the closed set
    /// (e.g. gitlink/submodule entries).
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode {
            MODE_FILE => Some(Self::Regular),
            MODE_EXEC => Some(Self::Executable),
            MODE_SYMLINK => Some(Self::Symlink),
            MODE_DIR => Some(Self::Directory),
            _ => None,
        }
    }

    /// The raw git filemode for this type.
    pub fn mode(self) -> u32 {
        match self {
            Self::Regular => MODE_FILE,
            Self::Executable => MODE_EXEC,
            Self::Symlink => MODE_SYMLINK,
            Self::Directory => MODE_DIR,
        }
    }

    /// `true` for regular and executable files.
    pub fn is_file(self) -> bool {
        matches!(self, Self::Regular | Self::Executable)
    }

    pub fn is_dir(self) -> bool {
        matches!(self, Self::Directory)
    }

    pub fn is_symlink(self) -> bool {
        matches!(self, Self::Symlink)
    }
}

// ---------------------------------------------------------------------------
// Tree listing items
// ---------------------------------------------------------------------------

/// One tree entry as seen by `ls`-style and walk operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    /// Entry basename.
    pub name: String,
    /// Object id of the entry.
    pub oid: git2::Oid,
    /// Raw git filemode.
    pub mode: u32,
}

impl TreeItem {
    /// The parsed [`FileType`], or `None` for unknown modes.
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }
}

/// One directory visited by an os.walk-style traversal: the directory path,
/// its subdirectory names, and its non-directory entries.
#[derive(Debug, Clone)]
pub struct DirListing {
    /// Slash-separated path of this directory; empty string for the root.
    pub dirpath: String,
    /// Names of immediate subdirectories.
    pub dirnames: Vec<String>,
    /// Immediate non-directory entries.
    pub files: Vec<TreeItem>,
}

// ---------------------------------------------------------------------------
// StatResult
// ---------------------------------------------------------------------------

/// Single-call attribute lookup, shaped for FUSE-style adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatResult {
    /// Raw git filemode.
    pub mode: u32,
    pub file_type: FileType,
    /// Blob length in bytes; 0 for directories.
    pub size: u64,
    /// 40-char hex SHA of the object at the path.
    pub hash: String,
    /// 1 for files and symlinks, 2 + subdirectory count for directories.
    pub nlink: u32,
    /// Committer time of the snapshot's commit, POSIX epoch seconds.
    pub mtime: u64,
}

// ---------------------------------------------------------------------------
// Write payloads
// ---------------------------------------------------------------------------

/// A fully-specified entry to write: blob bytes or a symlink target, plus
/// the filemode.
#[derive(Debug, Clone)]
pub struct WriteEntry {
    /// Blob content; `None` for symlinks.
    pub data: Option<Vec<u8>>,
    /// Symlink target; `None` for blobs.
    pub target: Option<String>,
    /// Git filemode.
    pub mode: u32,
}

impl WriteEntry {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            target: None,
            mode: MODE_FILE,
        }
    }

    pub fn executable(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            target: None,
            mode: MODE_EXEC,
        }
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        Self {
            data: None,
            target: Some(target.into()),
            mode: MODE_SYMLINK,
        }
    }

    /// Reject entries whose mode and payload disagree.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;
        match self.mode {
            MODE_SYMLINK => {
                if self.target.is_none() || self.data.is_some() {
                    return Err(Error::invalid_path("symlink entry requires a target and no data"));
                }
            }
            MODE_FILE | MODE_EXEC => {
                if self.data.is_none() || self.target.is_some() {
                    return Err(Error::invalid_path("blob entry requires data and no target"));
                }
            }
            other => {
                return Err(Error::invalid_path(format!("unsupported mode: {:#o}", other)));
            }
        }
        Ok(())
    }
}

/// Tagged write payload accepted by [`Snapshot::apply`](crate::Snapshot::apply).
#[derive(Debug, Clone)]
pub enum WriteValue {
    /// Raw bytes, written as a regular file.
    Bytes(Vec<u8>),
    /// UTF-8 text, written as a regular file.
    Text(String),
    /// Fully-specified entry (mode, symlink target).
    Entry(WriteEntry),
}

impl WriteValue {
    pub(crate) fn into_entry(self) -> crate::error::Result<WriteEntry> {
        let entry = match self {
            WriteValue::Bytes(data) => WriteEntry::bytes(data),
            WriteValue::Text(text) => WriteEntry::bytes(text.into_bytes()),
            WriteValue::Entry(entry) => entry,
        };
        entry.validate()?;
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// ChangeReport
// ---------------------------------------------------------------------------

/// One file touched by a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path within the store (or relative path on disk for copy-out).
    pub path: String,
    pub file_type: FileType,
    /// Where the content came from, for disk transfers.
    pub src: Option<PathBuf>,
}

impl FileChange {
    pub fn new(path: impl Into<String>, file_type: FileType) -> Self {
        Self {
            path: path.into(),
            file_type,
            src: None,
        }
    }

    pub fn from_source(
        path: impl Into<String>,
        file_type: FileType,
        src: impl Into<PathBuf>,
    ) -> Self {
        Self {
            path: path.into(),
            file_type,
            src: Some(src.into()),
        }
    }
}

impl PartialOrd for FileChange {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileChange {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path.cmp(&other.path)
    }
}

/// A per-file error collected when `ignore_errors` is set.
#[derive(Debug, Clone)]
pub struct ChangeError {
    pub path: String,
    pub error: String,
}

impl ChangeError {
    pub fn new(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            error: error.into(),
        }
    }
}

/// What a mutating operation did (or, for dry runs, would do).
#[derive(Debug, Clone, Default)]
pub struct ChangeReport {
    /// Paths that did not exist before.
    pub add: Vec<FileChange>,
    /// Paths whose `(oid, mode)` changed.
    pub update: Vec<FileChange>,
    /// Paths that were removed.
    pub delete: Vec<FileChange>,
    /// Non-fatal per-file errors (`ignore_errors` mode).
    pub errors: Vec<ChangeError>,
    /// Non-fatal warnings.
    pub warnings: Vec<ChangeError>,
}

impl ChangeReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when nothing changed.
    pub fn in_sync(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Total add + update + delete count.
    pub fn total(&self) -> usize {
        self.add.len() + self.update.len() + self.delete.len()
    }
}

// ---------------------------------------------------------------------------
// Signature / CommitInfo / ReflogEntry
// ---------------------------------------------------------------------------

/// Author/committer identity for commits the store creates.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    /// `"Name <email>"`, as it appears in reflog lines.
    pub fn ident(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            name: "gitvault".into(),
            email: "gitvault@localhost".into(),
        }
    }
}

/// One commit as reported by [`Snapshot::log`](crate::Snapshot::log).
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// 40-char hex commit SHA.
    pub commit_hash: String,
    /// Full commit message.
    pub message: String,
    /// Committer time, POSIX epoch seconds.
    pub time: u64,
    pub author_name: String,
    pub author_email: String,
}

/// One reflog line: a recorded branch movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    /// SHA before the update; all zeros at ref creation.
    pub old_sha: String,
    /// SHA after the update.
    pub new_sha: String,
    /// `"Name <email>"` of whoever moved the ref.
    pub committer: String,
    /// POSIX epoch seconds.
    pub timestamp: u64,
    /// Reflog message, e.g. `"commit: + file.txt"`.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Mirror types
// ---------------------------------------------------------------------------

/// One ref change planned or performed by backup/restore.
#[derive(Debug, Clone)]
pub struct RefChange {
    /// Full ref name, e.g. `"refs/heads/main"`.
    pub ref_name: String,
    /// SHA at the destination before; `None` for newly created refs.
    pub old_target: Option<String>,
    /// SHA after; `None` for deletions.
    pub new_target: Option<String>,
}

/// Ref-level difference between two repositories.
#[derive(Debug, Clone, Default)]
pub struct MirrorDiff {
    /// Refs only the source has.
    pub add: Vec<RefChange>,
    /// Refs present in both but pointing at different commits.
    pub update: Vec<RefChange>,
    /// Refs only the destination has.
    pub delete: Vec<RefChange>,
}

impl MirrorDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_sync(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn total(&self) -> usize {
        self.add.len() + self.update.len() + self.delete.len()
    }
}

// ---------------------------------------------------------------------------
// OpenOptions
// ---------------------------------------------------------------------------

/// Options for [`Vault::open`](crate::Vault::open).
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Create the repository if it does not exist.
    pub create: bool,
    /// Branch to initialize on create.
    pub branch: Option<String>,
    /// Default author name (falls back to `"gitvault"`).
    pub author: Option<String>,
    /// Default author email (falls back to `"gitvault@localhost"`).
    pub email: Option<String>,
}
