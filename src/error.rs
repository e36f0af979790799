/// All errors produced by gitvault.
///
/// One variant per semantic kind crossing the API boundary, so callers can
/// pattern-match instead of inspecting strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Write attempted on a read-only snapshot. A contract violation,
    /// not an I/O fault.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The branch moved underneath the snapshot between creation and write.
    #[error("stale snapshot: {0}")]
    StaleSnapshot(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("batch already committed")]
    BatchClosed,

    #[error("could not acquire repository lock: {0}")]
    LockTimeout(String),

    /// Failure inside the underlying git object store.
    #[error("object store error: {0}")]
    ObjectStore(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn stale_snapshot(msg: impl Into<String>) -> Self {
        Self::StaleSnapshot(msg.into())
    }

    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound(key.into())
    }

    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists(name.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn invalid_ref_name(name: impl Into<String>) -> Self {
        Self::InvalidRefName(name.into())
    }

    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Self::LockTimeout(msg.into())
    }

    /// Wrap an adapter failure.
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ObjectStore(Box::new(err))
    }

    /// Wrap an adapter failure described only by a message.
    pub fn store_msg(msg: impl Into<String>) -> Self {
        Self::ObjectStore(msg.into().into())
    }

    /// Attach a path to an io error for context.
    pub fn io_at(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.as_ref().display(), err),
        ))
    }
}
