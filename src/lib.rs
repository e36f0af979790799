//! A versioned, content-addressed filesystem stored in a bare git
//! repository.
//!
//! `gitvault` turns a bare git object database into a persistent filesystem
//! with history: every write is an atomic commit, branches and tags name
//! immutable snapshots, the reflog backs undo/redo, git notes provide a
//! commit-keyed key-value layer, and whole stores mirror to other
//! repositories or bundle files. The on-disk format is plain git, so
//! ordinary git tooling can inspect and transport everything.
//!
//! # Key types
//!
//! - [`Vault`] -- opens (or creates) the bare repository and hands out
//!   branches, tags, and notes.
//! - [`Snapshot`] -- an immutable view of one committed tree. Reads never
//!   change state; writes commit and return a **new** snapshot.
//! - [`Batch`] -- stages several writes/removes for one atomic commit.
//! - [`RefMap`] -- dictionary-style branch and tag access.
//!
//! # Example
//!
//! ```rust,no_run
//! use gitvault::{OpenOptions, Vault};
//!
//! let vault = Vault::open(
//!     "/tmp/data.git",
//!     OpenOptions {
//!         create: true,
//!         branch: Some("main".into()),
//!         ..Default::default()
//!     },
//! )
//! .unwrap();
//!
//! let snap = vault.branches().get("main").unwrap();
//! let snap = snap.write("hello.txt", b"world", Default::default()).unwrap();
//! assert_eq!(snap.read_text("hello.txt").unwrap(), "world");
//! assert_eq!(snap.message().unwrap(), "+ hello.txt");
//! ```

pub mod batch;
pub mod error;
pub mod exclude;
pub mod glob;
pub mod lock;
pub mod mirror;
pub mod notes;
pub mod path;
pub mod reflog;
pub mod refs;
pub mod snapshot;
pub mod store;
pub mod transfer;
mod tree;
pub mod types;
pub mod writer;

pub use batch::{Batch, BatchOptions};
pub use error::{Error, Result};
pub use exclude::ExcludeFilter;
pub use glob::disk_iglob;
pub use mirror::{BackupOptions, RestoreOptions};
pub use notes::{NoteSpace, Notes, NotesBatch};
pub use refs::RefMap;
pub use snapshot::{retry_write, Snapshot};
pub use store::Vault;
pub use transfer::TransferOptions;
pub use types::*;
pub use writer::{BatchWriter, SnapshotWriter};
