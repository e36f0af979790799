//! Buffered writers over [`Snapshot`] and [`Batch`].
//!
//! Both implement [`std::io::Write`] and hold bytes in memory until an
//! explicit `close()`. Closing twice is a no-op; writing after close is an
//! error. Dropping an unclosed writer discards its buffer; there is no
//! commit-on-drop, since a silent commit would hide CAS failures.

use std::io;

use crate::batch::Batch;
use crate::error::Result;
use crate::snapshot::{Snapshot, WriteOptions};

/// Buffered writer that performs a single snapshot write on close.
///
/// ```rust,no_run
/// use std::io::Write;
/// use gitvault::{Vault, OpenOptions};
///
/// let vault = Vault::open("/tmp/repo", OpenOptions::default()).unwrap();
/// let snap = vault.branches().get("main").unwrap();
/// let mut writer = snap.writer("out.bin").unwrap();
/// writer.write_all(b"part one, ").unwrap();
/// writer.write_all(b"part two").unwrap();
/// let next = writer.close().unwrap();
/// assert_eq!(next.read_text("out.bin").unwrap(), "part one, part two");
/// ```
#[derive(Debug)]
pub struct SnapshotWriter {
    snapshot: Snapshot,
    path: String,
    buffer: Vec<u8>,
    result: Option<Snapshot>,
}

impl SnapshotWriter {
    pub(crate) fn new(snapshot: Snapshot, path: String) -> Self {
        Self {
            snapshot,
            path,
            buffer: Vec::new(),
            result: None,
        }
    }

    /// Whether `close()` has run.
    pub fn closed(&self) -> bool {
        self.result.is_some()
    }

    /// Concatenate the buffered chunks, write them, and return the new
    /// snapshot. A second close returns the same snapshot without writing.
    pub fn close(&mut self) -> Result<Snapshot> {
        if let Some(ref done) = self.result {
            return Ok(done.clone());
        }
        let data = std::mem::take(&mut self.buffer);
        let next = self
            .snapshot
            .write(&self.path, &data, WriteOptions::default())?;
        self.result = Some(next.clone());
        Ok(next)
    }
}

impl io::Write for SnapshotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "write on closed writer",
            ));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffered writer that stages into a [`Batch`] on close.
pub struct BatchWriter<'a> {
    batch: &'a mut Batch,
    path: String,
    buffer: Vec<u8>,
    closed: bool,
}

impl<'a> BatchWriter<'a> {
    pub(crate) fn new(batch: &'a mut Batch, path: String) -> Self {
        Self {
            batch,
            path,
            buffer: Vec::new(),
            closed: false,
        }
    }

    /// Whether `close()` has run.
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Stage the buffered bytes into the batch. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buffer);
        self.batch.write(&self.path, &data)?;
        self.closed = true;
        Ok(())
    }
}

impl io::Write for BatchWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "write on closed writer",
            ));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
