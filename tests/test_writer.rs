mod common;

use std::io::Write;

use gitvault::*;

// ---------------------------------------------------------------------------
// SnapshotWriter
// ---------------------------------------------------------------------------

#[test]
fn snapshot_writer_concatenates_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    let mut writer = snap.writer("out.bin").unwrap();
    writer.write_all(b"chunk one, ").unwrap();
    writer.write_all(b"chunk two").unwrap();
    let next = writer.close().unwrap();

    assert_eq!(next.read_text("out.bin").unwrap(), "chunk one, chunk two");
}

#[test]
fn snapshot_writer_double_close_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    let mut writer = snap.writer("once.txt").unwrap();
    writer.write_all(b"payload").unwrap();
    let first = writer.close().unwrap();
    let second = writer.close().unwrap();
    assert_eq!(first.commit_hash(), second.commit_hash());

    // Exactly one commit happened.
    let tip = vault.branches().get("main").unwrap();
    assert_eq!(tip.commit_hash(), first.commit_hash());
}

#[test]
fn snapshot_writer_write_after_close_fails() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    let mut writer = snap.writer("closed.txt").unwrap();
    writer.write_all(b"x").unwrap();
    writer.close().unwrap();
    assert!(writer.closed());
    assert!(writer.write_all(b"more").is_err());
}

#[test]
fn snapshot_writer_dropped_without_close_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    let base = snap.commit_hash();

    {
        let mut writer = snap.writer("discarded.txt").unwrap();
        writer.write_all(b"never committed").unwrap();
    }

    let tip = vault.branches().get("main").unwrap();
    assert_eq!(tip.commit_hash(), base);
    assert!(!tip.exists("discarded.txt").unwrap());
}

#[test]
fn snapshot_writer_on_readonly_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    let snap = snap.write("a.txt", b"a", Default::default()).unwrap();

    vault.tags().set("v1", &snap).unwrap();
    let tag = vault.tags().get("v1").unwrap();
    assert!(matches!(
        tag.writer("x.txt").unwrap_err(),
        Error::PermissionDenied(_)
    ));
}

// ---------------------------------------------------------------------------
// BatchWriter
// ---------------------------------------------------------------------------

#[test]
fn batch_writer_stages_into_batch() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    let mut batch = snap.batch(Default::default());
    {
        let mut writer = batch.writer("streamed.bin").unwrap();
        writer.write_all(b"abc").unwrap();
        writer.write_all(b"def").unwrap();
        writer.close().unwrap();
    }
    let next = batch.commit().unwrap();
    assert_eq!(next.read("streamed.bin").unwrap(), b"abcdef");
}

#[test]
fn batch_writer_unclosed_stages_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    let mut batch = snap.batch(Default::default());
    {
        let mut writer = batch.writer("lost.bin").unwrap();
        writer.write_all(b"bytes").unwrap();
        // dropped without close()
    }
    assert_eq!(batch.pending(), 0);
    let next = batch.commit().unwrap();
    assert_eq!(next.commit_hash(), snap.commit_hash());
}

#[test]
fn batch_writer_write_after_close_fails() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    let mut batch = snap.batch(Default::default());
    let mut writer = batch.writer("w.bin").unwrap();
    writer.write_all(b"x").unwrap();
    writer.close().unwrap();
    writer.close().unwrap(); // idempotent
    assert!(writer.write_all(b"y").is_err());
}
