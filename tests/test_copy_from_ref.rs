mod common;

use gitvault::snapshot::CopyFromRefOptions;
use gitvault::*;

fn two_branches(dir: &std::path::Path) -> (Vault, Snapshot, Snapshot) {
    let vault = common::create_vault(dir, "src");
    let src = vault.branches().get("src").unwrap();
    let src = src.write("big.bin", &vec![7u8; 1024], Default::default()).unwrap();
    let src = src.write("docs/a.md", b"a", Default::default()).unwrap();
    let src = src.write("docs/deep/b.md", b"b", Default::default()).unwrap();

    let root = vault.branches().get("src").unwrap().back(3).unwrap();
    vault.branches().set("dst", &root).unwrap();
    let dst = vault.branches().get("dst").unwrap();
    (vault, src, dst)
}

// ---------------------------------------------------------------------------
// oid sharing
// ---------------------------------------------------------------------------

#[test]
fn copies_file_by_oid() {
    let dir = tempfile::tempdir().unwrap();
    let (_, src, dst) = two_branches(dir.path());

    let next = dst
        .copy_from_ref(&src, &["big.bin"], "", Default::default())
        .unwrap();

    // Same blob oid on both branches: the bytes were never re-read or
    // re-hashed.
    assert_eq!(
        next.object_hash("big.bin").unwrap(),
        src.object_hash("big.bin").unwrap()
    );
    assert_eq!(next.changes().unwrap().add.len(), 1);
}

#[test]
fn copies_directory_under_its_name() {
    let dir = tempfile::tempdir().unwrap();
    let (_, src, dst) = two_branches(dir.path());

    let next = dst
        .copy_from_ref(&src, &["docs"], "mirror", Default::default())
        .unwrap();
    assert_eq!(next.read_text("mirror/docs/a.md").unwrap(), "a");
    assert_eq!(next.read_text("mirror/docs/deep/b.md").unwrap(), "b");
    // The whole unchanged subtree is shared.
    assert_eq!(
        next.object_hash("mirror/docs").unwrap(),
        src.object_hash("docs").unwrap()
    );
}

#[test]
fn trailing_slash_copies_contents() {
    let dir = tempfile::tempdir().unwrap();
    let (_, src, dst) = two_branches(dir.path());

    let next = dst
        .copy_from_ref(&src, &["docs/"], "flat", Default::default())
        .unwrap();
    assert_eq!(next.read_text("flat/a.md").unwrap(), "a");
    assert!(!next.exists("flat/docs").unwrap());
}

#[test]
fn empty_source_copies_root_contents() {
    let dir = tempfile::tempdir().unwrap();
    let (_, src, dst) = two_branches(dir.path());

    let next = dst
        .copy_from_ref(&src, &[""], "", Default::default())
        .unwrap();
    assert!(next.exists("big.bin").unwrap());
    assert!(next.exists("docs/a.md").unwrap());
}

// ---------------------------------------------------------------------------
// delete / dry-run / errors
// ---------------------------------------------------------------------------

#[test]
fn delete_syncs_destination() {
    let dir = tempfile::tempdir().unwrap();
    let (_, src, dst) = two_branches(dir.path());
    let dst = dst.write("mirror/stale.txt", b"x", Default::default()).unwrap();

    let next = dst
        .copy_from_ref(
            &src,
            &["docs/"],
            "mirror",
            CopyFromRefOptions {
                delete: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(next.exists("mirror/a.md").unwrap());
    assert!(!next.exists("mirror/stale.txt").unwrap());
    assert_eq!(next.changes().unwrap().delete.len(), 1);
}

#[test]
fn dry_run_reports_without_commit() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, src, dst) = two_branches(dir.path());

    let preview = dst
        .copy_from_ref(
            &src,
            &["big.bin"],
            "",
            CopyFromRefOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(preview.commit_hash(), dst.commit_hash());
    assert_eq!(preview.changes().unwrap().add.len(), 1);
    assert!(!vault.branches().get("dst").unwrap().exists("big.bin").unwrap());
}

#[test]
fn identical_destination_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (_, src, dst) = two_branches(dir.path());

    let once = dst
        .copy_from_ref(&src, &["docs"], "", Default::default())
        .unwrap();
    let twice = once
        .copy_from_ref(&src, &["docs"], "", Default::default())
        .unwrap();
    assert_eq!(twice.commit_hash(), once.commit_hash());
}

#[test]
fn missing_source_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, src, dst) = two_branches(dir.path());
    assert!(matches!(
        dst.copy_from_ref(&src, &["ghost"], "", Default::default())
            .unwrap_err(),
        Error::NotFound(_)
    ));
}

#[test]
fn foreign_store_source_fails() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (_, _, dst) = two_branches(dir_a.path());
    let other_vault = common::create_vault(dir_b.path(), "main");
    let foreign = other_vault.branches().get("main").unwrap();

    assert!(matches!(
        dst.copy_from_ref(&foreign, &[""], "", Default::default())
            .unwrap_err(),
        Error::InvalidPath(_)
    ));
}

#[test]
fn readonly_destination_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, src, _) = two_branches(dir.path());
    vault.tags().set("pin", &src).unwrap();
    let tag = vault.tags().get("pin").unwrap();

    assert!(matches!(
        tag.copy_from_ref(&src, &[""], "", Default::default())
            .unwrap_err(),
        Error::PermissionDenied(_)
    ));
}

#[test]
fn copy_from_tag_source_works() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, src, dst) = two_branches(dir.path());
    vault.tags().set("v1", &src).unwrap();
    let tag = vault.tags().get("v1").unwrap();

    let next = dst
        .copy_from_ref(&tag, &["big.bin"], "", Default::default())
        .unwrap();
    assert_eq!(
        next.object_hash("big.bin").unwrap(),
        src.object_hash("big.bin").unwrap()
    );
}
