mod common;

use gitvault::*;

// ---------------------------------------------------------------------------
// branches
// ---------------------------------------------------------------------------

#[test]
fn get_missing_branch_is_key_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    assert!(matches!(
        vault.branches().get("nope").unwrap_err(),
        Error::KeyNotFound(_)
    ));
}

#[test]
fn set_creates_branch_at_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    let snap = snap.write("a.txt", b"a", Default::default()).unwrap();

    vault.branches().set("feature", &snap).unwrap();

    let feature = vault.branches().get("feature").unwrap();
    assert_eq!(feature.commit_hash(), snap.commit_hash());
    assert!(feature.writable());
    assert_eq!(feature.ref_name(), Some("feature"));
}

#[test]
fn branches_diverge_independently() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.branches().set("feature", &snap).unwrap();

    let feature = vault.branches().get("feature").unwrap();
    feature.write("feature.txt", b"f", Default::default()).unwrap();

    let main = vault.branches().get("main").unwrap();
    assert!(!main.exists("feature.txt").unwrap());
    assert!(vault
        .branches()
        .get("feature")
        .unwrap()
        .exists("feature.txt")
        .unwrap());
}

#[test]
fn set_existing_branch_force_updates() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    let advanced = snap.write("a.txt", b"a", Default::default()).unwrap();

    vault.branches().set("other", &snap).unwrap();
    vault.branches().set("other", &advanced).unwrap();
    assert_eq!(
        vault.branches().get("other").unwrap().commit_hash(),
        advanced.commit_hash()
    );
}

#[test]
fn set_records_reflog_subject() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    vault.branches().set("copy", &snap).unwrap();
    let entries = vault.branches().reflog("copy").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "branch: Created from Initialize main");
}

#[test]
fn delete_branch() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.branches().set("doomed", &snap).unwrap();
    assert!(vault.branches().contains("doomed").unwrap());

    vault.branches().delete("doomed").unwrap();
    assert!(!vault.branches().contains("doomed").unwrap());
    assert!(matches!(
        vault.branches().delete("doomed").unwrap_err(),
        Error::KeyNotFound(_)
    ));
}

#[test]
fn list_is_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.branches().set("zeta", &snap).unwrap();
    vault.branches().set("alpha", &snap).unwrap();

    assert_eq!(vault.branches().list().unwrap(), vec!["alpha", "main", "zeta"]);
}

#[test]
fn entries_pairs_names_with_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.branches().set("dev", &snap).unwrap();

    let entries = vault.branches().entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "dev");
    assert_eq!(entries[0].1.commit_hash(), snap.commit_hash());
}

// ---------------------------------------------------------------------------
// HEAD
// ---------------------------------------------------------------------------

#[test]
fn current_follows_head() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.branches().set("dev", &snap).unwrap();

    assert_eq!(vault.branches().current_name().unwrap().as_deref(), Some("main"));

    vault.branches().set_current("dev").unwrap();
    assert_eq!(vault.branches().current_name().unwrap().as_deref(), Some("dev"));
    assert_eq!(
        vault.branches().current().unwrap().unwrap().commit_hash(),
        snap.commit_hash()
    );
}

#[test]
fn set_current_requires_existing_branch() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    assert!(matches!(
        vault.branches().set_current("ghost").unwrap_err(),
        Error::KeyNotFound(_)
    ));
}

#[test]
fn dangling_head_reports_name_but_no_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.branches().set("temp", &snap).unwrap();
    vault.branches().set_current("temp").unwrap();
    vault.branches().delete("temp").unwrap();

    assert_eq!(vault.branches().current_name().unwrap().as_deref(), Some("temp"));
    assert!(vault.branches().current().unwrap().is_none());
}

// ---------------------------------------------------------------------------
// tags
// ---------------------------------------------------------------------------

#[test]
fn tags_are_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    let snap = snap.write("a.txt", b"a", Default::default()).unwrap();

    vault.tags().set("v1.0", &snap).unwrap();
    let tag = vault.tags().get("v1.0").unwrap();
    assert!(!tag.writable());
    assert_eq!(tag.read_text("a.txt").unwrap(), "a");

    assert!(matches!(
        tag.write("b.txt", b"b", Default::default()).unwrap_err(),
        Error::PermissionDenied(_)
    ));
}

#[test]
fn tag_overwrite_fails() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.tags().set("v1", &snap).unwrap();

    let advanced = snap.write("a.txt", b"a", Default::default()).unwrap();
    assert!(matches!(
        vault.tags().set("v1", &advanced).unwrap_err(),
        Error::AlreadyExists(_)
    ));
}

#[test]
fn annotated_tag_peels_to_commit() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    let snap = snap.write("a.txt", b"a", Default::default()).unwrap();

    // Create an annotated tag object directly in the repository.
    {
        let repo = git2::Repository::open_bare(vault.path()).unwrap();
        let oid = git2::Oid::from_str(&snap.commit_hash()).unwrap();
        let target = repo.find_object(oid, None).unwrap();
        let tagger = git2::Signature::now("tagger", "tagger@example.com").unwrap();
        repo.tag("annotated", &target, &tagger, "release", false)
            .unwrap();
    }

    let tag = vault.tags().get("annotated").unwrap();
    assert_eq!(tag.commit_hash(), snap.commit_hash());
    assert!(!tag.writable());
}

#[test]
fn branches_and_tags_are_separate_namespaces() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();
    vault.tags().set("main", &snap).unwrap();

    assert!(vault.tags().contains("main").unwrap());
    assert_eq!(vault.tags().list().unwrap(), vec!["main"]);
    assert_eq!(vault.branches().list().unwrap(), vec!["main"]);
}

// ---------------------------------------------------------------------------
// name validation
// ---------------------------------------------------------------------------

#[test]
fn set_rejects_invalid_names() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let snap = vault.branches().get("main").unwrap();

    for bad in ["", "has space", "has:colon", "dots..", ".leading", "trailing.", "car^et"] {
        assert!(
            matches!(
                vault.branches().set(bad, &snap).unwrap_err(),
                Error::InvalidRefName(_)
            ),
            "{:?} should be rejected",
            bad
        );
    }
}

#[test]
fn set_rejects_foreign_snapshot() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let vault_a = common::create_vault(dir_a.path(), "main");
    let vault_b = common::create_vault(dir_b.path(), "main");

    let foreign = vault_b.branches().get("main").unwrap();
    assert!(vault_a.branches().set("stolen", &foreign).is_err());
}
