mod common;

use gitvault::*;

// ---------------------------------------------------------------------------
// Helper: plant a note in 2/38 fanout layout directly with git2
// ---------------------------------------------------------------------------

fn create_fanout_note(vault: &Vault, namespace: &str, hash: &str, text: &str) {
    let repo = git2::Repository::open_bare(vault.path()).unwrap();
    let refname = format!("refs/notes/{}", namespace);

    let blob = repo.blob(text.as_bytes()).unwrap();
    let (prefix, suffix) = hash.split_at(2);

    // Subtree holding the 38-char entry.
    let mut sub = repo.treebuilder(None).unwrap();
    sub.insert(suffix, blob, 0o100644).unwrap();
    let sub_oid = sub.write().unwrap();

    // Root tree: existing entries plus the fanout directory.
    let parent = repo
        .find_reference(&refname)
        .ok()
        .and_then(|r| r.target())
        .map(|tip| repo.find_commit(tip).unwrap());
    let base_tree = parent.as_ref().map(|c| c.tree().unwrap());
    let mut root = repo.treebuilder(base_tree.as_ref()).unwrap();
    root.insert(prefix, sub_oid, 0o040000).unwrap();
    let root_oid = root.write().unwrap();

    let who = git2::Signature::now("planter", "planter@example.com").unwrap();
    let tree = repo.find_tree(root_oid).unwrap();
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let commit = repo
        .commit(None, &who, &who, "plant fanout note\n", &tree, &parents)
        .unwrap();
    repo.reference(&refname, commit, true, "plant fanout note")
        .unwrap();
}

fn commit_hash_of(vault: &Vault) -> String {
    vault.branches().get("main").unwrap().commit_hash()
}

// ---------------------------------------------------------------------------
// set / get / delete / contains
// ---------------------------------------------------------------------------

#[test]
fn set_then_get_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);

    let notes = vault.notes().commits();
    notes.set(&hash, "reviewed: ok").unwrap();
    assert_eq!(notes.get(&hash).unwrap(), "reviewed: ok");
    assert!(notes.contains(&hash).unwrap());
}

#[test]
fn get_missing_is_key_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);

    assert!(matches!(
        vault.notes().commits().get(&hash).unwrap_err(),
        Error::KeyNotFound(_)
    ));
}

#[test]
fn overwrite_replaces_text() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);
    let notes = vault.notes().commits();

    notes.set(&hash, "v1").unwrap();
    notes.set(&hash, "v2").unwrap();
    assert_eq!(notes.get(&hash).unwrap(), "v2");
}

#[test]
fn delete_removes_note() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);
    let notes = vault.notes().commits();

    notes.set(&hash, "temporary").unwrap();
    notes.delete(&hash).unwrap();
    assert!(!notes.contains(&hash).unwrap());
    assert!(matches!(
        notes.delete(&hash).unwrap_err(),
        Error::KeyNotFound(_)
    ));
}

#[test]
fn branch_name_resolves_to_commit() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);
    let notes = vault.notes().commits();

    notes.set("main", "note by branch name").unwrap();
    assert_eq!(notes.get(&hash).unwrap(), "note by branch name");
}

#[test]
fn unresolvable_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    assert!(matches!(
        vault.notes().commits().set("no-such-ref", "x").unwrap_err(),
        Error::KeyNotFound(_)
    ));
}

// ---------------------------------------------------------------------------
// namespaces and commit messages
// ---------------------------------------------------------------------------

#[test]
fn namespaces_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);

    vault.notes().commits().set(&hash, "default ns").unwrap();
    vault.notes().namespace("review").set(&hash, "review ns").unwrap();

    assert_eq!(vault.notes().commits().get(&hash).unwrap(), "default ns");
    assert_eq!(vault.notes().namespace("review").get(&hash).unwrap(), "review ns");
}

#[test]
fn note_commit_messages_follow_git_convention() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);
    let notes = vault.notes().commits();

    notes.set(&hash, "x").unwrap();
    {
        let repo = git2::Repository::open_bare(vault.path()).unwrap();
        let tip = repo
            .find_reference("refs/notes/commits")
            .unwrap()
            .target()
            .unwrap();
        let commit = repo.find_commit(tip).unwrap();
        assert_eq!(
            commit.message().unwrap().trim_end(),
            format!("Notes added by 'git notes' on {}", &hash[..7])
        );
        assert_eq!(commit.parent_count(), 0);
    }

    notes.delete(&hash).unwrap();
    {
        let repo = git2::Repository::open_bare(vault.path()).unwrap();
        let tip = repo
            .find_reference("refs/notes/commits")
            .unwrap()
            .target()
            .unwrap();
        let commit = repo.find_commit(tip).unwrap();
        assert_eq!(
            commit.message().unwrap().trim_end(),
            format!("Notes removed by 'git notes' on {}", &hash[..7])
        );
        // Each mutation chains onto the previous notes commit.
        assert_eq!(commit.parent_count(), 1);
    }
}

// ---------------------------------------------------------------------------
// list / len
// ---------------------------------------------------------------------------

#[test]
fn list_returns_sorted_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let notes = vault.notes().commits();

    let snap = vault.branches().get("main").unwrap();
    let s1 = snap.write("a.txt", b"a", Default::default()).unwrap();
    let s2 = s1.write("b.txt", b"b", Default::default()).unwrap();

    notes.set(&s2.commit_hash(), "two").unwrap();
    notes.set(&s1.commit_hash(), "one").unwrap();

    let mut expected = vec![s1.commit_hash(), s2.commit_hash()];
    expected.sort();
    assert_eq!(notes.list().unwrap(), expected);
    assert_eq!(notes.len().unwrap(), 2);
    assert!(!notes.is_empty().unwrap());
}

#[test]
fn empty_namespace_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let notes = vault.notes().namespace("vacant");
    assert!(notes.list().unwrap().is_empty());
    assert!(notes.is_empty().unwrap());
}

// ---------------------------------------------------------------------------
// fanout compatibility
// ---------------------------------------------------------------------------

#[test]
fn fanout_note_is_readable() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);

    create_fanout_note(&vault, "commits", &hash, "from fanout");
    let notes = vault.notes().commits();
    assert!(notes.contains(&hash).unwrap());
    assert_eq!(notes.get(&hash).unwrap(), "from fanout");
    assert_eq!(notes.list().unwrap(), vec![hash]);
}

#[test]
fn overwriting_fanout_note_flattens_it() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);

    create_fanout_note(&vault, "commits", &hash, "v1");
    let notes = vault.notes().commits();
    notes.set(&hash, "v2").unwrap();
    assert_eq!(notes.get(&hash).unwrap(), "v2");

    // The new tree holds a flat entry and no fanout remnant.
    let repo = git2::Repository::open_bare(vault.path()).unwrap();
    let tip = repo
        .find_reference("refs/notes/commits")
        .unwrap()
        .target()
        .unwrap();
    let tree = repo.find_commit(tip).unwrap().tree().unwrap();
    assert!(tree.get_name(&hash).is_some());
    assert!(tree.get_name(&hash[..2]).is_none());
}

#[test]
fn deleting_fanout_note_prunes_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);

    create_fanout_note(&vault, "commits", &hash, "doomed");
    vault.notes().commits().delete(&hash).unwrap();

    let repo = git2::Repository::open_bare(vault.path()).unwrap();
    let tip = repo
        .find_reference("refs/notes/commits")
        .unwrap()
        .target()
        .unwrap();
    let tree = repo.find_commit(tip).unwrap().tree().unwrap();
    assert!(tree.get_name(&hash[..2]).is_none());
    assert!(tree.get_name(&hash).is_none());
}

// ---------------------------------------------------------------------------
// batch
// ---------------------------------------------------------------------------

#[test]
fn notes_batch_commits_once() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let notes = vault.notes().commits();

    let snap = vault.branches().get("main").unwrap();
    let s1 = snap.write("a.txt", b"a", Default::default()).unwrap();
    let s2 = s1.write("b.txt", b"b", Default::default()).unwrap();

    let mut batch = notes.batch();
    batch.set(&s1.commit_hash(), "one").unwrap();
    batch.set(&s2.commit_hash(), "two").unwrap();
    batch.commit().unwrap();

    assert_eq!(notes.get(&s1.commit_hash()).unwrap(), "one");
    assert_eq!(notes.get(&s2.commit_hash()).unwrap(), "two");

    let repo = git2::Repository::open_bare(vault.path()).unwrap();
    let tip = repo
        .find_reference("refs/notes/commits")
        .unwrap()
        .target()
        .unwrap();
    let commit = repo.find_commit(tip).unwrap();
    assert_eq!(
        commit.message().unwrap().trim_end(),
        "Notes batch update (2 changes)"
    );
    assert_eq!(commit.parent_count(), 0);
}

#[test]
fn notes_batch_set_then_delete_cancels() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let hash = commit_hash_of(&vault);
    let notes = vault.notes().commits();
    notes.set(&hash, "existing").unwrap();

    let mut batch = notes.batch();
    batch.set(&hash, "replaced").unwrap();
    batch.delete(&hash).unwrap();
    batch.commit().unwrap();

    assert!(!notes.contains(&hash).unwrap());
}

#[test]
fn empty_notes_batch_makes_no_commit() {
    let dir = tempfile::tempdir().unwrap();
    let vault = common::create_vault(dir.path(), "main");
    let notes = vault.notes().commits();
    notes.batch().commit().unwrap();

    let repo = git2::Repository::open_bare(vault.path()).unwrap();
    assert!(repo.find_reference("refs/notes/commits").is_err());
}
