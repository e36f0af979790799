mod common;

use gitvault::*;

fn globbed_vault(dir: &std::path::Path) -> Snapshot {
    let vault = common::create_vault(dir, "main");
    let snap = vault.branches().get("main").unwrap();
    let mut batch = snap.batch(Default::default());
    batch.write("readme.md", b"r").unwrap();
    batch.write("notes.txt", b"n").unwrap();
    batch.write(".hidden", b"h").unwrap();
    batch.write("src/main.rs", b"m").unwrap();
    batch.write("src/lib.rs", b"l").unwrap();
    batch.write("src/nested/util.rs", b"u").unwrap();
    batch.write(".git-like/config", b"c").unwrap();
    batch.commit().unwrap();
    vault.branches().get("main").unwrap()
}

// ---------------------------------------------------------------------------
// single-segment patterns
// ---------------------------------------------------------------------------

#[test]
fn star_matches_toplevel_files() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    assert_eq!(snap.glob("*").unwrap(), vec!["notes.txt", "readme.md"]);
}

#[test]
fn star_skips_dotfiles() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    assert!(!snap.glob("*").unwrap().iter().any(|p| p == ".hidden"));
    assert_eq!(snap.glob(".*").unwrap(), vec![".hidden"]);
}

#[test]
fn extension_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    assert_eq!(snap.glob("*.md").unwrap(), vec!["readme.md"]);
}

#[test]
fn directory_segment_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    assert_eq!(snap.glob("src/*.rs").unwrap(), vec!["src/lib.rs", "src/main.rs"]);
}

#[test]
fn question_and_class() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    assert_eq!(snap.glob("src/?ain.rs").unwrap(), vec!["src/main.rs"]);
    assert_eq!(snap.glob("src/[lm]*.rs").unwrap(), vec!["src/lib.rs", "src/main.rs"]);
}

// ---------------------------------------------------------------------------
// ** patterns
// ---------------------------------------------------------------------------

#[test]
fn double_star_spans_levels() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    assert_eq!(
        snap.glob("**/*.rs").unwrap(),
        vec!["src/lib.rs", "src/main.rs", "src/nested/util.rs"]
    );
}

#[test]
fn double_star_matches_zero_levels() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    let all = snap.glob("**/*").unwrap();
    assert!(all.contains(&"readme.md".to_string()));
    assert!(all.contains(&"src/nested/util.rs".to_string()));
}

#[test]
fn double_star_skips_dot_directories() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    let all = snap.glob("**/*").unwrap();
    assert!(!all.iter().any(|p| p.starts_with(".git-like")));
}

#[test]
fn glob_results_are_sorted_unique() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    let results = snap.glob("**/*.rs").unwrap();
    let mut sorted = results.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(results, sorted);
}

#[test]
fn no_match_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    assert!(snap.glob("*.cpp").unwrap().is_empty());
    assert!(snap.glob("ghost/*").unwrap().is_empty());
}

#[test]
fn directories_are_not_reported() {
    let dir = tempfile::tempdir().unwrap();
    let snap = globbed_vault(dir.path());
    // "src" names a directory: globs yield files only.
    assert!(!snap.glob("*").unwrap().contains(&"src".to_string()));
}
