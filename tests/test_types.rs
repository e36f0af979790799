use gitvault::*;

// ---------------------------------------------------------------------------
// FileType <-> mode
// ---------------------------------------------------------------------------

#[test]
fn mode_conversions_are_bijective() {
    for (mode, ft) in [
        (MODE_FILE, FileType::Regular),
        (MODE_EXEC, FileType::Executable),
        (MODE_SYMLINK, FileType::Symlink),
        (MODE_DIR, FileType::Directory),
    ] {
        assert_eq!(FileType::from_mode(mode), Some(ft));
        assert_eq!(ft.mode(), mode);
    }
}

#[test]
fn unknown_mode_is_none() {
    assert_eq!(FileType::from_mode(0o160000), None); // gitlink
    assert_eq!(FileType::from_mode(0), None);
}

#[test]
fn file_type_predicates() {
    assert!(FileType::Regular.is_file());
    assert!(FileType::Executable.is_file());
    assert!(!FileType::Symlink.is_file());
    assert!(FileType::Directory.is_dir());
    assert!(FileType::Symlink.is_symlink());
}

// ---------------------------------------------------------------------------
// WriteEntry validation
// ---------------------------------------------------------------------------

#[test]
fn write_entry_constructors_validate() {
    assert!(WriteEntry::bytes(b"data".to_vec()).validate().is_ok());
    assert!(WriteEntry::executable(b"#!".to_vec()).validate().is_ok());
    assert!(WriteEntry::symlink("target").validate().is_ok());
}

#[test]
fn write_entry_rejects_inconsistent_payloads() {
    let bad = WriteEntry {
        data: Some(b"x".to_vec()),
        target: Some("t".into()),
        mode: MODE_FILE,
    };
    assert!(bad.validate().is_err());

    let bad = WriteEntry {
        data: None,
        target: None,
        mode: MODE_SYMLINK,
    };
    assert!(bad.validate().is_err());

    let bad = WriteEntry {
        data: Some(b"x".to_vec()),
        target: None,
        mode: 0o160000,
    };
    assert!(bad.validate().is_err());
}

// ---------------------------------------------------------------------------
// ChangeReport
// ---------------------------------------------------------------------------

#[test]
fn change_report_counts() {
    let mut report = ChangeReport::new();
    assert!(report.in_sync());
    assert_eq!(report.total(), 0);

    report.add.push(FileChange::new("a", FileType::Regular));
    report.update.push(FileChange::new("b", FileType::Regular));
    report.delete.push(FileChange::new("c", FileType::Symlink));
    assert!(!report.in_sync());
    assert_eq!(report.total(), 3);
}

#[test]
fn file_changes_order_by_path() {
    let mut changes = vec![
        FileChange::new("zz", FileType::Regular),
        FileChange::new("aa", FileType::Regular),
    ];
    changes.sort();
    assert_eq!(changes[0].path, "aa");
}

// ---------------------------------------------------------------------------
// MirrorDiff
// ---------------------------------------------------------------------------

#[test]
fn mirror_diff_counts() {
    let mut diff = MirrorDiff::new();
    assert!(diff.in_sync());

    diff.add.push(RefChange {
        ref_name: "refs/heads/main".into(),
        old_target: None,
        new_target: Some("0".repeat(40)),
    });
    assert!(!diff.in_sync());
    assert_eq!(diff.total(), 1);
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

#[test]
fn default_signature_ident() {
    let sig = Signature::default();
    assert_eq!(sig.ident(), "gitvault <gitvault@localhost>");
}
