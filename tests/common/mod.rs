use std::path::Path;

use gitvault::*;

pub fn create_vault(dir: &Path, branch: &str) -> Vault {
    Vault::open(
        dir.join("vault.git"),
        OpenOptions {
            create: true,
            branch: Some(branch.into()),
            ..Default::default()
        },
    )
    .unwrap()
}

#[allow(dead_code)]
pub fn vault_with_files(dir: &Path) -> (Vault, Snapshot) {
    let vault = create_vault(dir, "main");
    let snap = vault.branches().get("main").unwrap();
    let mut batch = snap.batch(Default::default());
    batch.write("hello.txt", b"hello").unwrap();
    batch.write("dir/a.txt", b"aaa").unwrap();
    batch.write("dir/b.txt", b"bbb").unwrap();
    batch.write("dir/sub/c.txt", b"ccc").unwrap();
    batch.commit().unwrap();
    let snap = vault.branches().get("main").unwrap();
    (vault, snap)
}
