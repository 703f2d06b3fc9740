//! The child's exit status passes through unchanged.
//!
//! Requires root. Run with: `cargo test --test isolation_exit_code -- --ignored`

mod common;

use skiff_runtime::{Isolation, NamespaceIsolation, RootFs};

#[test]
#[ignore = "requires root for unshare(CLONE_NEWPID) and chroot"]
fn false_exit_code_passes_through() {
    if !common::prereqs_available() {
        return;
    }
    let root = RootFs::create().unwrap();
    common::host_rootfs_with(root.path(), &["false"]);

    let result = NamespaceIsolation::new()
        .run("/bin/false", &[], root.path())
        .unwrap();
    assert_eq!(result.exit_code, 1);
    assert!(result.stdout.is_empty());
    root.close().unwrap();
}
