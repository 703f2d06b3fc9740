//! Runs a real command inside a fresh PID namespace and chroot.
//!
//! Requires root. Run with: `cargo test --test isolation_echo -- --ignored`

mod common;

use skiff_runtime::{Isolation, NamespaceIsolation, RootFs};

#[test]
#[ignore = "requires root for unshare(CLONE_NEWPID) and chroot"]
fn echo_runs_inside_rootfs() {
    if !common::prereqs_available() {
        return;
    }
    let root = RootFs::create().unwrap();
    common::host_rootfs_with(root.path(), &["echo"]);

    let isolation = NamespaceIsolation::new();
    let result = isolation
        .run("/bin/echo", &["hello".to_owned()], root.path())
        .unwrap();

    assert_eq!(result.stdout, b"hello\n");
    assert!(result.stderr.is_empty());
    assert_eq!(result.exit_code, 0);

    // The namespace is spent after its init process exits.
    assert!(isolation.detach_pid_namespace().is_err());
    root.close().unwrap();
}
