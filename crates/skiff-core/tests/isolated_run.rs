//! Full pipeline with real PID-namespace and chroot isolation.
//!
//! Requires root. A process can detach its PID namespace once, so this file
//! holds a single test. Run with: `cargo test --test isolated_run -- --ignored`

use skiff_core::{Engine, RunOptions};
use skiff_registry::{ImageReference, RegistryConfig};
use skiff_runtime::{check_isolation_prereqs, format_missing, Isolation, NamespaceIsolation};
use skiff_server::{FixtureStore, TestRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

fn host_path(binary: &str) -> PathBuf {
    let out = Command::new("which").arg(binary).output().unwrap();
    assert!(out.status.success(), "{binary} not on host");
    fs::canonicalize(String::from_utf8_lossy(&out.stdout).trim()).unwrap()
}

fn stage(root: &Path, host: &Path, inside: &Path) {
    let dest = root.join(inside.strip_prefix("/").unwrap());
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::copy(host, dest).unwrap();
}

/// A layer holding the host's `echo` at `/bin/echo` plus its shared libraries.
fn echo_layer() -> Vec<u8> {
    let staging = tempfile::tempdir().unwrap();
    let echo = host_path("echo");
    stage(staging.path(), &echo, Path::new("/bin/echo"));

    let ldd = Command::new("ldd").arg(&echo).output().unwrap();
    for line in String::from_utf8_lossy(&ldd.stdout).lines() {
        if let Some(lib) = line.split_whitespace().find(|w| w.starts_with('/')) {
            let lib = Path::new(lib);
            stage(staging.path(), lib, lib);
        }
    }

    let mut ar = tar::Builder::new(Vec::new());
    ar.append_dir_all(".", staging.path()).unwrap();
    ar.into_inner().unwrap()
}

#[test]
#[ignore = "requires root for unshare(CLONE_NEWPID) and chroot"]
fn echo_hello_through_the_whole_pipeline() {
    let missing = check_isolation_prereqs();
    if !missing.is_empty() {
        eprintln!("skipping: {}", format_missing(&missing));
        return;
    }

    let registry = TestRegistry::start(FixtureStore::default());
    registry.store.add_image("echo", "latest", &[echo_layer()]);
    let parent = tempfile::tempdir().unwrap();

    let config = RegistryConfig::new(&registry.url, &registry.auth_url())
        .with_timeout(Duration::from_secs(5));
    let isolation: Arc<dyn Isolation> = Arc::new(NamespaceIsolation::new());
    let engine = Engine::new(config, isolation).with_options(RunOptions {
        rootfs_parent: parent.path().to_path_buf(),
    });

    let image: ImageReference = "echo".parse().unwrap();
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let code = engine
        .run_image_with_output(&image, "/bin/echo", &["hello".to_owned()], &mut out, &mut err)
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(out, b"hello\n");
    assert!(fs::read_dir(parent.path()).unwrap().next().is_none());
}
