//! Helpers shared by the isolation tests.
//!
//! Each isolation test lives in its own file: once a process has detached its
//! PID namespace and the first child exited, it cannot spawn again.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub fn prereqs_available() -> bool {
    let missing = skiff_runtime::check_isolation_prereqs();
    if !missing.is_empty() {
        let msg = skiff_runtime::format_missing(&missing);
        eprintln!("skipping isolation test: {msg}");
        return false;
    }
    true
}

fn which(binary: &str) -> Option<PathBuf> {
    let out = Command::new("which").arg(binary).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&out.stdout).trim().to_owned();
    fs::canonicalize(path).ok()
}

/// Shared libraries a dynamic binary needs, as absolute host paths.
fn shared_libraries(binary: &Path) -> Vec<PathBuf> {
    let Ok(out) = Command::new("ldd").arg(binary).output() else {
        return Vec::new();
    };
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter_map(|line| {
            line.split_whitespace()
                .find(|word| word.starts_with('/'))
                .map(PathBuf::from)
        })
        .collect()
}

fn copy_into(root: &Path, host: &Path, inside: &Path) {
    let dest = root.join(inside.strip_prefix("/").unwrap_or(inside));
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::copy(host, &dest).unwrap();
}

/// Populate `root` with host copies of `binaries` under `/bin` plus the
/// libraries they link against. Spawns `which`/`ldd`, so call it before
/// detaching.
pub fn host_rootfs_with(root: &Path, binaries: &[&str]) {
    for binary in binaries {
        let host = which(binary).unwrap_or_else(|| panic!("{binary} not on host"));
        copy_into(root, &host, &Path::new("/bin").join(binary));
        for lib in shared_libraries(&host) {
            copy_into(root, &lib, &lib);
            if let Ok(real) = fs::canonicalize(&lib) {
                if real != lib {
                    copy_into(root, &real, &real);
                }
            }
        }
    }
}
