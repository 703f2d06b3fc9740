use crate::RuntimeError;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Roots that are alive right now, so a signal handler can remove them.
static LIVE_ROOTS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Ephemeral root filesystem owned by exactly one run.
///
/// The directory is removed by [`RootFs::close`], or on drop if it was never
/// closed, and by [`remove_live_roots`] when the process is interrupted.
pub struct RootFs {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl RootFs {
    /// Create a fresh root under the system temp directory.
    pub fn create() -> Result<Self, RuntimeError> {
        Self::create_in(&std::env::temp_dir())
    }

    pub fn create_in(parent: &Path) -> Result<Self, RuntimeError> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix("skiff-rootfs-")
            .tempdir_in(parent)?;
        let path = dir.path().to_path_buf();
        register(&path);
        debug!("created rootfs {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, reporting any failure.
    pub fn close(mut self) -> Result<(), RuntimeError> {
        self.remove()
    }

    fn remove(&mut self) -> Result<(), RuntimeError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        unregister(&self.path);
        make_writable(&self.path);
        match dir.close() {
            Ok(()) => debug!("removed rootfs {}", self.path.display()),
            // Already removed by the signal handler.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

impl Drop for RootFs {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("failed to remove rootfs {}: {e}", self.path.display());
        }
    }
}

fn register(path: &Path) {
    if let Ok(mut roots) = LIVE_ROOTS.lock() {
        roots.push(path.to_path_buf());
    }
}

fn unregister(path: &Path) {
    if let Ok(mut roots) = LIVE_ROOTS.lock() {
        roots.retain(|p| p != path);
    }
}

/// Paths of every root that has not been removed yet.
pub fn live_roots() -> Vec<PathBuf> {
    LIVE_ROOTS.lock().map(|r| r.clone()).unwrap_or_default()
}

/// Remove every live root. Intended for signal handlers; errors are logged.
pub fn remove_live_roots() {
    let roots = match LIVE_ROOTS.lock() {
        Ok(mut roots) => std::mem::take(&mut *roots),
        Err(_) => return,
    };
    for root in roots {
        if let Err(e) = force_remove(&root) {
            warn!("failed to remove rootfs {}: {e}", root.display());
        }
    }
}

/// Remove a directory tree even when extracted layers left read-only directories behind.
pub fn force_remove(path: &Path) -> Result<(), RuntimeError> {
    if path.symlink_metadata().is_ok() {
        make_writable(path);
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Grant the owner rwx on every directory below `path`. Symlinks are not followed.
fn make_writable(path: &Path) {
    let Ok(meta) = path.symlink_metadata() else {
        return;
    };
    if !meta.is_dir() {
        return;
    }
    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700));
    }
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            make_writable(&entry.path());
        }
    }
}
