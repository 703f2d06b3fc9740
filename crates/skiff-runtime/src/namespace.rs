use crate::isolation::{ExecResult, Isolation};
use crate::RuntimeError;
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Host PID of the isolated child being waited on, or 0.
static RUNNING_CHILD: AtomicI32 = AtomicI32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Attached,
    Detached,
    /// The namespace's init process has exited; no further child can join it.
    Spent,
}

/// Linux isolation: `unshare(CLONE_NEWPID)` in the caller, then `chroot` +
/// `chdir("/")` in the child before exec.
///
/// The first child spawned after detaching becomes PID 1 of the new namespace,
/// and once it exits the kernel refuses further forks into that namespace.
/// A process therefore gets exactly one isolated run.
pub struct NamespaceIsolation {
    stage: Mutex<Stage>,
}

impl Default for NamespaceIsolation {
    fn default() -> Self {
        Self {
            stage: Mutex::new(Stage::Attached),
        }
    }
}

impl NamespaceIsolation {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&self) -> Result<std::sync::MutexGuard<'_, Stage>, RuntimeError> {
        self.stage
            .lock()
            .map_err(|e| RuntimeError::Isolation(format!("mutex poisoned: {e}")))
    }
}

impl Isolation for NamespaceIsolation {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn detach_pid_namespace(&self) -> Result<(), RuntimeError> {
        let mut stage = self.stage()?;
        match *stage {
            Stage::Detached => return Ok(()),
            Stage::Spent => {
                return Err(RuntimeError::Isolation(
                    "PID namespace already used by a previous run in this process".to_owned(),
                ))
            }
            Stage::Attached => {}
        }

        if pid_namespace_already_detached() {
            return Err(RuntimeError::Isolation(
                "this process has already detached its PID namespace".to_owned(),
            ));
        }

        unshare_pid_namespace().map_err(|e| {
            if e.raw_os_error() == Some(libc::EPERM) {
                RuntimeError::Isolation(format!(
                    "unshare(CLONE_NEWPID): {e} (requires root or CAP_SYS_ADMIN)"
                ))
            } else {
                RuntimeError::Isolation(format!("unshare(CLONE_NEWPID): {e}"))
            }
        })?;

        *stage = Stage::Detached;
        info!("detached PID namespace for children");
        Ok(())
    }

    fn rebind_root_and_exec(
        &self,
        rootfs: &Path,
        command: &str,
        args: &[String],
    ) -> Result<ExecResult, RuntimeError> {
        let mut stage = self.stage()?;
        if *stage != Stage::Detached {
            return Err(RuntimeError::Isolation(
                "PID namespace must be detached before executing".to_owned(),
            ));
        }
        if !rootfs.is_dir() {
            return Err(RuntimeError::Exec(format!(
                "root directory {} does not exist",
                rootfs.display()
            )));
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        chroot_on_exec(&mut cmd, rootfs)?;

        debug!("exec {command} {args:?} in {}", rootfs.display());
        let child = cmd.spawn();
        *stage = Stage::Spent;

        let child = child.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RuntimeError::Exec(format!(
                    "command '{command}' not found inside {}",
                    rootfs.display()
                ))
            } else {
                RuntimeError::Exec(format!("failed to start '{command}': {e}"))
            }
        })?;
        let output = wait_tracked(child)
            .map_err(|e| RuntimeError::Exec(format!("waiting for '{command}': {e}")))?;

        let result = ExecResult::from_output(output);
        debug!("'{command}' exited with {}", result.exit_code);
        Ok(result)
    }
}

/// Collect `child`'s output, publishing its PID for [`kill_running_child`]
/// while it runs.
fn wait_tracked(child: Child) -> io::Result<Output> {
    RUNNING_CHILD.store(i32::try_from(child.id()).unwrap_or(0), Ordering::SeqCst);
    let output = child.wait_with_output();
    RUNNING_CHILD.store(0, Ordering::SeqCst);
    output
}

/// SIGKILL and reap the isolated child, if one is running.
///
/// The child is PID 1 of its namespace and ignores SIGINT/SIGTERM, so the
/// interrupt handler calls this before removing the root it runs in.
/// Returns whether a child was signalled.
#[allow(unsafe_code)]
pub fn kill_running_child() -> bool {
    let pid = RUNNING_CHILD.swap(0, Ordering::SeqCst);
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(2) takes plain integers and touches no caller memory.
    if unsafe { libc::kill(pid, libc::SIGKILL) } != 0 {
        return false;
    }
    // SAFETY: a null status pointer is allowed. If the waiting thread reaps
    // the child first this fails with ECHILD, which is fine.
    unsafe {
        libc::waitpid(pid, std::ptr::null_mut(), 0);
    }
    true
}

#[allow(unsafe_code)]
fn unshare_pid_namespace() -> io::Result<()> {
    // SAFETY: unshare(2) takes a flag word and touches no caller memory.
    let rc = unsafe { libc::unshare(libc::CLONE_NEWPID) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether children of this process already land in a different PID namespace.
fn pid_namespace_already_detached() -> bool {
    match (
        fs::read_link("/proc/self/ns/pid"),
        fs::read_link("/proc/self/ns/pid_for_children"),
    ) {
        (Ok(own), Ok(children)) => own != children,
        _ => false,
    }
}

#[allow(unsafe_code)]
fn chroot_on_exec(cmd: &mut Command, rootfs: &Path) -> Result<(), RuntimeError> {
    let root = CString::new(rootfs.as_os_str().as_bytes()).map_err(|_| {
        RuntimeError::Isolation(format!("root path {} contains a NUL byte", rootfs.display()))
    })?;
    // SAFETY: runs in the forked child before exec and only calls chroot(2)
    // and chdir(2), both async-signal-safe, on memory allocated before fork.
    unsafe {
        cmd.pre_exec(move || {
            if libc::chroot(root.as_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::chdir(c"/".as_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(unsafe_code)]
    fn is_root() -> bool {
        // SAFETY: geteuid() has no arguments and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    #[test]
    fn exec_without_detach_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let isolation = NamespaceIsolation::new();
        let err = isolation
            .rebind_root_and_exec(dir.path(), "true", &[])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Isolation(_)));
    }

    #[test]
    fn unprivileged_detach_is_isolation_failure() {
        if is_root() {
            // Detaching here would poison every later spawn in the test binary.
            return;
        }
        let isolation = NamespaceIsolation::new();
        let err = isolation.detach_pid_namespace().unwrap_err();
        assert!(matches!(err, RuntimeError::Isolation(_)), "{err}");
    }

    #[test]
    fn fresh_process_has_not_detached() {
        assert!(!pid_namespace_already_detached());
    }

    #[test]
    fn running_child_is_killed_and_reaped() {
        use crate::isolation::exit_code_of;
        use std::time::{Duration, Instant};

        let child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let started = Instant::now();
        let waiter = std::thread::spawn(move || wait_tracked(child));
        while RUNNING_CHILD.load(Ordering::SeqCst) == 0 {
            assert!(started.elapsed() < Duration::from_secs(5), "child never published");
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(kill_running_child());
        match waiter.join().unwrap() {
            Ok(output) => assert_eq!(exit_code_of(output.status), 137),
            // The kill reaped it before the waiter could.
            Err(e) => assert_eq!(e.raw_os_error(), Some(libc::ECHILD)),
        }
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(RUNNING_CHILD.load(Ordering::SeqCst), 0);
        assert!(!kill_running_child());
    }

    #[test]
    fn root_path_with_nul_is_rejected() {
        use std::ffi::OsStr;
        let mut cmd = Command::new("true");
        let bad = Path::new(OsStr::from_bytes(b"/tmp/a\0b"));
        assert!(chroot_on_exec(&mut cmd, bad).is_err());
    }
}
