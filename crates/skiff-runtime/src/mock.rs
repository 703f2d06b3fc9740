use crate::isolation::{ExecResult, Isolation};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SEARCH_DIRS: &[&str] = &["bin", "usr/bin", "sbin", "usr/sbin", "usr/local/bin"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub rootfs: PathBuf,
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Default)]
struct MockState {
    detached: bool,
    calls: Vec<MockCall>,
}

/// Unprivileged stand-in for [`crate::NamespaceIsolation`].
///
/// Commands must exist in the root (as a file under `bin/`, `usr/bin/`, ...)
/// but are never executed. `echo`, `true`, `false` and `cat` behave like
/// their coreutils namesakes; anything else prints `mock-exec: <argv>`.
pub struct MockIsolation {
    state: Mutex<MockState>,
    privileged: bool,
}

impl Default for MockIsolation {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            privileged: true,
        }
    }
}

impl MockIsolation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose namespace detachment fails like an unprivileged caller's.
    pub fn unprivileged() -> Self {
        Self {
            privileged: false,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn detached(&self) -> bool {
        self.state.lock().map(|s| s.detached).unwrap_or(false)
    }
}

fn locate(rootfs: &Path, command: &str) -> Option<PathBuf> {
    if command.contains('/') {
        let candidate = rootfs.join(command.trim_start_matches('/'));
        return candidate.is_file().then_some(candidate);
    }
    SEARCH_DIRS
        .iter()
        .map(|dir| rootfs.join(dir).join(command))
        .find(|p| p.is_file())
}

fn cat(rootfs: &Path, args: &[String]) -> ExecResult {
    let mut result = ExecResult::default();
    for arg in args {
        match std::fs::read(rootfs.join(arg.trim_start_matches('/'))) {
            Ok(data) => result.stdout.extend_from_slice(&data),
            Err(_) => {
                result
                    .stderr
                    .extend_from_slice(format!("cat: {arg}: No such file or directory\n").as_bytes());
                result.exit_code = 1;
            }
        }
    }
    result
}

impl Isolation for MockIsolation {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn detach_pid_namespace(&self) -> Result<(), RuntimeError> {
        if !self.privileged {
            return Err(RuntimeError::Isolation(
                "unshare(CLONE_NEWPID): Operation not permitted (os error 1)".to_owned(),
            ));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|e| RuntimeError::Isolation(format!("mutex poisoned: {e}")))?;
        state.detached = true;
        Ok(())
    }

    fn rebind_root_and_exec(
        &self,
        rootfs: &Path,
        command: &str,
        args: &[String],
    ) -> Result<ExecResult, RuntimeError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| RuntimeError::Exec(format!("mutex poisoned: {e}")))?;
        if !state.detached {
            return Err(RuntimeError::Isolation(
                "PID namespace must be detached before executing".to_owned(),
            ));
        }
        state.calls.push(MockCall {
            rootfs: rootfs.to_path_buf(),
            command: command.to_owned(),
            args: args.to_vec(),
        });

        let Some(binary) = locate(rootfs, command) else {
            return Err(RuntimeError::Exec(format!(
                "command '{command}' not found inside {}",
                rootfs.display()
            )));
        };

        let program = binary
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let result = match program.as_str() {
            "echo" => ExecResult {
                stdout: format!("{}\n", args.join(" ")).into_bytes(),
                ..ExecResult::default()
            },
            "true" => ExecResult::default(),
            "false" => ExecResult {
                exit_code: 1,
                ..ExecResult::default()
            },
            "cat" => cat(rootfs, args),
            _ => {
                let mut argv = vec![command.to_owned()];
                argv.extend(args.iter().cloned());
                ExecResult {
                    stdout: format!("mock-exec: {}\n", argv.join(" ")).into_bytes(),
                    ..ExecResult::default()
                }
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn rootfs_with(binaries: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        for bin in binaries {
            fs::write(dir.path().join("bin").join(bin), b"\x7fELF").unwrap();
        }
        dir
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn echo_prints_arguments() {
        let root = rootfs_with(&["echo"]);
        let mock = MockIsolation::new();
        let result = mock.run("echo", &args(&["hello"]), root.path()).unwrap();
        assert_eq!(result.stdout, b"hello\n");
        assert_eq!(result.exit_code, 0);
        assert!(mock.detached());
    }

    #[test]
    fn false_exits_nonzero() {
        let root = rootfs_with(&["false"]);
        let result = MockIsolation::new().run("false", &[], root.path()).unwrap();
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn cat_reads_from_rootfs() {
        let root = rootfs_with(&["cat"]);
        fs::create_dir_all(root.path().join("etc")).unwrap();
        fs::write(root.path().join("etc/hello"), b"hi\n").unwrap();

        let mock = MockIsolation::new();
        let ok = mock.run("cat", &args(&["/etc/hello"]), root.path()).unwrap();
        assert_eq!(ok.stdout, b"hi\n");

        let missing = mock.run("cat", &args(&["/etc/nope"]), root.path()).unwrap();
        assert_eq!(missing.exit_code, 1);
        assert!(String::from_utf8_lossy(&missing.stderr).contains("/etc/nope"));
    }

    #[test]
    fn absolute_command_paths_resolve_inside_root() {
        let root = rootfs_with(&["true"]);
        let result = MockIsolation::new()
            .run("/bin/true", &[], root.path())
            .unwrap();
        assert!(result.success());
    }

    #[test]
    fn other_commands_report_argv() {
        let root = rootfs_with(&["ls"]);
        let result = MockIsolation::new()
            .run("ls", &args(&["-la", "/"]), root.path())
            .unwrap();
        assert_eq!(result.stdout, b"mock-exec: ls -la /\n");
    }

    #[test]
    fn missing_command_is_exec_failure() {
        let root = rootfs_with(&[]);
        let mock = MockIsolation::new();
        let err = mock.run("nonexistent", &[], root.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::Exec(_)));
        assert_eq!(mock.calls().len(), 1);
    }

    #[test]
    fn host_binaries_are_not_visible() {
        // /bin/sh exists on the host but not in the empty root.
        let root = rootfs_with(&[]);
        assert!(MockIsolation::new().run("sh", &[], root.path()).is_err());
    }

    #[test]
    fn unprivileged_detach_fails() {
        let root = rootfs_with(&["true"]);
        let mock = MockIsolation::unprivileged();
        let err = mock.run("true", &[], root.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::Isolation(_)));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn exec_requires_detach() {
        let root = rootfs_with(&["true"]);
        let mock = MockIsolation::new();
        assert!(mock.rebind_root_and_exec(root.path(), "true", &[]).is_err());
    }

    #[test]
    fn calls_are_recorded() {
        let root = rootfs_with(&["echo"]);
        let mock = MockIsolation::new();
        mock.run("echo", &args(&["a", "b"]), root.path()).unwrap();
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "echo");
        assert_eq!(calls[0].args, vec!["a", "b"]);
        assert_eq!(calls[0].rootfs, root.path());
    }
}
