use crate::RuntimeError;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;

/// Buffered outcome of one isolated command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn from_output(output: std::process::Output) -> Self {
        Self {
            exit_code: exit_code_of(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Exit code as a shell reports it: the child's own code, or 128 + signal.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// OS isolation primitives used to run a command inside an extracted image.
pub trait Isolation: Send + Sync {
    fn name(&self) -> &str;

    /// Move children spawned from now on into a fresh PID namespace.
    /// One-way and process-wide.
    fn detach_pid_namespace(&self) -> Result<(), RuntimeError>;

    /// Spawn `command` with `args`, its root rebound to `rootfs`, inheriting
    /// the environment, and wait for it with stdout/stderr captured.
    fn rebind_root_and_exec(
        &self,
        rootfs: &Path,
        command: &str,
        args: &[String],
    ) -> Result<ExecResult, RuntimeError>;

    fn run(&self, command: &str, args: &[String], rootfs: &Path) -> Result<ExecResult, RuntimeError> {
        self.detach_pid_namespace()?;
        self.rebind_root_and_exec(rootfs, command, args)
    }
}

pub fn select_isolation(name: &str) -> Result<Box<dyn Isolation>, RuntimeError> {
    match name {
        "namespace" => Ok(Box::new(crate::namespace::NamespaceIsolation::new())),
        "mock" => Ok(Box::new(crate::mock::MockIsolation::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_isolations() {
        assert_eq!(select_isolation("namespace").unwrap().name(), "namespace");
        assert_eq!(select_isolation("mock").unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_isolation_fails() {
        assert!(matches!(
            select_isolation("vm"),
            Err(RuntimeError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn exit_code_passes_through() {
        assert_eq!(exit_code_of(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code_of(ExitStatus::from_raw(3 << 8)), 3);
    }

    #[test]
    fn exit_code_for_signal_death() {
        // Raw wait status 9 = killed by SIGKILL.
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn exec_result_success_flag() {
        let ok = ExecResult::default();
        assert!(ok.success());
        let failed = ExecResult {
            exit_code: 2,
            ..ExecResult::default()
        };
        assert!(!failed.success());
    }
}
