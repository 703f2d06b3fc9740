use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (fix: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

#[allow(unsafe_code)]
fn is_root() -> bool {
    // SAFETY: geteuid() has no arguments and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn pid_namespaces_supported() -> bool {
    Path::new("/proc/self/ns/pid").exists()
}

/// Probe in a throwaway child so this process keeps its own namespace.
fn pid_namespaces_work() -> bool {
    Command::new("unshare")
        .args(["--pid", "--fork", "true"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check everything [`crate::NamespaceIsolation`] needs.
/// An empty list means all prerequisites are met.
pub fn check_isolation_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !cfg!(target_os = "linux") {
        missing.push(MissingPrereq {
            name: "linux",
            purpose: "PID namespaces are a Linux kernel feature",
            install_hint: "run skiff on a Linux host",
        });
        return missing;
    }

    if !is_root() {
        missing.push(MissingPrereq {
            name: "root privileges",
            purpose: "unshare(CLONE_NEWPID) and chroot(2) need CAP_SYS_ADMIN and CAP_SYS_CHROOT",
            install_hint: "run skiff as root, e.g. via sudo",
        });
    }

    if !pid_namespaces_supported() {
        missing.push(MissingPrereq {
            name: "PID namespaces",
            purpose: "process isolation for the container command",
            install_hint: "enable CONFIG_PID_NS=y in the kernel and mount /proc",
        });
    } else if is_root() && command_exists("unshare") && !pid_namespaces_work() {
        missing.push(MissingPrereq {
            name: "PID namespaces",
            purpose: "process isolation for the container command",
            install_hint: "the kernel refused a new PID namespace; check seccomp or container policy",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nSkiff needs these to isolate container commands.");
    msg
}
