use super::{colorize_status, EXIT_FAILURE, EXIT_SUCCESS};
use skiff_registry::RegistryConfig;
use std::path::Path;

pub fn run(json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&mut checks, &mut all_pass);
    check_config(&mut checks, &mut all_pass);

    let scratch = std::env::temp_dir();
    check_scratch_dir(&scratch, &mut checks, &mut all_pass);
    check_disk_space(&scratch, &mut checks);

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = skiff_runtime::check_isolation_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass(
            "isolation_prereqs",
            "PID namespace and chroot isolation available",
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "isolation_prereqs",
            &skiff_runtime::format_missing(&missing),
        ));
    }
}

fn check_config(checks: &mut Vec<Check>, all_pass: &mut bool) {
    match RegistryConfig::load_default().and_then(RegistryConfig::apply_env) {
        Ok(config) => checks.push(Check::info(
            "registry",
            &format!(
                "Registry {} (token from {}, timeout {}s)",
                config.registry_url, config.auth_url, config.timeout_secs
            ),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("registry", &format!("Invalid config: {e}")));
        }
    }
}

fn check_scratch_dir(dir: &Path, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match try_scratch_dir(dir) {
        Ok(()) => checks.push(Check::pass(
            "scratch_dir",
            &format!("Root filesystems are created under {}", dir.display()),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "scratch_dir",
                &format!("Cannot create directories in {}: {e}", dir.display()),
            ));
        }
    }
}

fn try_scratch_dir(dir: &Path) -> Result<(), String> {
    let root = skiff_runtime::RootFs::create_in(dir).map_err(|e| e.to_string())?;
    root.close().map_err(|e| e.to_string())
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Skiff Doctor\n");
        for check in checks {
            println!("  {} {}", colorize_status(&check.status), check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }

    fn new(name: &str, status: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: status.to_owned(),
            message: message.to_owned(),
        }
    }
}

/// Every layer of a run is written under the scratch directory.
fn check_disk_space(dir: &Path, checks: &mut Vec<Check>) {
    let Ok(c_path) = std::ffi::CString::new(dir.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: statvfs with a valid, NUL-terminated path and a zeroed output
    // struct is well-defined; the struct is only read after success.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    let avail_mb = (stat.f_bavail * stat.f_frsize) / (1024 * 1024);
    if avail_mb < 100 {
        checks.push(Check::fail(
            "disk_space",
            &format!("Low disk space in {}: {avail_mb} MB available", dir.display()),
        ));
    } else if avail_mb < 1024 {
        checks.push(Check::warn(
            "disk_space",
            &format!("{avail_mb} MB available in {} (large images may not fit)", dir.display()),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            &format!("{} GB available in {}", avail_mb / 1024, dir.display()),
        ));
    }
}
