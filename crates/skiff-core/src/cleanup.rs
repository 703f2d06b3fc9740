use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Exit status reported when a run is cut short by SIGINT or SIGTERM.
pub const INTERRUPTED_EXIT: i32 = 130;

/// Kill the isolated child, remove every live root filesystem and exit on
/// SIGINT/SIGTERM.
///
/// Install before the PID namespace is detached; the handler runs on its own
/// thread. A second signal while cleanup is running exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(INTERRUPTED_EXIT);
        }
        eprintln!("\ninterrupted, removing temporary root filesystems...");
        interrupt_cleanup();
        std::process::exit(INTERRUPTED_EXIT);
    });
}

/// The child must be gone before its root is deleted underneath it.
fn interrupt_cleanup() {
    skiff_runtime::kill_running_child();
    skiff_runtime::rootfs::remove_live_roots();
}
