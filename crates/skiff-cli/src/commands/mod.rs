pub mod completions;
pub mod doctor;
pub mod man_pages;
pub mod pull;
pub mod run;

use indicatif::{ProgressBar, ProgressStyle};
use skiff_core::{CoreError, PullEvent};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
/// Skiff itself failed before or around the command; mirrors `docker run`.
pub const EXIT_INFRA_FAILURE: u8 = 125;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// `<kind>: <cause>`, the form every pipeline error is reported in.
pub fn describe(err: &CoreError) -> String {
    format!("{}: {err}", err.kind())
}

/// A spinner on stderr, or a hidden bar when stderr is not a terminal.
pub fn spinner(msg: &str) -> ProgressBar {
    if !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Spinner text for a pipeline event, if it warrants one.
pub fn progress_message(event: PullEvent<'_>) -> Option<String> {
    match event {
        PullEvent::Manifest { layers } => Some(format!("manifest: {layers} layers")),
        PullEvent::Layer {
            index,
            total,
            digest,
        } => Some(format!(
            "layer {}/{total} {}",
            index + 1,
            short_digest(digest)
        )),
        PullEvent::Extracted { .. } | PullEvent::Executing { .. } => None,
    }
}

pub fn short_digest(digest: &str) -> &str {
    let hex = digest.split_once(':').map_or(digest, |(_, hex)| hex);
    &hex[..12.min(hex.len())]
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "pass" => Style::new().green().apply_to("✓").to_string(),
        "fail" => Style::new().red().bold().apply_to("✗").to_string(),
        "warn" => Style::new().yellow().apply_to("⚠").to_string(),
        _ => Style::new().dim().apply_to("ℹ").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_runtime::RuntimeError;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn describe_prefixes_kind() {
        let err = CoreError::from(RuntimeError::Exec("command 'ls' not found".to_owned()));
        let msg = describe(&err);
        assert!(msg.starts_with("ExecFailure: "), "{msg}");
        assert!(msg.contains("command 'ls' not found"));
    }

    #[test]
    fn short_digest_strips_algorithm() {
        assert_eq!(
            short_digest("sha256:0123456789abcdef0123"),
            "0123456789ab"
        );
        assert_eq!(short_digest("abc"), "abc");
    }

    #[test]
    fn progress_messages_for_layers() {
        let msg = progress_message(PullEvent::Layer {
            index: 0,
            total: 2,
            digest: "sha256:ffffffffffffffff",
        })
        .unwrap();
        assert_eq!(msg, "layer 1/2 ffffffffffff");
        assert!(progress_message(PullEvent::Executing { command: "ls" }).is_none());
    }

    #[test]
    fn colorize_status_keeps_symbols() {
        assert!(colorize_status("pass").contains('✓'));
        assert!(colorize_status("fail").contains('✗'));
        assert!(colorize_status("info").contains('ℹ'));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_INFRA_FAILURE);
    }

    #[test]
    fn spinner_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
    }

    #[test]
    fn spinner_fail_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
