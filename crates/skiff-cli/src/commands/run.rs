use super::{describe, progress_message, spin_fail, spinner};
use skiff_core::{CoreError, Engine, ErrorKind, PullEvent};
use skiff_registry::{ImageReference, RegistryConfig};
use skiff_runtime::{check_isolation_prereqs, format_missing, select_isolation};
use std::sync::Arc;
use tracing::debug;

pub fn run(
    config: RegistryConfig,
    isolation: &str,
    image: &str,
    command: &str,
    args: &[String],
) -> Result<u8, String> {
    let reference = ImageReference::parse(image, &config.default_tag)
        .map_err(|e| describe(&CoreError::from(e)))?;
    let isolation = select_isolation(isolation).map_err(|e| describe(&CoreError::from(e)))?;
    debug!("isolation backend: {}", isolation.name());

    if isolation.name() == "namespace" && std::env::var("SKIFF_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = check_isolation_prereqs();
        if !missing.is_empty() {
            return Err(format!(
                "{}: {}",
                ErrorKind::IsolationFailure,
                format_missing(&missing)
            ));
        }
    }

    let pb = spinner(&format!("pulling {reference}…"));
    let bar = pb.clone();
    let engine = Engine::new(config, Arc::from(isolation)).with_progress(move |event| {
        if let PullEvent::Executing { .. } = event {
            // The child's output follows; leave nothing behind on the terminal.
            bar.finish_and_clear();
        } else if let Some(msg) = progress_message(event) {
            bar.set_message(msg);
        }
    });

    match engine.run_image(&reference, command, args) {
        Ok(code) => Ok((code & 0xff) as u8),
        Err(e) => {
            if !pb.is_finished() {
                spin_fail(&pb, &format!("pulling {reference} failed"));
            }
            Err(describe(&e))
        }
    }
}
