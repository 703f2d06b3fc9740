use super::{describe, json_pretty, progress_message, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use skiff_core::{CoreError, Engine};
use skiff_registry::{ImageReference, RegistryConfig};
use skiff_runtime::MockIsolation;
use std::path::Path;
use std::sync::Arc;

pub fn run(
    config: RegistryConfig,
    image: &str,
    dir: &Path,
    json: bool,
) -> Result<u8, String> {
    let reference = ImageReference::parse(image, &config.default_tag)
        .map_err(|e| describe(&CoreError::from(e)))?;

    let pb = spinner(&format!("pulling {reference}…"));
    let bar = pb.clone();
    // Pulling executes nothing, so no isolation backend is needed.
    let engine = Engine::new(config, Arc::new(MockIsolation::new())).with_progress(move |event| {
        if let Some(msg) = progress_message(event) {
            bar.set_message(msg);
        }
    });

    let summary = engine.pull(&reference, dir).map_err(|e| {
        spin_fail(&pb, "pull failed");
        describe(&e)
    })?;
    spin_ok(&pb, "pull complete");

    if json {
        println!("{}", json_pretty(&summary)?);
    } else {
        println!(
            "pulled {} into {} ({} layers, {} entries, {} bytes)",
            summary.image,
            summary.dest.display(),
            summary.layers,
            summary.entries,
            summary.bytes,
        );
    }
    Ok(EXIT_SUCCESS)
}
