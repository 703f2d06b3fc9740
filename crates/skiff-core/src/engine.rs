use crate::CoreError;
use serde::Serialize;
use skiff_registry::{AuthSession, ImageReference, RegistryClient, RegistryConfig};
use skiff_runtime::{extract_layer, Isolation, RootFs, RuntimeError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where ephemeral root filesystems are created.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub rootfs_parent: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            rootfs_parent: std::env::temp_dir(),
        }
    }
}

/// Pipeline milestones, reported to the progress callback as they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullEvent<'a> {
    Manifest { layers: usize },
    Layer { index: usize, total: usize, digest: &'a str },
    Extracted { index: usize, entries: usize },
    Executing { command: &'a str },
}

/// What a pull wrote to its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullSummary {
    pub image: String,
    pub dest: PathBuf,
    pub layers: usize,
    pub entries: usize,
    pub bytes: u64,
    pub digests: Vec<String>,
}

type ProgressFn = Box<dyn Fn(PullEvent<'_>) + Send + Sync>;

/// Pull an image from the registry and run a command inside it.
///
/// Each call to [`Engine::pull`] or [`Engine::run_image`] opens its own
/// [`AuthSession`], so exactly one token is requested per operation. Layers
/// are fetched and extracted one at a time, in manifest order.
pub struct Engine {
    config: RegistryConfig,
    isolation: Arc<dyn Isolation>,
    options: RunOptions,
    progress: Option<ProgressFn>,
}

impl Engine {
    pub fn new(config: RegistryConfig, isolation: Arc<dyn Isolation>) -> Self {
        Self {
            config,
            isolation,
            options: RunOptions::default(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(PullEvent<'_>) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn report(&self, event: PullEvent<'_>) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }

    /// Fetch and extract `image` into `dest` without running anything.
    pub fn pull(&self, image: &ImageReference, dest: &Path) -> Result<PullSummary, CoreError> {
        info!("pulling {image} into {}", dest.display());
        self.fetch_into(image, dest)
    }

    /// Run `command` inside `image`, relaying its output to this process's
    /// stdout and stderr. Returns the command's exit code.
    pub fn run_image(
        &self,
        image: &ImageReference,
        command: &str,
        args: &[String],
    ) -> Result<i32, CoreError> {
        // Unlocked handles: the progress spinner and the interrupt handler
        // write to stderr from other threads while the command runs.
        self.run_image_with_output(image, command, args, &mut std::io::stdout(), &mut std::io::stderr())
    }

    /// Like [`Engine::run_image`], writing the command's output to the given streams.
    pub fn run_image_with_output(
        &self,
        image: &ImageReference,
        command: &str,
        args: &[String],
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<i32, CoreError> {
        let rootfs = RootFs::create_in(&self.options.rootfs_parent)?;
        info!("running {command} in {image} ({})", rootfs.path().display());

        self.fetch_into(image, rootfs.path())?;

        self.report(PullEvent::Executing { command });
        let result = self.isolation.run(command, args, rootfs.path())?;

        out.write_all(&result.stdout)?;
        out.flush()?;
        err.write_all(&result.stderr)?;
        err.flush()?;

        if let Err(e) = rootfs.close() {
            warn!("{e}");
        }
        info!("{command} exited with {}", result.exit_code);
        Ok(result.exit_code)
    }

    fn fetch_into(&self, image: &ImageReference, dest: &Path) -> Result<PullSummary, CoreError> {
        let client = RegistryClient::new(&self.config);
        let mut session = AuthSession::new(&self.config, &image.repository());

        let manifest = client.fetch_manifest(&mut session, image)?;
        let total = manifest.layers.len();
        self.report(PullEvent::Manifest { layers: total });

        let mut summary = PullSummary {
            image: image.to_string(),
            dest: dest.to_path_buf(),
            layers: total,
            entries: 0,
            bytes: 0,
            digests: Vec::with_capacity(total),
        };

        for (index, layer) in manifest.layers.iter().enumerate() {
            self.report(PullEvent::Layer {
                index,
                total,
                digest: &layer.digest,
            });
            let blob = client.fetch_layer(&mut session, &image.name, &layer.digest)?;
            let entries = extract_layer(&blob, dest).map_err(|e| match e {
                RuntimeError::Extraction(msg) => {
                    RuntimeError::Extraction(format!("layer {index} ({}): {msg}", layer.digest))
                }
                other => other,
            })?;
            debug!("layer {}/{total} {}: {entries} entries", index + 1, layer.digest);
            self.report(PullEvent::Extracted { index, entries });

            summary.entries += entries;
            summary.bytes += blob.len() as u64;
            summary.digests.push(layer.digest.clone());
        }

        info!(
            "extracted {} layers ({} entries) for {image}",
            summary.layers, summary.entries
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_runtime::MockIsolation;
    use std::sync::Mutex;

    #[test]
    fn default_rootfs_parent_is_temp_dir() {
        assert_eq!(RunOptions::default().rootfs_parent, std::env::temp_dir());
    }

    #[test]
    fn progress_callback_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let engine = Engine::new(RegistryConfig::default(), Arc::new(MockIsolation::new()))
            .with_progress(move |event| {
                sink.lock().unwrap().push(format!("{event:?}"));
            });

        engine.report(PullEvent::Manifest { layers: 2 });
        engine.report(PullEvent::Executing { command: "true" });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("Manifest"));
        assert!(seen[1].contains("true"));
    }

    #[test]
    fn summary_serializes_to_json() {
        let summary = PullSummary {
            image: "alpine:latest".to_owned(),
            dest: PathBuf::from("/tmp/out"),
            layers: 1,
            entries: 3,
            bytes: 512,
            digests: vec!["sha256:ab".to_owned()],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["image"], "alpine:latest");
        assert_eq!(json["layers"], 1);
        assert_eq!(json["digests"][0], "sha256:ab");
    }
}
