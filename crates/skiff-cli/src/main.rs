mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::EXIT_INFRA_FAILURE;
use skiff_core::{install_signal_handler, ErrorKind};
use skiff_registry::RegistryConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "skiff",
    version,
    about = "Pull an image from a registry and run a command inside it"
)]
struct Cli {
    /// Path to a TOML config file (default: ~/.config/skiff/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry base URL (overrides config and SKIFF_REGISTRY).
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a command inside an image; exits with the command's exit code.
    Run {
        /// Image name, e.g. "alpine", "alpine:3.19" or "alpine@sha256:...".
        image: String,
        /// Command to execute inside the image.
        command: String,
        /// Arguments passed to the command.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Fetch an image and extract its layers into a directory.
    Pull {
        /// Image name, e.g. "alpine" or "alpine:3.19".
        image: String,
        /// Destination directory (created if missing).
        dir: PathBuf,
    },
    /// Check that this host can isolate container commands.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SKIFF_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let needs_registry = matches!(cli.command, Commands::Run { .. } | Commands::Pull { .. });
    let config = if needs_registry {
        match load_config(&cli) {
            Ok(config) => config,
            Err(msg) => {
                eprintln!("error: {msg}");
                return ExitCode::from(EXIT_INFRA_FAILURE);
            }
        }
    } else {
        RegistryConfig::default()
    };

    let result = match cli.command {
        Commands::Run {
            image,
            command,
            args,
        } => commands::run::run(config, &isolation_name(), &image, &command, &args),
        Commands::Pull { image, dir } => commands::pull::run(config, &image, &dir, cli.json),
        Commands::Doctor => commands::doctor::run(cli.json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_INFRA_FAILURE)
        }
    }
}

/// Config file, then `SKIFF_*` environment, then command-line flags.
fn load_config(cli: &Cli) -> Result<RegistryConfig, String> {
    let loaded = match &cli.config {
        Some(path) => RegistryConfig::load(path),
        None => RegistryConfig::load_default(),
    };
    let mut config = loaded
        .and_then(RegistryConfig::apply_env)
        .map_err(|e| format!("{}: {e}", ErrorKind::Config))?;

    if let Some(url) = &cli.registry {
        config.registry_url = url.trim_end_matches('/').to_owned();
    }
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

/// `namespace` unless `SKIFF_ISOLATION` selects another backend.
fn isolation_name() -> String {
    std::env::var("SKIFF_ISOLATION").unwrap_or_else(|_| "namespace".to_owned())
}
