use clap::Parser;
use skiff_server::load_fixture_dir;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "skiff-registry-server",
    about = "Serve a fixture directory as an image registry"
)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 5080)]
    port: u16,

    /// Directory laid out as <name>/<tag>/<layer files>.
    #[arg(long, default_value = "./skiff-fixtures")]
    data_dir: PathBuf,

    /// Bearer token handed out by the /token route.
    #[arg(long, default_value = "fixture-token")]
    token: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = match load_fixture_dir(&cli.data_dir, &cli.token) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to load {}: {e}", cli.data_dir.display());
            return ExitCode::FAILURE;
        }
    };

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting skiff-registry-server on {addr}");
    info!("token endpoint: http://{addr}/token");

    if let Err(e) = skiff_server::run_server(&store, &addr) {
        error!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
