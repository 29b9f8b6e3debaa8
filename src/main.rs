use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ilinden::config;
use ilinden::server;

#[derive(Parser)]
#[command(name = "ilinden")]
#[command(version, about = "JWT-authenticating HLS reverse proxy")]
struct Cli {
    /// Path to the config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fallback config path used when --config is not given
    #[arg(long, default_value = "configs/ilinden.yaml")]
    config_default: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (config, path) =
        match config::load_with_fallback(cli.config.as_deref(), &cli.config_default) {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                std::process::exit(1);
            }
        };

    init_logging(&config.log);

    info!(
        "starting ilinden {} (config: {})",
        env!("CARGO_PKG_VERSION"),
        path
    );

    if let Err(e) = server::start(config).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(log: &config::LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}
