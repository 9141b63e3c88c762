use std::path::PathBuf;

use automic_runtime::config::RigConfig;
use automic_runtime::motor::{ConnectionStatus, MotionCoordinator};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Cable-suspended microphone rig runtime
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Rig configuration (TOML); built-in rig when omitted
    #[arg(long, env = "AUTOMIC_CONFIG")]
    config: Option<PathBuf>,

    /// Probe all four drives, print their status and exit
    #[arg(long)]
    check_only: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match RigConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };

    if args.check_only {
        let statuses = MotionCoordinator::new(&config).check_connections().await;
        for (name, status) in &statuses {
            println!("{:<10} {}", name, status);
        }
        if statuses.values().any(|s| *s != ConnectionStatus::Connected) {
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = automic_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
