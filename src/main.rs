use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use xeryon_xd::config::{DEFAULT_CONFIG_PATH, RuntimeConfig};

/// Drive Xeryon XD controllers and bridge them to zenoh
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Controller configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = match RuntimeConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    if args.dry_run {
        println!(
            "{}: {} controller(s) OK",
            args.config.display(),
            config.controllers.len()
        );
        return;
    }

    if let Err(e) = xeryon_xd::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
