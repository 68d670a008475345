use std::path::PathBuf;
use std::process::ExitCode;

use tracing::info;

use vidsched_daemon::host::{self, ConsoleHost};
use vidsched_daemon::{load_config, logging, Coordinator};
use vidsched_store::config::Config;
use vidsched_store::platform;

/// `--config <path>` on the command line, else `VIDSCHED_CONFIG`.
fn config_path_override() -> Option<PathBuf> {
    let mut args = std::env::args_os().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    std::env::var_os("VIDSCHED_CONFIG").map(PathBuf::from)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = config_path_override().unwrap_or_else(Config::config_path);
    let Some(config) = load_config(&config_path, &mut ConsoleHost::new(None)) else {
        return ExitCode::FAILURE;
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialise logging: {:#}", e);
        return ExitCode::FAILURE;
    }
    info!("Config loaded from: {:?}", config_path);

    let app_data = config
        .storage
        .data_root
        .clone()
        .or_else(platform::default_app_data_dir);
    let mut coordinator = Coordinator::new(config, ConsoleHost::new(app_data));

    // The coordinator has already escalated the failure to the user.
    if coordinator.start().await.is_err() {
        return ExitCode::FAILURE;
    }

    host::shutdown_signal().await;
    coordinator.shutdown().await;

    ExitCode::SUCCESS
}
