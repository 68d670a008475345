use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::lifecycle::{Endpoint, Host};

/// Host for running the backend on its own from a terminal. The UI shell
/// points at the printed address; failures are shown as a banner on stderr.
pub struct ConsoleHost {
    app_data: Option<PathBuf>,
}

impl ConsoleHost {
    pub fn new(app_data: Option<PathBuf>) -> Self {
        Self { app_data }
    }
}

impl Host for ConsoleHost {
    fn app_data_dir(&self) -> Option<PathBuf> {
        self.app_data.clone()
    }

    fn present(&mut self, endpoint: &Endpoint) -> anyhow::Result<()> {
        eprintln!("Backend running on {}", endpoint.base_url);
        eprintln!("User data folder: {}", endpoint.data_root.display());
        Ok(())
    }

    fn escalate(&mut self, title: &str, message: &str) {
        error!("{}: {}", title, message);
        let rule = "=".repeat(72);
        eprintln!("\n{rule}\n{title}\n{rule}\n{message}\n{rule}\n");
    }
}

/// Completes when the process is asked to exit (Ctrl+C, or SIGTERM on unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT (Ctrl+C)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("received SIGINT (Ctrl+C)");
}
