//! Startup and shutdown sequencing.
//!
//! ```text
//! Idle -> RootResolved -> StoresInitialized -> ServiceListening -> Ready
//!      -> ShuttingDown -> Stopped
//! ```
//!
//! Any failure on the way to `Ready` ends in `Failed`, and the host is told
//! through [`Host::escalate`]. The UI is only presented once the service has
//! reported that its listener is bound.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use vidsched_store::config::Config;
use vidsched_store::platform::{self, DataRootSources};
use vidsched_store::{AssetStore, DocumentStore};

use crate::error::StartupError;
use crate::http::{self, ServiceHandle, ServiceOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    RootResolved,
    StoresInitialized,
    ServiceListening,
    Ready,
    ShuttingDown,
    Stopped,
    Failed,
}

/// Where the running service can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub base_url: String,
    pub data_root: PathBuf,
}

/// The application shell hosting the service (window, dialogs, data dirs).
pub trait Host: Send {
    /// Writable application-data directory, if the host has one.
    fn app_data_dir(&self) -> Option<PathBuf>;

    /// Show the UI. Called once, after the service is listening.
    fn present(&mut self, endpoint: &Endpoint) -> anyhow::Result<()>;

    /// Tell the user that startup failed. Expected to block until the user
    /// has seen it.
    fn escalate(&mut self, title: &str, message: &str);
}

/// Load the settings file. A file that cannot be read or parsed is reported
/// through the host, since nothing else is running yet to report it.
pub fn load_config(path: &Path, host: &mut impl Host) -> Option<Config> {
    match Config::load_from(path) {
        Ok(config) => Some(config),
        Err(e) => {
            host.escalate(
                "Configuration Error",
                &format!(
                    "The settings file {} could not be loaded.\n\n{:#}",
                    path.display(),
                    e
                ),
            );
            None
        }
    }
}

pub struct Coordinator<H: Host> {
    config: Config,
    host: H,
    phase: Phase,
    service: Option<ServiceHandle>,
    endpoint: Option<Endpoint>,
}

impl<H: Host> Coordinator<H> {
    pub fn new(config: Config, host: H) -> Self {
        Self {
            config,
            host,
            phase: Phase::Idle,
            service: None,
            endpoint: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn advance(&mut self, next: Phase) {
        debug!("Lifecycle: {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Run the whole startup sequence. Only valid from `Idle`.
    pub async fn start(&mut self) -> Result<Endpoint, StartupError> {
        if self.phase != Phase::Idle {
            return Err(StartupError::InvalidTransition(self.phase));
        }

        match self.bring_up().await {
            Ok(endpoint) => {
                info!("Application ready at {}", endpoint.base_url);
                self.endpoint = Some(endpoint.clone());
                Ok(endpoint)
            }
            Err(e) => {
                if let Some(service) = self.service.take() {
                    service.shutdown().await;
                }
                self.advance(Phase::Failed);
                error!("Startup failed: {}", e);
                self.host.escalate(e.title(), &e.user_message());
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self) -> Result<Endpoint, StartupError> {
        let sources = DataRootSources::from_env(self.host.app_data_dir());
        let data_root = platform::resolve(&sources)?;
        self.advance(Phase::RootResolved);

        let assets = Arc::new(AssetStore::new(&data_root));
        assets.init().await?;
        let documents = Arc::new(DocumentStore::new(&data_root));
        documents.init().await?;
        self.advance(Phase::StoresInitialized);

        let options = ServiceOptions::from(&self.config.server);
        let service = self
            .service
            .insert(http::start_server(options, assets, documents));
        let addr = service.ready().await?;
        self.advance(Phase::ServiceListening);

        let endpoint = Endpoint {
            addr,
            base_url: format!("http://{}", addr),
            data_root,
        };
        self.host
            .present(&endpoint)
            .map_err(StartupError::Present)?;
        self.advance(Phase::Ready);

        Ok(endpoint)
    }

    /// Close the listener and wait for the service task to end. Only acts in
    /// `Ready`; returns the resulting phase.
    pub async fn shutdown(&mut self) -> Phase {
        if self.phase != Phase::Ready {
            return self.phase;
        }

        self.advance(Phase::ShuttingDown);
        if let Some(service) = self.service.take() {
            service.shutdown().await;
        }
        self.endpoint = None;
        self.advance(Phase::Stopped);
        info!("Application stopped");
        self.phase
    }
}
