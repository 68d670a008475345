use std::net::SocketAddr;

use thiserror::Error;
use vidsched_store::{DataRootError, StoreError};

use crate::lifecycle::Phase;

/// Failures of the embedded service itself (not of a single request).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("service task exited before reporting readiness")]
    NotStarted,
}

impl ServiceError {
    pub fn is_port_in_use(&self) -> bool {
        matches!(
            self,
            ServiceError::Bind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse
        )
    }
}

/// Anything that stops the application from reaching the ready state.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    DataRoot(#[from] DataRootError),

    #[error("failed to initialise storage: {0}")]
    Stores(#[from] StoreError),

    #[error(transparent)]
    Listen(#[from] ServiceError),

    #[error("failed to present the UI: {0}")]
    Present(#[source] anyhow::Error),

    #[error("cannot start from phase {0:?}")]
    InvalidTransition(Phase),
}

impl StartupError {
    /// Short title for the user-facing notification.
    pub fn title(&self) -> &'static str {
        match self {
            StartupError::DataRoot(_) | StartupError::Stores(_) => "Storage Error",
            StartupError::Listen(_) => "Backend Error",
            StartupError::Present(_) | StartupError::InvalidTransition(_) => "Startup Error",
        }
    }

    /// Body of the user-facing notification.
    pub fn user_message(&self) -> String {
        let lead = match self {
            StartupError::DataRoot(_) => {
                "No writable folder is available for the application's data."
            }
            StartupError::Stores(_) => "The application could not prepare its data folder.",
            StartupError::Listen(e) if e.is_port_in_use() => {
                "The local server failed to start because its port is already in use. \
                 Close any other running copy of the application and try again."
            }
            StartupError::Listen(_) => "The local server failed to start.",
            StartupError::Present(_) => "The application window could not be opened.",
            StartupError::InvalidTransition(_) => "The application was started twice.",
        };
        format!("{}\n\n{}", lead, self)
    }
}
