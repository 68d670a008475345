use std::path::PathBuf;

use thiserror::Error;

use crate::documents::DocumentKind;

/// Errors from the asset repository and the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("asset not found: {name}")]
    AssetNotFound { name: String },

    /// The document file exists but does not hold valid JSON. The file is
    /// left on disk untouched so the user's data can be recovered by hand.
    #[error("{kind} document at {} is not valid JSON: {source}", path.display())]
    Corrupt {
        kind: DocumentKind,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {kind} document: {source}")]
    Encode {
        kind: DocumentKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to settle on a writable data root.
#[derive(Debug, Error)]
pub enum DataRootError {
    #[error("no writable data directory available (tried: {})", describe_attempts(.attempts))]
    Unavailable {
        attempts: Vec<(PathBuf, std::io::Error)>,
    },
}

fn describe_attempts(attempts: &[(PathBuf, std::io::Error)]) -> String {
    attempts
        .iter()
        .map(|(path, err)| format!("{}: {}", path.display(), err))
        .collect::<Vec<_>>()
        .join("; ")
}
