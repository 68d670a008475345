//! Whole-file JSON documents (schedule and playlist).
//!
//! Each document is one file under the data root. Writes replace the file
//! atomically (temp file + rename) while holding that document's lock, so a
//! reader never sees a half-written file and two writers never interleave.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Schedule,
    Playlist,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 2] = [DocumentKind::Schedule, DocumentKind::Playlist];

    pub fn file_name(self) -> &'static str {
        match self {
            DocumentKind::Schedule => platform::SCHEDULE_FILE,
            DocumentKind::Playlist => platform::PLAYLIST_FILE,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Schedule => f.write_str("schedule"),
            DocumentKind::Playlist => f.write_str("playlist"),
        }
    }
}

pub struct DocumentStore {
    root: PathBuf,
    schedule_lock: Mutex<()>,
    playlist_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            root: data_root.into(),
            schedule_lock: Mutex::new(()),
            playlist_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, kind: DocumentKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    fn lock(&self, kind: DocumentKind) -> &Mutex<()> {
        match kind {
            DocumentKind::Schedule => &self.schedule_lock,
            DocumentKind::Playlist => &self.playlist_lock,
        }
    }

    /// Create every document that does not exist yet as an empty array.
    /// Existing files are left alone, even if they fail to parse.
    pub async fn init(&self) -> Result<(), StoreError> {
        for kind in DocumentKind::ALL {
            let _guard = self.lock(kind).lock().await;
            let path = self.path(kind);
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            if !exists {
                self.replace(kind, &empty_document()).await?;
                info!("Initialised {} document at {}", kind, path.display());
            }
        }
        Ok(())
    }

    /// Read the current document. An absent file is created as `[]`.
    pub async fn read(&self, kind: DocumentKind) -> Result<Value, StoreError> {
        let _guard = self.lock(kind).lock().await;
        let path = self.path(kind);

        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| StoreError::Corrupt { kind, path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = empty_document();
                self.replace(kind, &empty).await?;
                Ok(empty)
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Replace the whole document with `content`.
    pub async fn write(&self, kind: DocumentKind, content: &Value) -> Result<(), StoreError> {
        let _guard = self.lock(kind).lock().await;
        self.replace(kind, content).await
    }

    // Caller holds the lock for `kind`.
    async fn replace(&self, kind: DocumentKind, content: &Value) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(content)
            .map_err(|source| StoreError::Encode { kind, source })?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let path = self.path(kind);
        let tmp = temp_path(&path);
        write_synced(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&path, e));
        }

        debug!("Wrote {} document ({} bytes)", kind, json.len());
        Ok(())
    }
}

fn empty_document() -> Value {
    Value::Array(Vec::new())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
