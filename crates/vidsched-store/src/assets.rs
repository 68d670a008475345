//! Uploaded media files.
//!
//! Assets live in `<data root>/videos/` as `<stamp>-<sanitized name>`. The
//! stamp is the ingestion time in Unix milliseconds, bumped so that it is
//! strictly increasing within one store, and files are created with
//! create-new semantics, so a storage name is never handed out twice.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::platform;

/// Longest sanitized original name kept in a storage name.
const MAX_NAME_LEN: usize = 180;
const FALLBACK_NAME: &str = "upload";
/// Attempts at finding a free storage name before giving up.
const MAX_NAME_ATTEMPTS: usize = 64;

/// A stored binary file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub storage_name: String,
    pub original_name: String,
    pub byte_length: u64,
    pub storage_path: PathBuf,
}

pub struct AssetStore {
    dir: PathBuf,
    last_stamp: AtomicI64,
}

impl AssetStore {
    /// Repository rooted at `<data_root>/videos`. The directory is created on
    /// the first store.
    pub fn new(data_root: &Path) -> Self {
        Self {
            dir: platform::videos_dir(data_root),
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the storage directory up front instead of on first store.
    pub async fn init(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        info!("Asset directory: {}", self.dir.display());
        Ok(())
    }

    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|v| v);
        now.max(prev + 1)
    }

    /// Store a complete payload in one call.
    pub async fn store(&self, bytes: &[u8], original_name: &str) -> Result<Asset, StoreError> {
        let mut pending = self.begin(original_name).await?;
        pending.write(bytes).await?;
        pending.finish().await
    }

    /// Reserve a fresh storage name and open its file for streaming writes.
    pub async fn begin(&self, original_name: &str) -> Result<PendingAsset, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let safe_name = sanitize_file_name(original_name);

        for _ in 0..MAX_NAME_ATTEMPTS {
            let storage_name = format!("{}-{}", self.next_stamp(), safe_name);
            let path = self.dir.join(&storage_name);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    return Ok(PendingAsset {
                        file: Some(file),
                        path,
                        storage_name,
                        original_name: original_name.to_string(),
                        written: 0,
                        finished: false,
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Storage name {} already taken, retrying", storage_name);
                }
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }

        Err(StoreError::io(
            &self.dir,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "could not find a free storage name",
            ),
        ))
    }

    /// Open an asset for reading. Names that could not have been produced by
    /// this store are reported as not found.
    pub async fn retrieve(&self, storage_name: &str) -> Result<AssetReader, StoreError> {
        if !is_storage_name(storage_name) {
            return Err(StoreError::AssetNotFound {
                name: storage_name.to_string(),
            });
        }

        let path = self.dir.join(storage_name);
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::AssetNotFound {
                    name: storage_name.to_string(),
                })
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let meta = file.metadata().await.map_err(|e| StoreError::io(&path, e))?;
        if !meta.is_file() {
            return Err(StoreError::AssetNotFound {
                name: storage_name.to_string(),
            });
        }

        Ok(AssetReader {
            file,
            path,
            len: meta.len(),
        })
    }
}

/// An asset being written. Dropping it without calling [`finish`] removes the
/// partial file.
///
/// [`finish`]: PendingAsset::finish
pub struct PendingAsset {
    file: Option<File>,
    path: PathBuf,
    storage_name: String,
    original_name: String,
    written: u64,
    finished: bool,
}

impl PendingAsset {
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        let Some(file) = self.file.as_mut() else {
            return Err(StoreError::io(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::Other, "asset already closed"),
            ));
        };
        file.write_all(chunk)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<Asset, StoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| StoreError::io(&self.path, e))?;
            file.sync_all()
                .await
                .map_err(|e| StoreError::io(&self.path, e))?;
        }
        self.finished = true;

        info!(
            "Stored asset {} ({} bytes, original name {:?})",
            self.storage_name, self.written, self.original_name
        );

        Ok(Asset {
            storage_name: std::mem::take(&mut self.storage_name),
            original_name: std::mem::take(&mut self.original_name),
            byte_length: self.written,
            storage_path: self.path.clone(),
        })
    }

    /// Discard the partial file.
    pub async fn abort(mut self) {
        self.file.take();
        self.finished = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!("Failed to remove partial asset {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for PendingAsset {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.file.take();
        // Synchronous: the partial file is gone before the handler that
        // dropped it produces a response.
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove partial asset {}: {}", self.path.display(), e);
        }
    }
}

/// An opened asset.
pub struct AssetReader {
    file: File,
    path: PathBuf,
    len: u64,
}

impl AssetReader {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reader over the inclusive byte span `start..=end`, or over the whole
    /// file for `None`. The span must come from [`ByteRange::resolve`].
    pub async fn into_reader(mut self, span: Option<(u64, u64)>) -> Result<Take<File>, StoreError> {
        match span {
            None => Ok(self.file.take(self.len)),
            Some((start, end)) => {
                self.file
                    .seek(std::io::SeekFrom::Start(start))
                    .await
                    .map_err(|e| StoreError::io(&self.path, e))?;
                Ok(self.file.take(end - start + 1))
            }
        }
    }
}

/// A single `Range: bytes=...` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-`
    From(u64),
    /// `bytes=a-b`
    FromTo(u64, u64),
    /// `bytes=-n`, the last `n` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a Range header value. Multi-range and malformed values give
    /// `None`; the caller then serves the full content.
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            return end.parse().ok().map(ByteRange::Suffix);
        }
        let start: u64 = start.parse().ok()?;
        if end.is_empty() {
            return Some(ByteRange::From(start));
        }
        let end: u64 = end.parse().ok()?;
        if end < start {
            return None;
        }
        Some(ByteRange::FromTo(start, end))
    }

    /// Inclusive `(start, end)` within a resource of `total` bytes, or `None`
    /// when the range cannot be satisfied.
    pub fn resolve(self, total: u64) -> Option<(u64, u64)> {
        if total == 0 {
            return None;
        }
        let last = total - 1;
        match self {
            ByteRange::From(start) if start <= last => Some((start, last)),
            ByteRange::FromTo(start, end) if start <= last => Some((start, end.min(last))),
            ByteRange::Suffix(n) if n > 0 => Some((total - n.min(total), last)),
            _ => None,
        }
    }
}

/// URL under which the embedded service serves `storage_name`.
pub fn locator(base_url: &str, storage_name: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        platform::VIDEOS_DIR,
        storage_name
    )
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

fn is_storage_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && name.chars().all(is_name_char)
}

/// Reduce a client-supplied file name to a safe, URL-friendly form.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or("");
    let mapped: String = base
        .chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect();
    let trimmed = mapped.trim_start_matches('.');

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return FALLBACK_NAME.to_string();
    }
    if trimmed.len() <= MAX_NAME_LEN {
        return trimmed.to_string();
    }

    // Only ASCII is left, so byte offsets are char boundaries.
    match trimmed.rfind('.') {
        Some(dot) if trimmed.len() - dot <= 16 => {
            let ext = &trimmed[dot..];
            format!("{}{}", &trimmed[..MAX_NAME_LEN - ext.len()], ext)
        }
        _ => trimmed[..MAX_NAME_LEN].to_string(),
    }
}
