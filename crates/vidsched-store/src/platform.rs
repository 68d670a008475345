//! Data root resolution and the fixed names that live under it.
//!
//! Every persisted file is placed under one directory chosen once per process.
//! Nothing here is global: callers resolve a root and hand the resulting path
//! to [`crate::AssetStore`] and [`crate::DocumentStore`].

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DataRootError;

/// Directory name used under the user-config and working-directory fallbacks,
/// and under the platform data dir for the shipped binary.
pub const APP_DIR_NAME: &str = "video-scheduler-app";

pub const VIDEOS_DIR: &str = "videos";
pub const SCHEDULE_FILE: &str = "schedules.json";
pub const PLAYLIST_FILE: &str = "playlist.json";
pub const CONFIG_FILE: &str = "config.toml";

/// Name of the OS environment variable that points at the per-user config
/// directory.
#[cfg(windows)]
pub const USER_CONFIG_ENV: &str = "APPDATA";

#[cfg(not(windows))]
pub const USER_CONFIG_ENV: &str = "XDG_CONFIG_HOME";

/// Candidate locations for the data root, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct DataRootSources {
    /// Writable application-data directory supplied by the hosting
    /// environment. Used as-is.
    pub app_data: Option<PathBuf>,
    /// Value of [`USER_CONFIG_ENV`], if set.
    pub user_config: Option<PathBuf>,
    /// The process working directory.
    pub working_dir: Option<PathBuf>,
}

impl DataRootSources {
    /// Collect the real sources from the process environment.
    pub fn from_env(app_data: Option<PathBuf>) -> Self {
        let user_config = std::env::var_os(USER_CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            app_data,
            user_config,
            working_dir: std::env::current_dir().ok(),
        }
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(3);
        if let Some(dir) = &self.app_data {
            out.push(dir.clone());
        }
        if let Some(dir) = &self.user_config {
            out.push(dir.join(APP_DIR_NAME));
        }
        match &self.working_dir {
            Some(dir) => out.push(dir.join(APP_DIR_NAME)),
            None => out.push(PathBuf::from(".").join(APP_DIR_NAME)),
        }
        out
    }
}

/// Pick the first candidate that exists, or can be created, as a writable
/// directory. Creates it as a side effect.
pub fn resolve(sources: &DataRootSources) -> Result<PathBuf, DataRootError> {
    resolve_with(sources, check_writable)
}

/// [`resolve`] with the write check supplied by the caller.
pub(crate) fn resolve_with<F>(
    sources: &DataRootSources,
    mut check: F,
) -> Result<PathBuf, DataRootError>
where
    F: FnMut(&Path) -> std::io::Result<()>,
{
    let mut attempts = Vec::new();

    for candidate in sources.candidates() {
        match ensure_dir(&candidate).and_then(|()| check(&candidate)) {
            Ok(()) => {
                info!("Data root: {}", candidate.display());
                return Ok(candidate);
            }
            Err(e) => {
                warn!("Data root candidate {} unusable: {}", candidate.display(), e);
                attempts.push((candidate, e));
            }
        }
    }

    Err(DataRootError::Unavailable { attempts })
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    if !std::fs::metadata(dir)?.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "not a directory",
        ));
    }
    Ok(())
}

/// Create and remove a scratch file in `dir`. Permission bits alone say
/// nothing about whether this process may write there.
fn check_writable(dir: &Path) -> std::io::Result<()> {
    let scratch = tempfile::Builder::new()
        .prefix(".write-check")
        .tempfile_in(dir)?;
    scratch.close()
}

/// Default application-data directory for the shipped binary: the platform
/// data dir (`~/.local/share`, `%APPDATA%`, `~/Library/Application Support`).
pub fn default_app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR_NAME))
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn videos_dir(data_root: &Path) -> PathBuf {
    data_root.join(VIDEOS_DIR)
}
