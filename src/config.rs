use std::io;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use crate::error::DownloadError;
use crate::retry::RetryPolicy;

/// Tunables for the acquisition pipeline.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Directory holding finished artifacts and `.part` temp files. This
    /// crate is the sole writer to it.
    pub models_dir: PathBuf,
    /// Relative tolerance when comparing a file against a descriptor's
    /// approximate size. Mirrors and formats can differ slightly in exact
    /// byte count.
    pub size_tolerance: f64,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    /// Longest wait for the next body chunk before the attempt counts as
    /// stalled.
    pub read_timeout: Duration,
    /// Minimum spacing between progress events per session.
    pub progress_interval: Duration,
    pub user_agent: String,
}

impl DownloadConfig {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            size_tolerance: 0.10,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(100),
            user_agent: format!("push-to-talk-stt/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Config rooted at the platform application data directory.
    pub fn with_default_dir() -> Result<Self, DownloadError> {
        Ok(Self::new(resolve_model_dir()?))
    }
}

fn resolve_model_dir() -> Result<PathBuf, DownloadError> {
    let project_dirs = ProjectDirs::from("com", "PushToTalk", "PushToTalk").ok_or_else(|| {
        DownloadError::Filesystem(io::Error::new(
            io::ErrorKind::NotFound,
            "missing project directories",
        ))
    })?;
    Ok(project_dirs.data_dir().join("models"))
}
