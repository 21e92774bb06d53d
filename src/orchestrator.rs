use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache;
use crate::catalog::{Catalog, ModelDescriptor};
use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::events::{DownloadEvent, DownloadHandle};
use crate::retry;
use crate::transfer;
use crate::verify;

/// Suffix of in-progress temp files, so a restarted host process can detect
/// an orphaned partial and offer to resume or discard it.
pub const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Discard any partial bytes from an earlier attempt and transfer from
    /// offset zero.
    pub reset: bool,
}

/// Installation state of one model, as reported by [`DownloadOrchestrator::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ModelStatus {
    NotDownloaded,
    #[serde(rename_all = "camelCase")]
    Downloading { percent: f32 },
    Downloaded,
    Corrupt,
}

/// Per-session shared state: cancel token, completion latch, byte counters
/// for status polling.
#[derive(Clone)]
struct Session {
    cancel: CancellationToken,
    finished: CancellationToken,
    bytes_downloaded: Arc<AtomicU64>,
    bytes_total: Arc<AtomicU64>,
}

impl Session {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            bytes_downloaded: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
        }
    }

    fn percent(&self) -> f32 {
        let total = self.bytes_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let downloaded = self.bytes_downloaded.load(Ordering::Relaxed);
        ((downloaded as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as f32
    }
}

/// Owns the model-id → active-session map (single-flight enforcement).
#[derive(Default)]
struct SessionManager {
    active: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    fn begin(&self, model_id: &str) -> Result<Session, DownloadError> {
        let mut active = self.active.lock();
        if active.contains_key(model_id) {
            return Err(DownloadError::AlreadyInProgress(model_id.to_string()));
        }
        let session = Session::new();
        active.insert(model_id.to_string(), session.clone());
        Ok(session)
    }

    fn get(&self, model_id: &str) -> Option<Session> {
        self.active.lock().get(model_id).cloned()
    }

    /// Remove the slot, then release anyone awaiting the session's end.
    fn finish(&self, model_id: &str) {
        let removed = self.active.lock().remove(model_id);
        if let Some(session) = removed {
            session.finished.cancel();
        }
    }
}

struct Inner {
    config: DownloadConfig,
    catalog: Catalog,
    client: reqwest::Client,
    sessions: SessionManager,
}

/// Drives model downloads end to end: cache check, retry-wrapped resumable
/// transfer, verification, atomic finalize, progress events.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl DownloadOrchestrator {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        Self::with_catalog(config, Catalog::builtin())
    }

    pub fn with_catalog(config: DownloadConfig, catalog: Catalog) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| DownloadError::Network(err.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                catalog,
                client,
                sessions: SessionManager::default(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &DownloadConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Begin acquiring a model. Returns the session's event subscription,
    /// which ends with exactly one terminal event. Rejects with
    /// [`DownloadError::AlreadyInProgress`] while a session for the same id
    /// is active; distinct ids run concurrently.
    pub fn start(&self, model_id: &str) -> Result<DownloadHandle, DownloadError> {
        self.start_with_options(model_id, StartOptions::default())
    }

    pub fn start_with_options(
        &self,
        model_id: &str,
        options: StartOptions,
    ) -> Result<DownloadHandle, DownloadError> {
        let descriptor = self.inner.catalog.describe(model_id)?.clone();
        let session = self.inner.sessions.begin(model_id)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_session(inner, descriptor, options, session, events_tx));
        Ok(DownloadHandle::new(model_id.to_string(), events_rx))
    }

    /// Request cancellation and wait for the session to reach a terminal
    /// state. No events for the session are delivered after this resolves.
    /// Idempotent: resolves immediately when nothing is active.
    pub async fn cancel(&self, model_id: &str) {
        let Some(session) = self.inner.sessions.get(model_id) else {
            return;
        };
        session.cancel.cancel();
        session.finished.cancelled().await;
    }

    pub fn status(&self, model_id: &str) -> Result<ModelStatus, DownloadError> {
        let descriptor = self.inner.catalog.describe(model_id)?;
        if let Some(session) = self.inner.sessions.get(model_id) {
            return Ok(ModelStatus::Downloading {
                percent: session.percent(),
            });
        }
        let dest = self.destination_path(descriptor);
        match std::fs::metadata(&dest) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ModelStatus::NotDownloaded),
            Err(err) => Err(err.into()),
            Ok(metadata) => {
                if cache::size_within_tolerance(
                    metadata.len(),
                    descriptor.size_bytes,
                    self.inner.config.size_tolerance,
                ) {
                    Ok(ModelStatus::Downloaded)
                } else {
                    Ok(ModelStatus::Corrupt)
                }
            }
        }
    }

    /// Size of an orphaned partial file left by a previous run, `None` when
    /// there is none or a session currently owns it.
    pub fn partial_bytes(&self, model_id: &str) -> Result<Option<u64>, DownloadError> {
        let descriptor = self.inner.catalog.describe(model_id)?;
        if self.inner.sessions.get(model_id).is_some() {
            return Ok(None);
        }
        let part = partial_path(&self.destination_path(descriptor));
        match std::fs::metadata(&part) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
            Ok(metadata) => Ok(Some(metadata.len())),
        }
    }

    /// Drop an orphaned partial file so the next start transfers from zero.
    pub fn discard_partial(&self, model_id: &str) -> Result<(), DownloadError> {
        let descriptor = self.inner.catalog.describe(model_id)?;
        if self.inner.sessions.get(model_id).is_some() {
            return Err(DownloadError::AlreadyInProgress(model_id.to_string()));
        }
        let part = partial_path(&self.destination_path(descriptor));
        match std::fs::remove_file(&part) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
            Ok(()) => Ok(()),
        }
    }

    #[must_use]
    pub fn destination_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.inner.config.models_dir.join(&descriptor.file_name)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn run_session(
    inner: Arc<Inner>,
    descriptor: ModelDescriptor,
    options: StartOptions,
    session: Session,
    events: mpsc::UnboundedSender<DownloadEvent>,
) {
    let model_id = descriptor.id.clone();
    match drive(&inner, &descriptor, options, &session, &events).await {
        Ok(()) => {}
        Err(DownloadError::Aborted) => {
            tracing::info!("download of {model_id} cancelled");
            let _ = events.send(DownloadEvent::Cancelled {
                model_id: model_id.clone(),
            });
        }
        Err(err) => {
            tracing::warn!("download of {model_id} failed: {err}");
            let _ = events.send(DownloadEvent::Error {
                model_id: model_id.clone(),
                success: false,
                error_kind: err.kind().to_string(),
                message: err.to_string(),
                sources_attempted: err.sources_attempted().to_vec(),
            });
        }
    }
    inner.sessions.finish(&model_id);
}

/// The session state machine: Checking → Downloading → Verifying →
/// Finalizing → Complete. Errors bubble to `run_session`, which turns them
/// into the terminal event.
async fn drive(
    inner: &Inner,
    descriptor: &ModelDescriptor,
    options: StartOptions,
    session: &Session,
    events: &mpsc::UnboundedSender<DownloadEvent>,
) -> Result<(), DownloadError> {
    let config = &inner.config;
    let dest = config.models_dir.join(&descriptor.file_name);
    let part = partial_path(&dest);

    // Checking
    tokio::fs::create_dir_all(&config.models_dir).await?;

    let cache_status = {
        let descriptor = descriptor.clone();
        let dest = dest.clone();
        let tolerance = config.size_tolerance;
        tokio::task::spawn_blocking(move || cache::check_existing(&descriptor, &dest, tolerance))
            .await
            .map_err(|err| {
                DownloadError::Filesystem(io::Error::new(io::ErrorKind::Other, err))
            })??
    };
    if cache_status.valid {
        tracing::info!(
            "model {} already cached at {}",
            descriptor.id,
            dest.display()
        );
        let _ = events.send(DownloadEvent::Complete {
            model_id: descriptor.id.clone(),
            success: true,
            path: dest,
            size_bytes: cache_status.size_bytes,
            cached: true,
            used_fallback: false,
        });
        return Ok(());
    }
    if cache_status.exists {
        tracing::warn!(
            "existing artifact for {} is stale or corrupt, re-downloading",
            descriptor.id
        );
    }

    if options.reset {
        match tokio::fs::remove_file(&part).await {
            Ok(()) => tracing::info!("discarded partial for {} on request", descriptor.id),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }

    // A full-size partial that verifies is a leftover from a failed
    // finalize; rename it without re-downloading.
    if let Some(size_bytes) = finalizable_partial(descriptor, &part, config).await? {
        tokio::fs::rename(&part, &dest).await?;
        tracing::info!(
            "finalized previously verified partial for {}",
            descriptor.id
        );
        let _ = events.send(DownloadEvent::Complete {
            model_id: descriptor.id.clone(),
            success: true,
            path: dest,
            size_bytes,
            cached: false,
            used_fallback: false,
        });
        return Ok(());
    }

    // Downloading
    let sources: Vec<String> = descriptor
        .sources()
        .into_iter()
        .map(str::to_string)
        .collect();

    let (outcome, source_index) =
        retry::run_with_sources(&config.retry, &sources, &session.cancel, |url| {
            let events = events.clone();
            let session = session.clone();
            let cancel = session.cancel.clone();
            let descriptor_total = descriptor.size_bytes;
            let model_id = descriptor.id.clone();
            let part = part.clone();
            async move {
                transfer::transfer(
                    &inner.client,
                    &url,
                    &part,
                    config,
                    &cancel,
                    move |progress| {
                        // Chunked responses have no authoritative total and the
                        // descriptor size is approximate; never report a total
                        // below what has already arrived.
                        let total = progress
                            .bytes_total
                            .unwrap_or(descriptor_total)
                            .max(progress.bytes_downloaded);
                        session
                            .bytes_downloaded
                            .store(progress.bytes_downloaded, Ordering::Relaxed);
                        session.bytes_total.store(total, Ordering::Relaxed);
                        let percent = if total > 0 {
                            ((progress.bytes_downloaded as f64 / total as f64) * 100.0)
                                .clamp(0.0, 100.0) as f32
                        } else {
                            0.0
                        };
                        let _ = events.send(DownloadEvent::Progress {
                            model_id: model_id.clone(),
                            percent,
                            bytes_downloaded: progress.bytes_downloaded,
                            bytes_total: total,
                            speed_bytes_per_sec: progress.rate_bytes_per_sec,
                        });
                    },
                )
                .await
            }
        })
        .await?;

    if session.cancel.is_cancelled() {
        return Err(DownloadError::Aborted);
    }

    // A short or overlong body never retries the same bytes: discard and
    // surface the mismatch.
    if let Some(total) = outcome.bytes_total {
        if outcome.bytes_written != total {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(DownloadError::SizeMismatch {
                expected: total,
                actual: outcome.bytes_written,
            });
        }
    } else if !cache::size_within_tolerance(
        outcome.bytes_written,
        descriptor.size_bytes,
        config.size_tolerance,
    ) {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(DownloadError::SizeMismatch {
            expected: descriptor.size_bytes,
            actual: outcome.bytes_written,
        });
    }

    // Verifying
    match &descriptor.checksum {
        Some(expected) => {
            tracing::info!("verifying checksum for {}", descriptor.id);
            if let Err(err) = verify::verify(&part, expected).await {
                if matches!(err, DownloadError::ChecksumMismatch { .. }) {
                    // never resume from corrupt bytes
                    let _ = tokio::fs::remove_file(&part).await;
                }
                return Err(err);
            }
        }
        None => {
            tracing::info!(
                "no checksum declared for {}, verification skipped",
                descriptor.id
            );
        }
    }

    // Finalizing
    tokio::fs::rename(&part, &dest).await?;
    tracing::info!("model {} installed at {}", descriptor.id, dest.display());

    let _ = events.send(DownloadEvent::Complete {
        model_id: descriptor.id.clone(),
        success: true,
        path: dest,
        size_bytes: outcome.bytes_written,
        cached: false,
        used_fallback: source_index > 0,
    });
    Ok(())
}

/// Check whether the partial file is already a complete, verified artifact.
/// Returns its size when it can be finalized directly. A full-size partial
/// that fails verification is discarded so the next transfer starts clean.
async fn finalizable_partial(
    descriptor: &ModelDescriptor,
    part: &Path,
    config: &DownloadConfig,
) -> Result<Option<u64>, DownloadError> {
    let size_bytes = match tokio::fs::metadata(part).await {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if !cache::size_within_tolerance(size_bytes, descriptor.size_bytes, config.size_tolerance) {
        return Ok(None);
    }
    match &descriptor.checksum {
        Some(expected) => match verify::verify(part, expected).await {
            Ok(()) => Ok(Some(size_bytes)),
            Err(DownloadError::ChecksumMismatch { .. }) => {
                tokio::fs::remove_file(part).await?;
                Ok(None)
            }
            Err(err) => Err(err),
        },
        None => Ok(Some(size_bytes)),
    }
}
