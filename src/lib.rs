//! Speech model acquisition pipeline for the push-to-talk dictation app.
//!
//! Models are multi-gigabyte whisper.cpp GGML artifacts fetched over HTTP
//! from an ordered list of mirrors. Downloads stream to a `.part` temp file,
//! resume via byte ranges after interruption, retry with exponential backoff,
//! verify a SHA-256 digest when one is declared, and finalize with an atomic
//! rename into the model directory. Each session publishes progress and a
//! single terminal event on its own channel; at most one session runs per
//! model id at a time.
//!
//! ```no_run
//! use dictation_models::{DownloadConfig, DownloadOrchestrator};
//!
//! # async fn demo() -> Result<(), dictation_models::DownloadError> {
//! let orchestrator = DownloadOrchestrator::new(DownloadConfig::with_default_dir()?)?;
//! let mut handle = orchestrator.start("base")?;
//! while let Some(event) = handle.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod retry;
mod transfer;
pub mod verify;

pub use cache::{check_existing, size_within_tolerance, CacheStatus};
pub use catalog::{recommend, recommend_for_ram_gb, Catalog, ModelDescriptor};
pub use config::DownloadConfig;
pub use error::DownloadError;
pub use events::{DownloadEvent, DownloadHandle};
pub use orchestrator::{DownloadOrchestrator, ModelStatus, StartOptions, PARTIAL_SUFFIX};
pub use retry::RetryPolicy;
