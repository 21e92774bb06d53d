use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;

/// Events published on a session's channel.
///
/// Byte counts in `Progress` are non-decreasing within a session, except
/// when the transfer legitimately restarts from zero (verification failure
/// or a source that ignores range requests). The last event on a channel is
/// always `Complete`, `Error`, or `Cancelled`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DownloadEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        model_id: String,
        percent: f32,
        bytes_downloaded: u64,
        bytes_total: u64,
        speed_bytes_per_sec: u64,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        model_id: String,
        success: bool,
        path: PathBuf,
        size_bytes: u64,
        /// True when a valid cached artifact satisfied the request with no
        /// network access.
        cached: bool,
        used_fallback: bool,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        model_id: String,
        success: bool,
        error_kind: String,
        message: String,
        /// Ordered source URLs tried, for the manual-download fallback UI.
        sources_attempted: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Cancelled { model_id: String },
}

impl DownloadEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress { .. })
    }
}

/// Subscription to one download session.
#[derive(Debug)]
pub struct DownloadHandle {
    model_id: String,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
}

impl DownloadHandle {
    pub(crate) fn new(model_id: String, events: mpsc::UnboundedReceiver<DownloadEvent>) -> Self {
        Self { model_id, events }
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Next event, or `None` once the session is over and the channel
    /// drained.
    pub async fn recv(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }

    /// Drain events until the session ends, returning its terminal event.
    pub async fn wait(mut self) -> Option<DownloadEvent> {
        let mut terminal = None;
        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                terminal = Some(event);
            }
        }
        terminal
    }
}
