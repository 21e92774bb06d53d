use std::path::Path;
use std::time::Instant;

use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::DownloadError;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferProgress {
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub rate_bytes_per_sec: u64,
}

#[derive(Debug)]
pub(crate) struct TransferOutcome {
    pub bytes_written: u64,
    /// Total reported by the server (resume offset included), when known.
    pub bytes_total: Option<u64>,
}

/// Stream one URL into `part_path`.
///
/// Existing partial bytes turn the request into a ranged one and the file
/// is appended to; a server that answers a ranged request with a plain 200
/// or a 416 gets the partial discarded and the transfer restarted from
/// zero.
/// Cancellation is observed at chunk boundaries and leaves partial bytes in
/// place for a later resume.
pub(crate) async fn transfer<F>(
    client: &Client,
    url: &str,
    part_path: &Path,
    config: &DownloadConfig,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<TransferOutcome, DownloadError>
where
    F: FnMut(TransferProgress),
{
    let mut resume_from = match fs::metadata(part_path).await {
        Ok(metadata) => metadata.len(),
        Err(_) => 0,
    };

    let mut request = client.get(url);
    if resume_from > 0 {
        request = request.header(header::RANGE, format!("bytes={resume_from}-"));
        tracing::info!("resuming {url} from byte {resume_from}");
    }

    let mut response = request.send().await.map_err(DownloadError::from_reqwest)?;

    // A 200 to a ranged request means the server ignored the range header,
    // and a 416 means the partial is already past the artifact's end (an
    // oversized leftover). Neither can be appended to safely.
    if resume_from > 0
        && matches!(
            response.status(),
            StatusCode::OK | StatusCode::RANGE_NOT_SATISFIABLE
        )
    {
        tracing::warn!(
            "cannot resume {url} from byte {resume_from} (status {}), restarting from zero",
            response.status()
        );
        drop(response);
        fs::remove_file(part_path).await?;
        resume_from = 0;
        response = client
            .get(url)
            .send()
            .await
            .map_err(DownloadError::from_reqwest)?;
    }

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            status: status.as_u16(),
        });
    }

    let bytes_total = response.content_length().map(|remaining| {
        if status == StatusCode::PARTIAL_CONTENT {
            resume_from + remaining
        } else {
            remaining
        }
    });

    let mut file = if resume_from > 0 && status == StatusCode::PARTIAL_CONTENT {
        OpenOptions::new().append(true).open(part_path).await?
    } else {
        File::create(part_path).await?
    };

    let mut stream = response.bytes_stream();
    let mut downloaded = resume_from;
    let mut last_emit: Option<Instant> = None;
    let mut window_start = Instant::now();
    let mut window_bytes = 0u64;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                file.flush().await?;
                return Err(DownloadError::Aborted);
            }
            next = tokio::time::timeout(config.read_timeout, stream.next()) => match next {
                Err(_) => return Err(DownloadError::Timeout),
                Ok(None) => break,
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(err))) => return Err(DownloadError::from_reqwest(err)),
            },
        };

        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        window_bytes += chunk.len() as u64;

        let now = Instant::now();
        let due = last_emit.map_or(true, |at| now.duration_since(at) >= config.progress_interval);
        if due {
            let elapsed = now.duration_since(window_start).as_secs_f64();
            let rate = if elapsed > 0.0 {
                (window_bytes as f64 / elapsed) as u64
            } else {
                0
            };
            on_progress(TransferProgress {
                bytes_downloaded: downloaded,
                bytes_total,
                rate_bytes_per_sec: rate,
            });
            last_emit = Some(now);
            window_start = now;
            window_bytes = 0;
        }
    }

    file.flush().await?;
    file.sync_all().await?;

    on_progress(TransferProgress {
        bytes_downloaded: downloaded,
        bytes_total,
        rate_bytes_per_sec: 0,
    });

    Ok(TransferOutcome {
        bytes_written: downloaded,
        bytes_total,
    })
}
