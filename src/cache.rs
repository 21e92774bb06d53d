use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::catalog::ModelDescriptor;
use crate::error::DownloadError;
use crate::verify;

/// Result of inspecting a previously downloaded artifact.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub exists: bool,
    pub valid: bool,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Decide whether a fresh download is needed. The size gate runs first so a
/// clearly wrong-sized file is never hashed; the digest only runs when the
/// size passes and the descriptor declares a checksum. Read-only.
pub fn check_existing(
    descriptor: &ModelDescriptor,
    path: &Path,
    size_tolerance: f64,
) -> Result<CacheStatus, DownloadError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(CacheStatus {
                exists: false,
                valid: false,
                path: path.to_path_buf(),
                size_bytes: 0,
            });
        }
        Err(err) => return Err(err.into()),
    };

    let size_bytes = metadata.len();
    if !size_within_tolerance(size_bytes, descriptor.size_bytes, size_tolerance) {
        return Ok(CacheStatus {
            exists: true,
            valid: false,
            path: path.to_path_buf(),
            size_bytes,
        });
    }

    let valid = match &descriptor.checksum {
        Some(expected) => {
            let actual = verify::compute_sha256(path)?;
            actual == expected.to_ascii_lowercase()
        }
        None => {
            tracing::debug!(
                "no checksum declared for {}; size check is the sole gate",
                descriptor.id
            );
            true
        }
    };

    Ok(CacheStatus {
        exists: true,
        valid,
        path: path.to_path_buf(),
        size_bytes,
    })
}

/// Whether `actual` is within `tolerance` (relative) of `expected`.
#[must_use]
pub fn size_within_tolerance(actual: u64, expected: u64, tolerance: f64) -> bool {
    if expected == 0 {
        return actual > 0;
    }
    let expected = expected as f64;
    (actual as f64 - expected).abs() <= expected * tolerance
}
