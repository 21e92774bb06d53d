use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::DownloadError;

/// Streaming SHA-256 of a file, lowercase hex. Reads in bounded chunks so
/// multi-gigabyte artifacts never sit in memory.
pub fn compute_sha256(path: &Path) -> Result<String, DownloadError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Digest on a blocking worker so hashing a large artifact does not stall
/// progress delivery or cancellation for other sessions.
pub async fn compute_sha256_async(path: &Path) -> Result<String, DownloadError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_sha256(&path))
        .await
        .map_err(|err| DownloadError::Filesystem(io::Error::new(io::ErrorKind::Other, err)))?
}

/// Compare a file's digest against an expected lowercase hex checksum.
pub async fn verify(path: &Path, expected: &str) -> Result<(), DownloadError> {
    let expected = expected.to_ascii_lowercase();
    let actual = compute_sha256_async(path).await?;
    if actual != expected {
        return Err(DownloadError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
