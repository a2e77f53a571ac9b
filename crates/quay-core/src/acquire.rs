//! Artifact file acquisition with streaming verification.
//!
//! Installer locations are tried in order; `https` locations are streamed
//! into the cache with the digest computed on the fly, local paths (with or
//! without a `file://` prefix) are copied. A cached file that still matches
//! its declared digest is reused without re-downloading.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::reporter::Reporter;

/// Digest algorithm declared by an installer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

/// A declared digest to verify an acquired file against.
#[derive(Debug, Clone)]
pub struct Verification {
    /// Which algorithm produced the digest.
    pub algorithm: ChecksumAlgorithm,
    /// Expected digest in hex.
    pub value: String,
}

impl Verification {
    /// Pick the declared digest of an installer entry; sha256 wins when both
    /// are declared.
    pub fn from_declared(sha256: Option<&str>, sha512: Option<&str>) -> Option<Self> {
        if let Some(value) = sha256 {
            return Some(Self {
                algorithm: ChecksumAlgorithm::Sha256,
                value: value.to_string(),
            });
        }
        sha512.map(|value| Self {
            algorithm: ChecksumAlgorithm::Sha512,
            value: value.to_string(),
        })
    }
}

enum Hasher {
    Sha256(Box<Sha256>),
    Sha512(Box<Sha512>),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Self::Sha256(Box::default()),
            ChecksumAlgorithm::Sha512 => Self::Sha512(Box::default()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Verify a file on disk against a declared digest.
///
/// # Errors
///
/// Returns [`Error::ChecksumMismatch`] when the digests differ, or an I/O
/// error when the file cannot be read.
pub async fn verify_file(path: &Path, verification: &Verification) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::new(verification.algorithm);
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = hasher.finalize_hex();
    if actual.eq_ignore_ascii_case(&verification.value) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: verification.value.clone(),
            actual,
        })
    }
}

async fn download(url: &str, dest: &Path, verification: Option<&Verification>, reporter: &dyn Reporter) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?
        .error_for_status()?;
    let total = response.content_length();
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = verification.map(|v| Hasher::new(v.algorithm));
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&chunk);
        }
        downloaded += chunk.len() as u64;
        reporter.downloading(url, downloaded, total);
    }
    file.flush().await?;

    if let (Some(hasher), Some(verification)) = (hasher, verification) {
        let actual = hasher.finalize_hex();
        if !actual.eq_ignore_ascii_case(&verification.value) {
            tokio::fs::remove_file(dest).await.ok();
            return Err(Error::ChecksumMismatch {
                expected: verification.value.clone(),
                actual,
            });
        }
    }
    Ok(())
}

async fn acquire_one(location: &str, dest: &Path, verification: Option<&Verification>, reporter: &dyn Reporter) -> Result<()> {
    if location.starts_with("https://") || location.starts_with("http://") {
        return download(location, dest, verification, reporter).await;
    }
    let source = location.strip_prefix("file://").unwrap_or(location);
    tokio::fs::copy(source, dest).await?;
    if let Some(verification) = verification {
        if let Err(err) = verify_file(dest, verification).await {
            tokio::fs::remove_file(dest).await.ok();
            return Err(err);
        }
    }
    Ok(())
}

/// Acquire an artifact file into the cache, trying `locations` in order.
///
/// # Errors
///
/// Returns the last location's failure when every location fails, or
/// [`Error::AcquireFailed`] when none was declared.
pub async fn acquire_artifact_file(
    cache_dir: &Path,
    locations: &[String],
    filename: &str,
    verification: Option<&Verification>,
    reporter: &dyn Reporter,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(cache_dir).await?;
    let dest = cache_dir.join(filename);

    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        match verification {
            Some(verification) => {
                if verify_file(&dest, verification).await.is_ok() {
                    debug!("cache hit for {filename}");
                    return Ok(dest);
                }
                warn!("cached {filename} failed verification, re-acquiring");
                tokio::fs::remove_file(&dest).await.ok();
            }
            None => return Ok(dest),
        }
    }

    let mut last_error = None;
    for location in locations {
        debug!("acquiring {filename} from {location}");
        match acquire_one(location, &dest, verification, reporter).await {
            Ok(()) => return Ok(dest),
            Err(err) => {
                debug!("location {location} failed: {err}");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::AcquireFailed(filename.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    fn sha256_of(bytes: &[u8]) -> String {
        let mut h = Sha256::new();
        h.update(bytes);
        hex::encode(h.finalize())
    }

    #[tokio::test]
    async fn acquires_local_files_with_verification() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tool.zip");
        tokio::fs::write(&source, b"payload").await.unwrap();
        let cache = dir.path().join("cache");

        let verification = Verification {
            algorithm: ChecksumAlgorithm::Sha256,
            value: sha256_of(b"payload"),
        };
        let got = acquire_artifact_file(
            &cache,
            &[source.display().to_string()],
            "tool.zip",
            Some(&verification),
            &NullReporter,
        )
        .await
        .unwrap();
        assert_eq!(tokio::fs::read(&got).await.unwrap(), b"payload");

        // cache hit: source can disappear, file is reused
        tokio::fs::remove_file(&source).await.unwrap();
        acquire_artifact_file(
            &cache,
            &[source.display().to_string()],
            "tool.zip",
            Some(&verification),
            &NullReporter,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tool.zip");
        tokio::fs::write(&source, b"payload").await.unwrap();
        let cache = dir.path().join("cache");

        let verification = Verification {
            algorithm: ChecksumAlgorithm::Sha256,
            value: "00".repeat(32),
        };
        let err = acquire_artifact_file(
            &cache,
            &[source.display().to_string()],
            "tool.zip",
            Some(&verification),
            &NullReporter,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!cache.join("tool.zip").exists());
    }

    #[tokio::test]
    async fn downloads_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tool.zip")
            .with_body("remote-bytes")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let verification = Verification {
            algorithm: ChecksumAlgorithm::Sha256,
            value: sha256_of(b"remote-bytes"),
        };
        let got = acquire_artifact_file(
            &cache,
            &[format!("{}/tool.zip", server.url())],
            "tool.zip",
            Some(&verification),
            &NullReporter,
        )
        .await
        .unwrap();
        assert_eq!(tokio::fs::read(&got).await.unwrap(), b"remote-bytes");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn exhausting_locations_reports_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let err = acquire_artifact_file(
            &cache,
            &["/definitely/not/here".to_string()],
            "missing.zip",
            None,
            &NullReporter,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
