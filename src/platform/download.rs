// src/platform/download.rs

//! HTTP artifact download with mirror fallback and SHA-256 verification

use super::{DownloadOutcome, Downloader};
use crate::component::DownloadSpec;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Attempts per URL before moving to the next mirror
const MAX_RETRIES: u32 = 3;

const RETRY_DELAY_MS: u64 = 500;

pub struct HttpDownloader {
    client: Client,
    max_retries: u32,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", url, dest_path.display());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_download(url, dest_path) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_retries => {
                    return Err(Error::DownloadError(format!(
                        "Failed to download {url} after {attempt} attempts: {e}"
                    )));
                }
                Err(e) => {
                    warn!("Download attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    fn try_download(&self, url: &str, dest_path: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("network error fetching {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        // Write to a temp name so a partial file never looks complete
        let partial = dest_path.with_extension("part");
        let mut file = File::create(&partial)?;
        io::copy(&mut response, &mut file)
            .map_err(|e| Error::DownloadError(format!("network error reading {url}: {e}")))?;
        file.sync_all()?;
        fs::rename(&partial, dest_path)?;
        Ok(())
    }
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file against an expected SHA-256, ignoring case
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for {}", path.display());
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(Error::DownloadError(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )));
    }
    Ok(())
}

impl Downloader for HttpDownloader {
    fn fetch(&self, spec: &DownloadSpec, dest_dir: &Path) -> DownloadOutcome {
        if let Err(e) = fs::create_dir_all(dest_dir) {
            return DownloadOutcome::failed(format!(
                "Failed to create directory {}: {}",
                dest_dir.display(),
                e
            ));
        }
        let dest_path: PathBuf = dest_dir.join(spec.file_name());

        let mut errors = Vec::new();
        for url in spec.urls() {
            let result = self.download_file(url, &dest_path).and_then(|()| {
                match spec.sha256 {
                    Some(ref expected) => verify_checksum(&dest_path, expected),
                    None => Ok(()),
                }
            });

            match result {
                Ok(()) => return DownloadOutcome::ok(dest_path),
                Err(e) => {
                    warn!("Download from {} failed: {}", url, e);
                    let _ = fs::remove_file(&dest_path);
                    errors.push(e.to_string());
                }
            }
        }

        DownloadOutcome::failed(errors.join("; "))
    }
}
