//! Archive download. Retries and backoff are left to whoever drives the
//! fetcher; a failed download fails construction.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::info;

use prefetch_core::{PrefetchError, PrefetchResult};

pub trait ArchiveFetcher {
    /// Guarantee `dest` exists afterwards. A no-op when it already does.
    fn fetch(&self, url: &str, dest: &Path, sha256: Option<&str>) -> PrefetchResult<()>;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path, sha256: Option<&str>) -> PrefetchResult<()> {
        if dest.exists() {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        info!("downloading {} ...", dest.display());
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| PrefetchError::Fetch(format!("GET {url}: {e}")))?;

        let part = part_path(dest);
        let result = stream_to(response.into_reader(), &part, sha256);
        match result {
            Ok(bytes) => {
                fs::rename(&part, dest)?;
                info!("downloaded {} ({bytes} bytes)", dest.display());
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&part);
                Err(e)
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Copy `reader` into `path`, hashing on the way when a digest is expected.
fn stream_to(mut reader: impl Read, path: &Path, sha256: Option<&str>) -> PrefetchResult<u64> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| PrefetchError::Fetch(format!("read failed after {total} bytes: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    out.flush()?;

    if let Some(expected) = sha256 {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(PrefetchError::Fetch(format!(
                "checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            )));
        }
        info!("checksum verified for {}", path.display());
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// OfflineFetcher
// ---------------------------------------------------------------------------

/// Never touches the network; only accepts archives already on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

impl ArchiveFetcher for OfflineFetcher {
    fn fetch(&self, url: &str, dest: &Path, _sha256: Option<&str>) -> PrefetchResult<()> {
        if dest.exists() {
            return Ok(());
        }
        Err(PrefetchError::Fetch(format!(
            "{} is not present and downloads are disabled (source: {url})",
            dest.display()
        )))
    }
}
