//! Artifact download.
//!
//! [`Fetch`] is the seam between provisioning and the network: the
//! provisioner only asks for "this URL into that file" and never sees HTTP.
//! Tests substitute a fetcher that serves local files and counts calls.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("freeroot/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 30;
const CHUNK_SIZE: usize = 64 * 1024;

/// Downloads a URL into a local file.
pub trait Fetch: Send + Sync {
    /// Write the body of `url` into `dest`, truncating it. Returns the byte
    /// count. An empty body is a failure.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Blocking HTTP(S) fetcher. `file://` URLs are copied from disk so a local
/// mirror works without a server.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            // Archives are tens of megabytes; no overall deadline.
            .timeout(None)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn fetch_http(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::download(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::download(url, format!("HTTP {status}")));
        }

        let expected = response.content_length();
        let written = copy_to_file(&mut response, dest, url)?;

        if let Some(expected) = expected {
            if expected != written {
                return Err(Error::download(
                    url,
                    format!("truncated body: expected {expected} bytes, got {written}"),
                ));
            }
        }
        Ok(written)
    }

    fn fetch_file(&self, url: &str, source: &str, dest: &Path) -> Result<u64> {
        let mut reader = File::open(source).map_err(|e| Error::download(url, e))?;
        copy_to_file(&mut reader, dest, url)
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        tracing::info!(url, dest = %dest.display(), "downloading");
        let start = Instant::now();

        let written = match url.strip_prefix("file://") {
            Some(source) => self.fetch_file(url, source, dest)?,
            None => self.fetch_http(url, dest)?,
        };

        if written == 0 {
            return Err(Error::download(url, "empty body"));
        }

        tracing::debug!(
            url,
            bytes = written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "download complete"
        );
        Ok(written)
    }
}

/// Stream `reader` into `dest`. Read failures are download failures, write
/// failures go through the disk-space classification.
fn copy_to_file(reader: &mut impl Read, dest: &Path, url: &str) -> Result<u64> {
    let file = File::create(dest).map_err(|e| Error::from_write(e, dest.display()))?;
    let mut writer = BufWriter::new(file);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::download(url, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::from_write(e, dest.display()))?;
        total += n as u64;
    }

    let file = writer
        .into_inner()
        .map_err(|e| Error::from_write(e.into_error(), dest.display()))?;
    file.sync_all()
        .map_err(|e| Error::from_write(e, dest.display()))?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_url_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        std::fs::write(&src, b"payload").unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let n = fetcher
            .fetch(&format!("file://{}", src.display()), &dest)
            .unwrap();

        assert_eq!(n, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn empty_body_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty");
        std::fs::write(&src, b"").unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .fetch(&format!("file://{}", src.display()), &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailed { .. }));
    }

    #[test]
    fn missing_source_is_download_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new().unwrap();
        let url = "file:///nonexistent/freeroot/archive.tar.gz";
        match fetcher.fetch(url, &dir.path().join("out")) {
            Err(Error::DownloadFailed { url: failed, .. }) => assert_eq!(failed, url),
            other => panic!("expected DownloadFailed, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_host_is_download_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new().unwrap();
        // Port 9 on loopback: nothing listens there.
        let err = fetcher
            .fetch("http://127.0.0.1:9/archive.tar.gz", &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailed { .. }));
    }
}
