//! Downloading remote asset bytes: one shared ureq Agent with timeout and retry.

use std::io::Read;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{AssetError, Result};

const REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_COUNT: usize = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Something that can turn a URL into bytes. The content store is generic over this
/// so callers can swap in mirrors, vendored copies or test doubles.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

fn retry_count_from_env() -> usize {
    std::env::var("ASSETRY_HTTP_RETRIES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_RETRY_COUNT)
}

fn retry_backoff_ms_from_env() -> u64 {
    std::env::var("ASSETRY_HTTP_RETRY_BACKOFF_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_BACKOFF_MS)
}

/// HTTP(S) fetcher. `file://` URLs are read from disk so vendored assets go through the
/// same verification path as CDN ones.
pub struct HttpFetcher {
    agent: ureq::Agent,
    retries: usize,
    backoff_ms: u64,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build();
        Self {
            agent,
            retries: retry_count_from_env(),
            backoff_ms: retry_backoff_ms_from_env(),
        }
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.send_with_retry(url)?;
        let hint = resp
            .header("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut buf = Vec::with_capacity(hint);
        resp.into_reader()
            .read_to_end(&mut buf)
            .map_err(|e| fetch_error(url, e))?;
        Ok(buf)
    }

    fn send_with_retry(&self, url: &str) -> Result<ureq::Response> {
        let mut attempt = 0usize;
        let mut backoff = self.backoff_ms;
        loop {
            attempt += 1;
            let retryable = match self.agent.get(url).call() {
                Ok(resp) if resp.status() == 200 => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if status >= 500 || status == 429 {
                        format!("HTTP {}", status)
                    } else {
                        return Err(fetch_error(url, format!("HTTP {}", status)));
                    }
                }
                Err(ureq::Error::Status(code, _)) => {
                    if code >= 500 || code == 429 {
                        format!("HTTP {}", code)
                    } else {
                        return Err(fetch_error(url, format!("HTTP {}", code)));
                    }
                }
                Err(e) => e.to_string(),
            };
            if attempt > self.retries {
                return Err(fetch_error(url, retryable));
            }
            tracing::debug!(url, attempt, reason = %retryable, "retrying download");
            std::thread::sleep(Duration::from_millis(backoff));
            backoff = backoff.saturating_mul(2).min(MAX_BACKOFF_MS);
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = file_url_path(url) {
            return std::fs::read(&path).map_err(|e| fetch_error(url, e));
        }
        self.get(url)
    }
}

fn fetch_error(url: &str, reason: impl std::fmt::Display) -> AssetError {
    AssetError::Fetch {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// `file:///abs/path` → `/abs/path`.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

static FETCHER: OnceLock<HttpFetcher> = OnceLock::new();

/// Process-wide fetcher, shared so every download reuses the agent's connections.
pub fn global_fetcher() -> &'static HttpFetcher {
    FETCHER.get_or_init(HttpFetcher::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_path() {
        assert_eq!(
            file_url_path("file:///tmp/vendor/a.js"),
            Some(PathBuf::from("/tmp/vendor/a.js"))
        );
        assert_eq!(file_url_path("https://cdn.example/a.js"), None);
    }

    #[test]
    fn test_fetch_file_url_reads_bytes() {
        let td = tempfile::tempdir().expect("tmp");
        let p = td.path().join("lib.js");
        std::fs::write(&p, b"export default 1;").expect("write");
        let url = format!("file://{}", p.display());
        let bytes = HttpFetcher::new().fetch(&url).expect("fetch");
        assert_eq!(bytes, b"export default 1;");
    }

    #[test]
    fn test_fetch_missing_file_url_is_fetch_error() {
        let err = HttpFetcher::new()
            .fetch("file:///definitely/not/here.js")
            .unwrap_err();
        assert!(matches!(err, AssetError::Fetch { .. }));
    }
}
