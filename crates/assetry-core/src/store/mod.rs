//! Content-addressed download cache.
//!
//! Flat directory of files named by the lowercase hex SHA-256 of their bytes. The file
//! existing is the only state; there is no index. A sibling `last_gc` file records the
//! last garbage-collection run (see [`gc`]).

pub mod gc;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::config::{self, GcPolicy};
use crate::error::{AssetError, Result};
use crate::http_client::{self, Fetcher};
use crate::integrity;

pub use gc::{GcOutcome, LAST_GC_FILE};

/// Handle to one cache directory plus the policy used to collect it.
#[derive(Clone)]
pub struct ContentStore {
    dir: PathBuf,
    policy: GcPolicy,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("dir", &self.dir)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// One cached blob, as listed by [`ContentStore::entries`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: String,
    pub size: u64,
}

impl ContentStore {
    /// Store at `dir` downloading through the shared HTTP fetcher.
    pub fn new(dir: impl Into<PathBuf>, policy: GcPolicy) -> Self {
        Self::with_fetcher(dir, policy, Arc::new(ProcessFetcher))
    }

    pub fn with_fetcher(dir: impl Into<PathBuf>, policy: GcPolicy, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            dir: dir.into(),
            policy,
            fetcher,
        }
    }

    /// Process-wide default store built from `.assetryrc`/env in the current directory.
    /// The first call collects garbage once, which is what "GC at process start" means
    /// for a library. Callers that need another directory build their own handle.
    pub fn global() -> Result<&'static ContentStore> {
        static GLOBAL: OnceLock<ContentStore> = OnceLock::new();
        if let Some(store) = GLOBAL.get() {
            return Ok(store);
        }
        let cwd = std::env::current_dir()?;
        let settings = config::load_config(&cwd)?.resolve()?;
        let store = ContentStore::new(settings.cache_dir, settings.gc);
        store.gc()?;
        Ok(GLOBAL.get_or_init(|| store))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> GcPolicy {
        self.policy
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    /// Whether a blob named `hash` is cached. Non-hex names are never cached.
    pub fn contains(&self, hash: &str) -> bool {
        integrity::is_sha256_hex(hash) && self.entry_path(hash).is_file()
    }

    /// Make sure the bytes behind `url` are cached and return their actual hash.
    ///
    /// Downloads only when nothing named `expected_hash` exists yet. The blob is written
    /// under the hash of what was actually received, so comparing against
    /// `expected_hash` is the caller's job.
    pub fn fetch_and_cache(&self, url: &str, expected_hash: &str) -> Result<String> {
        if self.contains(expected_hash) {
            tracing::debug!(url, hash = expected_hash, "cache hit");
            return Ok(expected_hash.to_string());
        }
        tracing::debug!(url, "cache miss, downloading");
        let bytes = self.fetcher.fetch(url)?;
        self.put(&bytes)
    }

    /// Write `content` under its own hash and return the hash.
    pub fn put(&self, content: &[u8]) -> Result<String> {
        let hash = integrity::sha256_hex(content);
        let dest = self.entry_path(&hash);
        if dest.is_file() {
            return Ok(hash);
        }
        fs::create_dir_all(&self.dir)?;

        // One temp file per write, renamed into place; same-hash writers race harmlessly.
        let mut temp = tempfile::Builder::new()
            .prefix(".put-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        temp.write_all(content)?;
        temp.as_file().sync_all()?;
        if let Err(e) = temp.persist(&dest) {
            // Another writer may have landed the same bytes first.
            if !dest.is_file() {
                return Err(e.error.into());
            }
        }
        tracing::debug!(hash = %hash, bytes = content.len(), "cached blob");
        Ok(hash)
    }

    /// Bytes of a cached blob.
    pub fn read_cached(&self, hash: &str) -> Result<Vec<u8>> {
        if !integrity::is_sha256_hex(hash) {
            return Err(AssetError::NotFound(format!("cache entry {}", hash)));
        }
        match fs::read(self.entry_path(hash)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AssetError::NotFound(format!("cache entry {}", hash)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cached blobs, sorted by hash. The GC marker and temp files are skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut out = Vec::new();
        let read = match fs::read_dir(&self.dir) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in read {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !integrity::is_sha256_hex(&name) {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                out.push(CacheEntry {
                    hash: name,
                    size: meta.len(),
                });
            }
        }
        out.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(out)
    }

    pub fn size_bytes(&self) -> Result<u64> {
        Ok(self.entries()?.iter().map(|e| e.size).sum())
    }

    /// Remove every cached blob (the marker stays). Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.entries()? {
            fs::remove_file(self.entry_path(&entry.hash))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Delegates to the process-wide HTTP fetcher so every store shares one agent.
struct ProcessFetcher;

impl Fetcher for ProcessFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        http_client::global_fetcher().fetch(url)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory fetcher that counts downloads.
    #[derive(Default)]
    pub struct CountingFetcher {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        pub fn serve(&self, url: &str, body: &[u8]) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_vec());
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| AssetError::Fetch {
                    url: url.to_string(),
                    reason: "HTTP 404".to_string(),
                })
        }
    }

    pub fn store_with(dir: &Path, fetcher: Arc<CountingFetcher>) -> ContentStore {
        ContentStore::with_fetcher(dir, GcPolicy::default(), fetcher)
    }
}
