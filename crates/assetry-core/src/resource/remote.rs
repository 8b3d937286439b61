use bytes::Bytes;
use http::header::HeaderMap;

use super::{build_headers, parse_header};
use crate::error::{AssetError, Result};
use crate::integrity;
use crate::store::ContentStore;

/// A downloaded, integrity-verified asset. Immutable once built: a value of this type
/// always holds bytes whose SHA-256 equals `hash`.
#[derive(Clone, Debug)]
pub struct RemoteResource {
    name: String,
    url: String,
    content: Bytes,
    hash: String,
    headers: HeaderMap,
}

/// Builder for [`RemoteResource`]; nothing is downloaded until [`RemoteBuilder::build`].
#[derive(Debug)]
pub struct RemoteBuilder<'a> {
    store: &'a ContentStore,
    url: String,
    expected_hash: String,
    name: Option<String>,
    headers: HeaderMap,
    header_error: Option<AssetError>,
}

impl RemoteResource {
    /// Start describing the asset at `url` whose bytes must hash to `expected_sha256` (hex).
    pub fn builder<'a>(
        store: &'a ContentStore,
        url: impl Into<String>,
        expected_sha256: impl Into<String>,
    ) -> RemoteBuilder<'a> {
        RemoteBuilder {
            store,
            url: url.into(),
            expected_hash: expected_sha256.into().trim().to_ascii_lowercase(),
            name: None,
            headers: HeaderMap::new(),
            header_error: None,
        }
    }

    /// Shorthand for `builder(..).build()` with the default name and headers.
    pub fn new(store: &ContentStore, url: &str, expected_sha256: &str) -> Result<Self> {
        Self::builder(store, url, expected_sha256).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `prefix/<token of hash>/<name>`
    pub fn path(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}",
            prefix.trim_end_matches('/'),
            integrity::encode_hash(&self.hash),
            self.name
        )
    }
}

impl<'a> RemoteBuilder<'a> {
    /// File name in the serving path. Defaults to the last segment of the URL path.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Extra response header; an explicit `Content-Type` here beats inference.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok((k, v)) => {
                self.headers.insert(k, v);
            }
            Err(e) => {
                self.header_error.get_or_insert(e);
            }
        }
        self
    }

    /// Download (or reuse the cached copy), verify, and freeze.
    pub fn build(self) -> Result<RemoteResource> {
        if let Some(e) = self.header_error {
            return Err(e);
        }
        let name = match self.name {
            Some(n) => validate_name(&n)?,
            None => name_from_url(&self.url)?,
        };

        let actual = self.store.fetch_and_cache(&self.url, &self.expected_hash)?;
        if actual != self.expected_hash {
            return Err(AssetError::Integrity {
                url: self.url,
                expected: self.expected_hash,
                actual,
            });
        }
        let content = Bytes::from(self.store.read_cached(&actual)?);
        // A cache hit is trusted by name only; re-check the bytes actually read.
        let on_disk = integrity::sha256_hex(&content);
        if on_disk != self.expected_hash {
            return Err(AssetError::Integrity {
                url: self.url,
                expected: self.expected_hash,
                actual: on_disk,
            });
        }
        let headers = build_headers(&self.headers, &name, &content);

        Ok(RemoteResource {
            name,
            url: self.url,
            content,
            hash: actual,
            headers,
        })
    }
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed == "." || trimmed == ".." {
        return Err(AssetError::InvalidPath(format!(
            "resource name {:?} must be a single path segment",
            name
        )));
    }
    Ok(trimmed.to_string())
}

/// `https://cdn.example/lib/htmx.min.js?v=2#x` → `htmx.min.js`
pub(crate) fn name_from_url(url: &str) -> Result<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    // Drop the authority so `https://host` doesn't yield `host` as a file name.
    let path = after_scheme.split_once('/').map(|(_, p)| p).unwrap_or("");
    let last = path.rsplit('/').next().unwrap_or("");
    validate_name(last).map_err(|_| {
        AssetError::InvalidPath(format!("cannot derive a file name from {}", url))
    })
}
