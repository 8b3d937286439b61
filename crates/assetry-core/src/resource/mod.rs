//! Resource descriptors: what can be served, where, and with which headers.
//!
//! A resource is either remote (downloaded once, verified against a declared SHA-256 and
//! frozen) or local (read from disk, optionally through a caller transform, every time
//! it is rendered). The serving path depends only on identity, so identical bytes always
//! land on the same URL and any change moves the URL.

pub mod constant;
pub mod content_type;
mod local;
mod remote;

use std::path::PathBuf;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};

use crate::error::{AssetError, Result};
use crate::integrity;

pub use local::{LocalResource, Transform};
pub use remote::RemoteResource;

/// Default `Cache-Control`: paths are content-addressed, so a week-long immutable cache is safe.
pub const DEFAULT_CACHE_CONTROL: &str = "max-age=604800, immutable";

#[derive(Clone, Debug)]
pub enum Resource {
    Remote(RemoteResource),
    Local(LocalResource),
}

/// A resource evaluated once: its serving path, final headers and body.
#[derive(Clone, Debug)]
pub struct Rendered {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Resource {
    /// Serving path under `prefix` (e.g. `/assets`).
    pub fn path(&self, prefix: &str) -> Result<String> {
        match self {
            Resource::Remote(r) => Ok(r.path(prefix)),
            Resource::Local(l) => l.path(prefix),
        }
    }

    /// Current body bytes.
    pub fn content(&self) -> Result<Bytes> {
        match self {
            Resource::Remote(r) => Ok(r.content().clone()),
            Resource::Local(l) => l.content().map(Bytes::from),
        }
    }

    /// Final response headers for the current body.
    pub fn headers(&self) -> Result<HeaderMap> {
        match self {
            Resource::Remote(r) => Ok(r.headers().clone()),
            Resource::Local(l) => Ok(l.headers_for(&l.content()?)),
        }
    }

    /// Path, headers and body from a single evaluation of the content.
    pub fn render(&self, prefix: &str) -> Result<Rendered> {
        match self {
            Resource::Remote(r) => Ok(Rendered {
                path: r.path(prefix),
                headers: r.headers().clone(),
                body: r.content().clone(),
            }),
            Resource::Local(l) => {
                let content = l.content()?;
                Ok(Rendered {
                    path: l.path_for(prefix, &content)?,
                    headers: l.headers_for(&content),
                    body: Bytes::from(content),
                })
            }
        }
    }

    /// SRI string (`sha256-...`) of the current body.
    pub fn integrity(&self) -> Result<String> {
        Ok(integrity::sri_sha256(&self.content()?))
    }

    /// Files whose modification should invalidate routes built from this resource.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        match self {
            Resource::Remote(_) => Vec::new(),
            Resource::Local(l) => vec![l.file_path()],
        }
    }
}

impl From<RemoteResource> for Resource {
    fn from(r: RemoteResource) -> Self {
        Resource::Remote(r)
    }
}

impl From<LocalResource> for Resource {
    fn from(l: LocalResource) -> Self {
        Resource::Local(l)
    }
}

/// Parse a caller-supplied header pair.
pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| AssetError::config("headers", format!("{:?}: {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| AssetError::config("headers", format!("{}: {}", name, e)))?;
    Ok((name, value))
}

/// Overrides plus defaults: Cache-Control, Content-Type, and a Content-Length that always
/// matches `content`.
pub(crate) fn build_headers(overrides: &HeaderMap, file_name: &str, content: &[u8]) -> HeaderMap {
    let mut headers = overrides.clone();
    if !headers.contains_key(CACHE_CONTROL) {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
    }
    let content_type = content_type::resolve(overrides, file_name, content);
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content.len()));
    headers
}
