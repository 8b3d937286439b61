use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::header::HeaderMap;

use super::{build_headers, parse_header};
use crate::error::{AssetError, Result};
use crate::integrity;

/// Produces the served bytes from `(root, relative path)`. Must tolerate being called
/// more than once with no side effect beyond caching.
pub type Transform = Arc<dyn Fn(&Path, &Path) -> Result<Vec<u8>> + Send + Sync>;

/// A file under a root directory, read (or transformed) each time it is rendered.
#[derive(Clone)]
pub struct LocalResource {
    root: PathBuf,
    path: String,
    transform: Option<Transform>,
    headers: HeaderMap,
}

impl fmt::Debug for LocalResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalResource")
            .field("root", &self.root)
            .field("path", &self.path)
            .field("custom_transform", &self.transform.is_some())
            .field("headers", &self.headers)
            .finish()
    }
}

pub struct LocalBuilder {
    root: PathBuf,
    path: PathBuf,
    transform: Option<Transform>,
    headers: HeaderMap,
    header_error: Option<AssetError>,
}

impl LocalResource {
    pub fn builder(root: impl Into<PathBuf>, path: impl AsRef<Path>) -> LocalBuilder {
        LocalBuilder {
            root: root.into(),
            path: path.as_ref().to_path_buf(),
            transform: None,
            headers: HeaderMap::new(),
            header_error: None,
        }
    }

    /// Raw file under `root`, default headers.
    pub fn new(root: impl Into<PathBuf>, path: impl AsRef<Path>) -> Result<Self> {
        Self::builder(root, path).build()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalized relative path (`/`-separated).
    pub fn rel_path(&self) -> &str {
        &self.path
    }

    /// Backing file on disk.
    pub fn file_path(&self) -> PathBuf {
        self.root.join(&self.path)
    }

    fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Current bytes: the transform's output, or the raw file.
    pub fn content(&self) -> Result<Vec<u8>> {
        let rel = Path::new(&self.path);
        match &self.transform {
            Some(transform) => transform(&self.root, rel),
            None => read_raw(&self.root, rel),
        }
    }

    /// `prefix/<path>?v=<token of current content>`
    pub fn path(&self, prefix: &str) -> Result<String> {
        self.path_for(prefix, &self.content()?)
    }

    pub(crate) fn path_for(&self, prefix: &str, content: &[u8]) -> Result<String> {
        Ok(format!(
            "{}/{}?v={}",
            prefix.trim_end_matches('/'),
            self.path,
            integrity::content_token(content)
        ))
    }

    pub(crate) fn headers_for(&self, content: &[u8]) -> HeaderMap {
        build_headers(&self.headers, self.file_name(), content)
    }
}

impl LocalBuilder {
    /// Replace the raw-file reader. The file need not exist when a transform is set.
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, &Path) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }

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

    pub fn build(self) -> Result<LocalResource> {
        if let Some(e) = self.header_error {
            return Err(e);
        }
        if !self.root.is_dir() {
            return Err(AssetError::NotADirectory(self.root));
        }
        let path = normalize(&self.path)?;
        if self.transform.is_none() && !self.root.join(&path).is_file() {
            return Err(AssetError::not_found_path(&self.root.join(&path)));
        }
        let resource = LocalResource {
            root: self.root,
            path,
            transform: self.transform,
            headers: self.headers,
        };
        // Evaluate once so a broken transform fails here rather than on first request.
        resource.content()?;
        Ok(resource)
    }
}

fn read_raw(root: &Path, rel: &Path) -> Result<Vec<u8>> {
    let full = root.join(rel);
    std::fs::read(&full).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AssetError::not_found_path(&full)
        } else {
            e.into()
        }
    })
}

/// `./js//app.js` → `js/app.js`. Parent components are rejected.
pub(crate) fn normalize(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_str().ok_or_else(|| {
                AssetError::InvalidPath(format!("{} is not valid UTF-8", path.display()))
            })?),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(AssetError::InvalidPath(format!(
                    "{} escapes its root",
                    path.display()
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(AssetError::InvalidPath(format!(
            "{:?} names no file",
            path.display().to_string()
        )));
    }
    Ok(parts.join("/"))
}
