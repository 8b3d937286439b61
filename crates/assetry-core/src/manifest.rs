//! JSON asset manifest: a file listing the remote and local resources to serve.
//!
//! ```json
//! {
//!   "prefix": "/assets",
//!   "remote": [{ "url": "https://cdn.example/htmx.min.js", "sha256": "<hex>" }],
//!   "local":  [{ "root": "dist", "path": "app.js" }]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::normalize_prefix;
use crate::error::{AssetError, Result};
use crate::resource::{LocalResource, RemoteResource, Resource};
use crate::router::ResourceSource;
use crate::store::ContentStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub prefix: Option<String>,
    #[serde(default)]
    pub remote: Vec<RemoteEntry>,
    #[serde(default)]
    pub local: Vec<LocalEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub url: String,
    pub sha256: String,
    pub name: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEntry {
    pub root: PathBuf,
    pub path: String,
    pub content_type: Option<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AssetError::not_found_path(path)
            } else {
                e.into()
            }
        })?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// The manifest's prefix, normalized, or `default` when it has none.
    pub fn prefix_or(&self, default: &str) -> String {
        normalize_prefix(self.prefix.as_deref().unwrap_or(default))
    }

    /// Construct every resource. Remote entries download through `store` (once per
    /// hash); relative local roots are taken relative to `base_dir`.
    pub fn resources(&self, store: &ContentStore, base_dir: &Path) -> Result<Vec<Resource>> {
        let mut out = Vec::with_capacity(self.remote.len() + self.local.len());
        for entry in &self.remote {
            let mut builder = RemoteResource::builder(store, entry.url.as_str(), entry.sha256.as_str());
            if let Some(name) = &entry.name {
                builder = builder.name(name.as_str());
            }
            if let Some(ct) = &entry.content_type {
                builder = builder.header("Content-Type", ct);
            }
            out.push(builder.build()?.into());
        }
        for entry in &self.local {
            let root = if entry.root.is_absolute() {
                entry.root.clone()
            } else {
                base_dir.join(&entry.root)
            };
            let mut builder = LocalResource::builder(root, &entry.path);
            if let Some(ct) = &entry.content_type {
                builder = builder.header("Content-Type", ct);
            }
            out.push(builder.build()?.into());
        }
        Ok(out)
    }
}

/// A manifest on disk as a live-router source. Re-reads the file on every reload and
/// watches it alongside the resources it lists.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    path: PathBuf,
    store: ContentStore,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>, store: ContentStore) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl ResourceSource for ManifestSource {
    fn resources(&self) -> Result<Vec<Resource>> {
        Manifest::load(&self.path)?.resources(&self.store, self.base_dir())
    }

    fn definition_files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Method;

    use super::*;
    use crate::integrity;
    use crate::router::ResourceRouter;
    use crate::store::testing::{store_with, CountingFetcher};

    const LIB_URL: &str = "https://cdn.example/lib/htmx.min.js";

    fn project() -> (tempfile::TempDir, ContentStore) {
        let td = tempfile::tempdir().expect("tmp");
        std::fs::create_dir_all(td.path().join("dist")).unwrap();
        std::fs::write(td.path().join("dist/app.js"), "app()").unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        fetcher.serve(LIB_URL, b"htmx()");
        let store = store_with(&td.path().join("cache"), fetcher);
        (td, store)
    }

    fn manifest_json(local_path: &str) -> String {
        format!(
            r#"{{
                "prefix": "static",
                "remote": [{{ "url": "{}", "sha256": "{}", "name": "htmx.js" }}],
                "local": [{{ "root": "dist", "path": "{}", "contentType": "text/javascript" }}]
            }}"#,
            LIB_URL,
            integrity::sha256_hex(b"htmx()"),
            local_path
        )
    }

    #[test]
    fn test_parse_defaults_and_prefix() {
        let m = Manifest::parse("{}").unwrap();
        assert!(m.remote.is_empty() && m.local.is_empty());
        assert_eq!(m.prefix_or("/assets"), "/assets");
        let m = Manifest::parse(r#"{"prefix": "static/"}"#).unwrap();
        assert_eq!(m.prefix_or("/assets"), "/static");
        assert!(matches!(Manifest::parse("{"), Err(AssetError::Json(_))));
    }

    #[test]
    fn test_resources_resolve_relative_roots() {
        let (td, store) = project();
        let m = Manifest::parse(&manifest_json("app.js")).unwrap();
        let resources = m.resources(&store, td.path()).unwrap();
        assert_eq!(resources.len(), 2);
        let remote_path = resources[0].path("/static").unwrap();
        assert!(remote_path.ends_with("/htmx.js"));
        let local_headers = resources[1].headers().unwrap();
        assert_eq!(local_headers["content-type"], "text/javascript");
    }

    #[test]
    fn test_missing_manifest_is_not_found() {
        let td = tempfile::tempdir().expect("tmp");
        assert!(matches!(
            Manifest::load(&td.path().join("assets.json")),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn test_editing_manifest_reloads_live_router() {
        let (td, store) = project();
        std::fs::write(td.path().join("dist/other.js"), "other()").unwrap();
        let manifest = td.path().join("assets.json");
        std::fs::write(&manifest, manifest_json("app.js")).unwrap();

        let source = ManifestSource::new(&manifest, store);
        assert_eq!(source.definition_files(), vec![manifest.clone()]);
        let router = ResourceRouter::live("/static", source).unwrap();
        assert!(router.map().paths().iter().any(|p| p.starts_with("/static/app.js?v=")));

        std::fs::write(&manifest, manifest_json("other.js")).unwrap();
        crate::change::bump_mtime(&manifest, 5);
        router.refresh();

        let paths: Vec<String> = router.map().paths().iter().map(|p| p.to_string()).collect();
        let other = paths
            .iter()
            .find(|p| p.starts_with("/static/other.js?v="))
            .expect("other.js routed");
        assert_eq!(router.handle(&Method::GET, other).body().as_ref(), b"other()");
        assert!(!paths.iter().any(|p| p.starts_with("/static/app.js")));
    }
}
