//! Route map construction: resources → `path → (headers, body)`.

use std::borrow::Borrow;
use std::collections::HashMap;

use bytes::Bytes;
use http::header::HeaderMap;

use crate::error::Result;
use crate::resource::Resource;

/// Stored response for one path.
#[derive(Clone, Debug)]
pub struct RouteEntry {
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Path → response. Always rebuilt as a whole, never patched in place.
///
/// Local resources are keyed by `path?v=<token>`, but the token only busts caches: a
/// request for the same path with any other (or no) query still finds the entry, so a
/// URL handed out before a rebuild keeps resolving to the current content.
#[derive(Clone, Debug, Default)]
pub struct RouteMap {
    routes: HashMap<String, RouteEntry>,
    /// Query-stripped path → full key.
    versioned: HashMap<String, String>,
}

impl RouteMap {
    /// Exact match first, then the versioned entry for the query-stripped path.
    pub fn get(&self, path: &str) -> Option<&RouteEntry> {
        if let Some(entry) = self.routes.get(path) {
            return Some(entry);
        }
        let base = strip_query(path);
        self.versioned
            .get(base)
            .and_then(|key| self.routes.get(key))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Paths in sorted order.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RouteEntry)> {
        self.routes.iter()
    }
}

/// Render every resource under `prefix`. Two resources on the same path: the later one
/// wins and a warning is logged.
pub fn build_map<I>(prefix: &str, resources: I) -> Result<RouteMap>
where
    I: IntoIterator,
    I::Item: Borrow<Resource>,
{
    let mut routes = HashMap::new();
    let mut versioned = HashMap::new();
    for resource in resources {
        let rendered = resource.borrow().render(prefix)?;
        let entry = RouteEntry {
            headers: rendered.headers,
            body: rendered.body,
        };
        let base = strip_query(&rendered.path);
        if base.len() != rendered.path.len() {
            if let Some(previous) = versioned.insert(base.to_string(), rendered.path.clone()) {
                if previous != rendered.path {
                    routes.remove(&previous);
                    tracing::warn!(path = base, "duplicate resource path; last definition wins");
                }
            }
        }
        if routes.insert(rendered.path.clone(), entry).is_some() {
            tracing::warn!(path = %rendered.path, "duplicate resource path; last definition wins");
        }
    }
    tracing::debug!(routes = routes.len(), prefix, "built route map");
    Ok(RouteMap { routes, versioned })
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map(|(base, _)| base).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::integrity;
    use crate::resource::{LocalResource, RemoteResource};
    use crate::store::testing::{store_with, CountingFetcher};

    #[test]
    fn test_map_contains_rendered_resources() {
        let td = tempfile::tempdir().expect("tmp");
        let cache = td.path().join("cache");
        let site = td.path().join("site");
        std::fs::create_dir_all(&site).unwrap();
        std::fs::write(site.join("app.js"), "main()").unwrap();

        let fetcher = Arc::new(CountingFetcher::default());
        fetcher.serve("https://cdn.example/lib.js", b"lib()");
        let store = store_with(&cache, fetcher);
        let remote = RemoteResource::new(
            &store,
            "https://cdn.example/lib.js",
            &integrity::sha256_hex(b"lib()"),
        )
        .unwrap();
        let local = LocalResource::new(&site, "app.js").unwrap();
        let resources: Vec<Resource> = vec![remote.clone().into(), local.clone().into()];

        let map = build_map("/assets", &resources).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&remote.path("/assets")).unwrap().body.as_ref(), b"lib()");
        assert_eq!(
            map.get(&local.path("/assets").unwrap()).unwrap().body.as_ref(),
            b"main()"
        );
    }

    #[test]
    fn test_duplicate_paths_last_wins() {
        let td = tempfile::tempdir().expect("tmp");
        std::fs::write(td.path().join("a.txt"), "same").unwrap();
        let first: Resource = LocalResource::builder(td.path(), "a.txt")
            .header("X-Which", "first")
            .build()
            .unwrap()
            .into();
        let second: Resource = LocalResource::builder(td.path(), "a.txt")
            .header("X-Which", "second")
            .build()
            .unwrap()
            .into();

        let map = build_map("", vec![first, second]).unwrap();

        assert_eq!(map.len(), 1);
        let (_, entry) = map.iter().next().unwrap();
        assert_eq!(entry.headers["x-which"], "second");
    }

    #[test]
    fn test_version_query_is_only_a_cache_buster() {
        let td = tempfile::tempdir().expect("tmp");
        std::fs::write(td.path().join("app.js"), "v1").unwrap();
        let local = LocalResource::new(td.path(), "app.js").unwrap();
        let map = build_map("/assets", [Resource::from(local.clone())]).unwrap();
        let current = local.path("/assets").unwrap();

        assert!(map.contains(&current));
        assert!(map.contains("/assets/app.js?v=outdated"));
        assert!(map.contains("/assets/app.js"));
        assert_eq!(map.get("/assets/app.js").unwrap().body.as_ref(), b"v1");
        assert!(!map.contains("/assets/other.js?v=x"));
        assert_eq!(map.paths(), vec![current.as_str()]);
    }

    #[test]
    fn test_same_local_path_with_different_content_last_wins() {
        let td = tempfile::tempdir().expect("tmp");
        let a = td.path().join("a");
        let b = td.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("x.js"), "first").unwrap();
        std::fs::write(b.join("x.js"), "second").unwrap();
        let first: Resource = LocalResource::new(&a, "x.js").unwrap().into();
        let second: Resource = LocalResource::new(&b, "x.js").unwrap().into();

        let map = build_map("/s", [first, second]).unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("/s/x.js").unwrap().body.as_ref(), b"second");
    }

    #[test]
    fn test_identical_content_shares_a_path() {
        let td = tempfile::tempdir().expect("tmp");
        let a = td.path().join("a");
        let b = td.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("x.js"), "same bytes").unwrap();
        std::fs::write(b.join("x.js"), "same bytes").unwrap();
        let pa = LocalResource::new(&a, "x.js").unwrap().path("/s").unwrap();
        let pb = LocalResource::new(&b, "x.js").unwrap().path("/s").unwrap();
        assert_eq!(pa, pb);
    }
}
