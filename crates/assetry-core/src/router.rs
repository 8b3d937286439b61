//! Request handling over a route map, with an optional live-reload mode.
//!
//! Frozen routers serve a map built once. Live routers check the modification times of
//! their definition files and every local resource's backing file before each request
//! and rebuild the whole map when something moved. The check runs on the request path,
//! so live mode is meant for development only.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};

use crate::change::{ChangeDetector, Snapshot};
use crate::error::Result;
use crate::registry::{self, RouteMap};
use crate::resource::Resource;

/// Where a live router gets its resources from. Called again on every reload.
pub trait ResourceSource: Send + Sync {
    fn resources(&self) -> Result<Vec<Resource>>;

    /// Files that define the resource list itself (e.g. a manifest). Changes to these
    /// trigger a reload just like changes to a resource's backing file.
    fn definition_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

impl<F> ResourceSource for F
where
    F: Fn() -> Result<Vec<Resource>> + Send + Sync,
{
    fn resources(&self) -> Result<Vec<Resource>> {
        self()
    }
}

/// Handler for requests the route map doesn't answer.
pub type Fallback = Arc<dyn Fn(&Method, &str) -> Response<Bytes> + Send + Sync>;

/// Plain-text 404.
pub fn not_found(_method: &Method, _path: &str) -> Response<Bytes> {
    let mut resp = Response::new(Bytes::from_static(b"Not Found"));
    *resp.status_mut() = StatusCode::NOT_FOUND;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}

struct LiveReload {
    source: Box<dyn ResourceSource>,
    /// Held for the whole check-and-rebuild so concurrent requests don't rebuild twice.
    state: Mutex<LiveState>,
}

struct LiveState {
    detector: ChangeDetector,
    files: Vec<PathBuf>,
}

pub struct ResourceRouter {
    prefix: String,
    map: RwLock<Arc<RouteMap>>,
    live: Option<LiveReload>,
    fallback: Fallback,
}

impl ResourceRouter {
    /// Serve `map` as-is forever. No per-request overhead beyond the lookup.
    pub fn frozen(map: RouteMap) -> Self {
        Self {
            prefix: String::new(),
            map: RwLock::new(Arc::new(map)),
            live: None,
            fallback: Arc::new(not_found),
        }
    }

    /// Build from `source` now and rebuild whenever a watched file changes.
    pub fn live<S>(prefix: &str, source: S) -> Result<Self>
    where
        S: ResourceSource + 'static,
    {
        let resources = source.resources()?;
        let map = registry::build_map(prefix, &resources)?;
        let files = watched_files(&source, &resources);
        let detector = ChangeDetector::primed(&files);
        tracing::info!(routes = map.len(), watched = files.len(), "live router ready");
        Ok(Self {
            prefix: prefix.to_string(),
            map: RwLock::new(Arc::new(map)),
            live: Some(LiveReload {
                source: Box::new(source),
                state: Mutex::new(LiveState { detector, files }),
            }),
            fallback: Arc::new(not_found),
        })
    }

    /// Replace the 404 fallback.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&Method, &str) -> Response<Bytes> + Send + Sync + 'static,
    {
        self.fallback = Arc::new(fallback);
        self
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// The map currently being served.
    pub fn map(&self) -> Arc<RouteMap> {
        self.map.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Answer `method path`. `path` includes the query string, since local resources are
    /// addressed by `?v=`.
    pub fn handle(&self, method: &Method, path: &str) -> Response<Bytes> {
        if method != Method::GET {
            return (self.fallback)(method, path);
        }
        if self.live.is_some() {
            self.refresh();
        }
        let map = self.map();
        match map.get(path) {
            Some(entry) => {
                let mut resp = Response::new(entry.body.clone());
                *resp.headers_mut() = entry.headers.clone();
                resp
            }
            None => (self.fallback)(method, path),
        }
    }

    /// Adapter for `http::Request` from any server stack.
    pub fn handle_request<B>(&self, req: &Request<B>) -> Response<Bytes> {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.uri().path());
        self.handle(req.method(), path)
    }

    /// Rebuild now if anything changed. Returns whether the map was swapped. Frozen
    /// routers never reload.
    pub fn refresh(&self) -> bool {
        let Some(live) = &self.live else {
            return false;
        };
        let mut state = live.state.lock().unwrap_or_else(|e| e.into_inner());
        let (changed, snapshot) = state.detector.check(&state.files);
        if !changed {
            state.detector.update(snapshot);
            return false;
        }

        let rebuilt = live.source.resources().and_then(|resources| {
            let map = registry::build_map(&self.prefix, &resources)?;
            Ok((map, watched_files(live.source.as_ref(), &resources)))
        });
        match rebuilt {
            Ok((map, files)) => {
                let routes = map.len();
                *self.map.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(map);
                let snapshot = carry_over(snapshot, &files);
                state.detector.update(snapshot);
                state.files = files;
                tracing::debug!(routes, "route map reloaded");
                true
            }
            Err(e) => {
                // Keep serving the old map; the stale snapshot makes the next request retry.
                tracing::error!(error = %e, "route map reload failed");
                false
            }
        }
    }
}

fn watched_files(source: &dyn ResourceSource, resources: &[Resource]) -> Vec<PathBuf> {
    let mut files = source.definition_files();
    for resource in resources {
        files.extend(resource.watched_files());
    }
    files.sort();
    files.dedup();
    files
}

/// Keep the pre-rebuild timestamps for files still watched, so an edit that lands
/// mid-rebuild is caught by the next check, and check any newly watched files.
fn carry_over(mut before: Snapshot, files: &[PathBuf]) -> Snapshot {
    before.retain(|path, _| files.contains(path));
    let fresh: Vec<PathBuf> = files
        .iter()
        .filter(|f| !before.contains_key(*f))
        .cloned()
        .collect();
    before.extend(crate::change::take_snapshot(&fresh));
    before
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::header::CONTENT_LENGTH;

    use super::*;
    use crate::change::bump_mtime;
    use crate::resource::LocalResource;

    fn site() -> tempfile::TempDir {
        let td = tempfile::tempdir().expect("tmp");
        std::fs::write(td.path().join("app.js"), "v1").unwrap();
        td
    }

    fn only_path(router: &ResourceRouter) -> String {
        router.map().paths()[0].to_string()
    }

    #[test]
    fn test_frozen_serves_mapped_and_falls_back() {
        let td = site();
        let local: Resource = LocalResource::new(td.path(), "app.js").unwrap().into();
        let map = registry::build_map("/assets", [local]).unwrap();
        let router = ResourceRouter::frozen(map);
        let path = only_path(&router);

        let ok = router.handle(&Method::GET, &path);
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.body().as_ref(), b"v1");
        assert_eq!(ok.headers()[CONTENT_LENGTH], "2");

        assert_eq!(
            router.handle(&Method::GET, "/assets/other.js").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(router.handle(&Method::POST, &path).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_custom_fallback_sees_non_get() {
        let router = ResourceRouter::frozen(RouteMap::default()).with_fallback(|m, _| {
            let mut r = Response::new(Bytes::new());
            *r.status_mut() = if m == Method::DELETE {
                StatusCode::METHOD_NOT_ALLOWED
            } else {
                StatusCode::IM_A_TEAPOT
            };
            r
        });
        assert_eq!(
            router.handle(&Method::DELETE, "/x").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(router.handle(&Method::GET, "/x").status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_handle_request_uses_path_and_query() {
        let td = site();
        let local: Resource = LocalResource::new(td.path(), "app.js").unwrap().into();
        let router = ResourceRouter::frozen(registry::build_map("/a", [local]).unwrap());
        let path = only_path(&router);
        let req = Request::get(path.as_str()).body(()).unwrap();
        assert_eq!(router.handle_request(&req).status(), StatusCode::OK);
    }

    #[test]
    fn test_live_reloads_after_mtime_change() {
        let td = site();
        let root = td.path().to_path_buf();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let router = ResourceRouter::live("/assets", move || -> Result<Vec<Resource>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![LocalResource::new(&root, "app.js")?.into()])
        })
        .unwrap();
        let old_path = only_path(&router);

        // Idle requests neither rebuild nor change the answer.
        let a = router.handle(&Method::GET, &old_path);
        let b = router.handle(&Method::GET, &old_path);
        assert_eq!(a.body(), b.body());
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        std::fs::write(td.path().join("app.js"), "v2!").unwrap();
        bump_mtime(&td.path().join("app.js"), 5);

        let new_path = {
            router.refresh();
            only_path(&router)
        };
        assert_ne!(new_path, old_path);
        let resp = router.handle(&Method::GET, &new_path);
        assert_eq!(resp.body().as_ref(), b"v2!");
        // URLs handed out before the edit now serve the new bytes.
        let stale_url = router.handle(&Method::GET, &old_path);
        assert_eq!(stale_url.status(), StatusCode::OK);
        assert_eq!(stale_url.body().as_ref(), b"v2!");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_reload_keeps_old_map() {
        let td = site();
        let root = td.path().to_path_buf();
        let router = ResourceRouter::live("/assets", move || -> Result<Vec<Resource>> {
            Ok(vec![LocalResource::new(&root, "app.js")?.into()])
        })
        .unwrap();
        let path = only_path(&router);

        std::fs::remove_file(td.path().join("app.js")).unwrap();
        assert!(!router.refresh());
        assert_eq!(router.handle(&Method::GET, &path).status(), StatusCode::OK);
    }

    #[test]
    fn test_frozen_never_refreshes() {
        let router = ResourceRouter::frozen(RouteMap::default());
        assert!(!router.is_live());
        assert!(!router.refresh());
    }
}
