//! Core library for Assetry: content-addressed asset cache, resource descriptors,
//! route maps with live reload, and build-tool supervision.
//! Used by the CLI binary; can be embedded in any HTTP server through `http` types.

pub mod build_tool;
pub mod change;
pub mod config;
pub mod error;
pub mod http_client;
pub mod integrity;
pub mod logging;
pub mod manifest;
pub mod registry;
pub mod resource;
pub mod router;
pub mod store;
pub mod watcher;

// Re-export main API for CLI
pub use build_tool::BuildTool;
pub use change::ChangeDetector;
pub use config::{load_config, Config, GcPolicy, GcUnit, Settings};
pub use error::{AssetError, Result};
pub use http_client::{Fetcher, HttpFetcher};
pub use logging::init_logging;
pub use manifest::{Manifest, ManifestSource};
pub use registry::{build_map, RouteEntry, RouteMap};
pub use resource::{LocalResource, RemoteResource, Rendered, Resource};
pub use router::{ResourceRouter, ResourceSource};
pub use store::{CacheEntry, ContentStore, GcOutcome};
pub use watcher::BuildWatcher;
