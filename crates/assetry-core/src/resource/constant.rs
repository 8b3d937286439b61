//! Build-once resource values keyed by a stable ID.
//!
//! A resource declared as a constant (say `"vendor/htmx"`) is constructed on first use
//! and reused afterwards, so the download and verification happen once per process.
//! `invalidate` drops a value so the next lookup rebuilds it, which is how a reload
//! swaps in new definitions.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use super::Resource;
use crate::error::Result;

fn constants() -> &'static DashMap<String, Arc<Resource>> {
    static CONSTANTS: OnceLock<DashMap<String, Arc<Resource>>> = OnceLock::new();
    CONSTANTS.get_or_init(DashMap::new)
}

/// Return the resource cached under `id`, building it with `factory` on first use.
/// A failing factory caches nothing, so the next call tries again.
pub fn get_or_init<F>(id: &str, factory: F) -> Result<Arc<Resource>>
where
    F: FnOnce() -> Result<Resource>,
{
    if let Some(existing) = constants().get(id) {
        return Ok(existing.value().clone());
    }
    // Built outside the map lock; if two threads race, the first insert wins.
    let built = Arc::new(factory()?);
    let entry = constants().entry(id.to_string()).or_insert(built);
    Ok(entry.value().clone())
}

pub fn get(id: &str) -> Option<Arc<Resource>> {
    constants().get(id).map(|e| e.value().clone())
}

/// Forget one constant. Returns whether it was present.
pub fn invalidate(id: &str) -> bool {
    constants().remove(id).is_some()
}

pub fn invalidate_all() {
    constants().clear();
}
