//! Total-eviction garbage collection for the content store.
//!
//! Not LRU: once the configured interval has elapsed since the last run, every file
//! except the `last_gc` marker is deleted. Entries are cheap to re-derive from their
//! source URLs, so precision isn't worth an index.

use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use super::ContentStore;
use crate::error::{AssetError, Result};

/// Marker file holding the RFC 3339 timestamp of the last collection.
pub const LAST_GC_FILE: &str = "last_gc";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GcOutcome {
    /// No marker existed; one was written and nothing was evicted.
    MarkerCreated,
    /// The interval hasn't elapsed yet.
    NotDue { next_due: Option<DateTime<Utc>> },
    /// Due, but the directory held nothing besides the marker.
    NothingToCollect,
    Collected { removed: usize },
}

impl ContentStore {
    /// Collect if the policy interval has elapsed since the last run.
    pub fn gc(&self) -> Result<GcOutcome> {
        self.gc_at(Utc::now())
    }

    /// Collect now, ignoring the marker's age.
    pub fn gc_forced(&self) -> Result<GcOutcome> {
        let now = Utc::now();
        fs::create_dir_all(self.dir())?;
        let removed = evict_all_but_marker(self.dir())?;
        write_marker(self.dir(), now)?;
        tracing::info!(dir = %self.dir().display(), removed, "forced cache collection");
        Ok(GcOutcome::Collected { removed })
    }

    pub(crate) fn gc_at(&self, now: DateTime<Utc>) -> Result<GcOutcome> {
        let dir = self.dir();
        fs::create_dir_all(dir)?;

        let last = match read_marker(dir)? {
            Some(last) => last,
            None => {
                write_marker(dir, now)?;
                tracing::debug!(dir = %dir.display(), "created gc marker");
                return Ok(GcOutcome::MarkerCreated);
            }
        };

        let policy = self.policy();
        if !policy.is_due(last, now) {
            return Ok(GcOutcome::NotDue {
                next_due: policy.next_due(last),
            });
        }

        // Counting the marker itself: one entry means there is nothing to evict.
        if fs::read_dir(dir)?.count() <= 1 {
            return Ok(GcOutcome::NothingToCollect);
        }

        let removed = evict_all_but_marker(dir)?;
        write_marker(dir, now)?;
        tracing::info!(dir = %dir.display(), removed, interval = %policy, "collected content store");
        Ok(GcOutcome::Collected { removed })
    }

    /// Timestamp of the last collection, if any.
    pub fn last_gc(&self) -> Result<Option<DateTime<Utc>>> {
        read_marker(self.dir())
    }
}

fn read_marker(dir: &Path) -> Result<Option<DateTime<Utc>>> {
    let raw = match fs::read_to_string(dir.join(LAST_GC_FILE)) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| {
            AssetError::config(
                LAST_GC_FILE,
                format!("malformed timestamp {:?}: {}", raw.trim(), e),
            )
        })
}

fn write_marker(dir: &Path, now: DateTime<Utc>) -> Result<()> {
    fs::write(
        dir.join(LAST_GC_FILE),
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
    )?;
    Ok(())
}

fn evict_all_but_marker(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == LAST_GC_FILE || !entry.file_type()?.is_file() {
            continue;
        }
        fs::remove_file(entry.path())?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::config::GcPolicy;
    use crate::store::testing::CountingFetcher;

    fn store(dir: &Path, policy: GcPolicy) -> ContentStore {
        ContentStore::with_fetcher(dir, policy, Arc::new(CountingFetcher::default()))
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut v: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_first_run_writes_marker_only() {
        let td = tempfile::tempdir().expect("tmp");
        let s = store(td.path(), GcPolicy::default());
        s.put(b"keep me").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(s.gc_at(now).unwrap(), GcOutcome::MarkerCreated);
        assert_eq!(s.entries().unwrap().len(), 1);
        assert_eq!(s.last_gc().unwrap(), Some(now));
    }

    #[test]
    fn test_stale_marker_evicts_everything_but_marker() {
        let td = tempfile::tempdir().expect("tmp");
        let s = store(td.path(), GcPolicy::new(1, "days").unwrap());
        s.put(b"a").unwrap();
        s.put(b"b").unwrap();
        fs::write(td.path().join("stray.tmp"), b"partial").unwrap();
        fs::write(td.path().join(LAST_GC_FILE), "2024-01-01T00:00:00Z").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

        assert_eq!(s.gc_at(now).unwrap(), GcOutcome::Collected { removed: 3 });
        assert_eq!(names(td.path()), vec![LAST_GC_FILE.to_string()]);
        assert_eq!(s.last_gc().unwrap(), Some(now));
    }

    #[test]
    fn test_fresh_marker_is_noop() {
        let td = tempfile::tempdir().expect("tmp");
        let s = store(td.path(), GcPolicy::new(1, "weeks").unwrap());
        s.put(b"a").unwrap();
        fs::write(td.path().join(LAST_GC_FILE), "2024-01-01T00:00:00Z").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();

        let outcome = s.gc_at(now).unwrap();
        assert!(matches!(outcome, GcOutcome::NotDue { .. }));
        assert_eq!(s.entries().unwrap().len(), 1);
        // Running again within the interval stays a no-op.
        assert_eq!(s.gc_at(now).unwrap(), outcome);
    }

    #[test]
    fn test_due_with_only_marker_leaves_marker_untouched() {
        let td = tempfile::tempdir().expect("tmp");
        let s = store(td.path(), GcPolicy::new(1, "hours").unwrap());
        fs::write(td.path().join(LAST_GC_FILE), "2024-01-01T00:00:00Z").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        assert_eq!(s.gc_at(now).unwrap(), GcOutcome::NothingToCollect);
        assert_eq!(
            s.last_gc().unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_malformed_marker_is_config_error() {
        let td = tempfile::tempdir().expect("tmp");
        let s = store(td.path(), GcPolicy::default());
        fs::write(td.path().join(LAST_GC_FILE), "last tuesday").unwrap();
        assert!(matches!(s.gc(), Err(AssetError::Config { .. })));
    }

    #[test]
    fn test_forced_gc_ignores_marker_age() {
        let td = tempfile::tempdir().expect("tmp");
        let s = store(td.path(), GcPolicy::default());
        s.put(b"a").unwrap();
        let recent = Utc::now() - Duration::minutes(1);
        fs::write(
            td.path().join(LAST_GC_FILE),
            recent.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .unwrap();

        assert_eq!(s.gc_forced().unwrap(), GcOutcome::Collected { removed: 1 });
        assert!(s.entries().unwrap().is_empty());
    }
}
