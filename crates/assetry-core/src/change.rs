//! Staleness signatures over a set of files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// file → last-modified time in nanoseconds since the epoch; 0 means unknown.
pub type Snapshot = HashMap<PathBuf, u128>;

/// Compares the current modification times of a file set with the last snapshot.
#[derive(Debug, Default, Clone)]
pub struct ChangeDetector {
    snapshot: Snapshot,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector primed with the current state of `files`, so the first `check` only
    /// reports real changes.
    pub fn primed<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            snapshot: take_snapshot(files),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Whether anything changed since the stored snapshot, plus the fresh snapshot.
    ///
    /// A file counts as changed when it is new to the set, when its timestamp differs,
    /// or when its timestamp is unknown (missing file, or an mtime of zero). The
    /// snapshot is returned either way so the caller can store it unconditionally.
    pub fn check<I, P>(&self, files: I) -> (bool, Snapshot)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let current = take_snapshot(files);
        let changed = current.len() != self.snapshot.len()
            || current.iter().any(|(path, &mtime)| {
                mtime == 0 || self.snapshot.get(path) != Some(&mtime)
            });
        (changed, current)
    }

    pub fn update(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }
}

pub fn take_snapshot<I, P>(files: I) -> Snapshot
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    files
        .into_iter()
        .map(|p| {
            let p = p.as_ref();
            (p.to_path_buf(), modified_nanos(p))
        })
        .collect()
}

fn modified_nanos(path: &Path) -> u128 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t: SystemTime| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) fn bump_mtime(path: &Path, secs: u64) {
    let when = SystemTime::now() + std::time::Duration::from_secs(secs);
    std::fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(when))
        .expect("set mtime");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_files_report_no_change() {
        let td = tempfile::tempdir().expect("tmp");
        let f = td.path().join("a.js");
        std::fs::write(&f, "1").unwrap();
        let detector = ChangeDetector::primed([&f]);
        let (changed, snap) = detector.check([&f]);
        assert!(!changed);
        assert_eq!(&snap, detector.snapshot());
    }

    #[test]
    fn test_mtime_change_is_detected() {
        let td = tempfile::tempdir().expect("tmp");
        let f = td.path().join("a.js");
        std::fs::write(&f, "1").unwrap();
        let mut detector = ChangeDetector::primed([&f]);
        bump_mtime(&f, 5);

        let (changed, snap) = detector.check([&f]);
        assert!(changed);
        detector.update(snap);
        assert!(!detector.check([&f]).0);
    }

    #[test]
    fn test_new_key_is_a_change() {
        let td = tempfile::tempdir().expect("tmp");
        let a = td.path().join("a.js");
        let b = td.path().join("b.js");
        std::fs::write(&a, "1").unwrap();
        std::fs::write(&b, "2").unwrap();
        let detector = ChangeDetector::primed([&a]);
        assert!(detector.check([&a, &b]).0);
        assert!(ChangeDetector::new().check([&a]).0);
    }

    #[test]
    fn test_missing_file_is_always_stale() {
        let td = tempfile::tempdir().expect("tmp");
        let gone = td.path().join("gone.js");
        let mut detector = ChangeDetector::primed([&gone]);
        let (changed, snap) = detector.check([&gone]);
        assert!(changed);
        assert_eq!(snap[&gone], 0);
        detector.update(snap);
        assert!(detector.check([&gone]).0);
    }
}
