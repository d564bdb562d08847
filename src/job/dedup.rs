//! Session-scoped record of artifacts already produced.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Remembers the content hash of every artifact produced in one session.
///
/// Owned by whoever runs several jobs in a row and passed explicitly; there
/// is no process-wide set.
#[derive(Debug, Default)]
pub struct DedupCache {
    seen: HashMap<String, PathBuf>,
}

impl DedupCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `content_hash` for `path`.
    ///
    /// Returns the path first recorded for the same hash when this artifact is
    /// a duplicate; the earlier entry is kept.
    pub fn record(&mut self, content_hash: &str, path: &Path) -> Option<PathBuf> {
        if let Some(existing) = self.seen.get(content_hash) {
            return Some(existing.clone());
        }
        self.seen
            .insert(content_hash.to_string(), path.to_path_buf());
        None
    }

    #[must_use]
    pub fn contains(&self, content_hash: &str) -> bool {
        self.seen.contains_key(content_hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reports_first_path_for_duplicates() {
        let mut cache = DedupCache::new();
        assert!(cache.record("abc", Path::new("/out/a.ts")).is_none());
        assert!(cache.record("def", Path::new("/out/b.ts")).is_none());

        let duplicate = cache.record("abc", Path::new("/out/c.ts"));
        assert_eq!(duplicate, Some(PathBuf::from("/out/a.ts")));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("def"));
        assert!(!cache.contains("zzz"));
    }
}
