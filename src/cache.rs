//! Process-lifetime repository cache.
//!
//! Keyed by the canonical working-directory root. A cache hit skips
//! repository discovery and, when the index file's mtime and size are
//! unchanged, reuses the parsed index snapshot, which is the dominant cost
//! of a warm request. Head trees are streamed per request and need no
//! caching.
//!
//! Eviction runs after every request: entries idle longer than the TTL are
//! closed, and the least-recently-used entries are dropped beyond the cap.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;

use crate::errors::{RepoOpenError, ScanError};
use crate::index::{IndexFingerprint, IndexSnapshot};
use crate::repo::Repo;

/// One cached repository with its reusable per-repo state.
pub struct CachedRepo {
    pub repo: Arc<Repo>,
    snapshot: Option<Arc<IndexSnapshot>>,
    fingerprint: Option<IndexFingerprint>,
    last_used: Instant,
}

impl CachedRepo {
    /// Returns the current index snapshot, reparsing only when the on-disk
    /// index changed since it was cached.
    pub fn snapshot(&mut self, verify_checksum: bool) -> Result<Arc<IndexSnapshot>, ScanError> {
        let current = match fs::symlink_metadata(self.repo.index_path()) {
            Ok(meta) => Some(IndexFingerprint::from_metadata(&meta)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(snapshot) = &self.snapshot {
            if self.fingerprint == current {
                return Ok(Arc::clone(snapshot));
            }
        }

        let snapshot = Arc::new(IndexSnapshot::load(
            &self.repo.index_path(),
            verify_checksum,
        )?);
        self.fingerprint = current;
        self.snapshot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

/// Mapping from working-directory root to opened repository.
pub struct RepoCache {
    entries: AHashMap<PathBuf, CachedRepo>,
    ttl: Duration,
    cap: usize,
}

impl RepoCache {
    #[must_use]
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self {
            entries: AHashMap::new(),
            ttl,
            cap: cap.max(1),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Opens (or reuses) the repository containing `dir`.
    ///
    /// Discovery runs on every request (a handful of stats), but the
    /// opened handle, its object database and the parsed index are reused.
    /// A cached handle whose gitdir vanished is dropped and reopened.
    pub fn open(&mut self, dir: &Path) -> Result<&mut CachedRepo, RepoOpenError> {
        let repo = Repo::discover(dir)?;
        let key = repo.workdir().to_path_buf();

        let stale = self
            .entries
            .get(&key)
            .is_some_and(|cached| !cached.repo.gitdir().is_dir());
        if stale {
            self.entries.remove(&key);
        }

        let entry = self.entries.entry(key).or_insert_with(|| CachedRepo {
            repo: Arc::new(repo),
            snapshot: None,
            fingerprint: None,
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        Ok(entry)
    }

    /// Applies the TTL and cap eviction policy.
    pub fn evict(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, cached| now.duration_since(cached.last_used) <= self.ttl);

        while self.entries.len() > self.cap {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(root: &Path) {
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    #[test]
    fn reuses_handle_for_same_workdir() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::create_dir_all(dir.path().join("sub")).unwrap();

        let mut cache = RepoCache::new(Duration::from_secs(3600), 8);
        let first = Arc::as_ptr(&cache.open(dir.path()).unwrap().repo);
        // A sub-path canonicalizes to the same root and hits the cache.
        let second = Arc::as_ptr(&cache.open(&dir.path().join("sub")).unwrap().repo);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn snapshot_reuse_tracks_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let mut cache = RepoCache::new(Duration::from_secs(3600), 8);
        let entry = cache.open(dir.path()).unwrap();
        let first = entry.snapshot(false).unwrap();
        assert!(first.is_empty());
        let again = entry.snapshot(false).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn cap_eviction_drops_least_recent() {
        let mut cache = RepoCache::new(Duration::from_secs(3600), 2);
        let dirs: Vec<_> = (0..3)
            .map(|_| {
                let dir = tempfile::tempdir().unwrap();
                init_repo(dir.path());
                dir
            })
            .collect();

        for dir in &dirs {
            cache.open(dir.path()).unwrap();
        }
        assert_eq!(cache.len(), 3);
        cache.evict();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn ttl_eviction_drops_idle_entries() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let mut cache = RepoCache::new(Duration::ZERO, 8);
        cache.open(dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.evict();
        assert!(cache.is_empty());
    }
}
