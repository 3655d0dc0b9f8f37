//! Stash count from the stash reflog.
//!
//! Each `git stash push` appends one line to `logs/refs/stash`, so the
//! stash depth is the reflog line count. A stash ref without a reflog
//! (possible after hand-surgery or `pack-refs`) still counts as one entry.

use std::fs;
use std::path::Path;

use crate::repo::refs::PackedRefs;

/// Number of stash entries, zero when there is no stash.
#[must_use]
pub fn stash_count(commondir: &Path, packed: &PackedRefs) -> usize {
    if let Ok(data) = fs::read(commondir.join("logs").join("refs").join("stash")) {
        let lines = data
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .count();
        if lines > 0 {
            return lines;
        }
    }

    let loose = commondir.join("refs").join("stash");
    if loose.is_file() || packed.find(b"refs/stash").is_some() {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_reflog_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs").join("refs");
        fs::create_dir_all(&logs).unwrap();
        fs::write(logs.join("stash"), b"line one\nline two\n").unwrap();

        assert_eq!(stash_count(dir.path(), &PackedRefs::default()), 2);
    }

    #[test]
    fn no_stash_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(stash_count(dir.path(), &PackedRefs::default()), 0);
    }

    #[test]
    fn bare_ref_without_reflog_counts_one() {
        let dir = tempfile::tempdir().unwrap();
        let refs = dir.path().join("refs");
        fs::create_dir_all(&refs).unwrap();
        fs::write(refs.join("stash"), b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n").unwrap();

        assert_eq!(stash_count(dir.path(), &PackedRefs::default()), 1);
    }
}
