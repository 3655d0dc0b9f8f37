//! Dirty predicate: is a working-tree file changed relative to its index
//! entry?
//!
//! The fast path is pure stat comparison against the cached stat data in
//! the entry. Only entries the stat check cannot clear (`MaybeDirty`) pay
//! for content hashing, which recomputes the working-tree blob id with
//! text normalization applied per the attribute oracle and compares it to
//! the entry's id.
//!
//! The racy-timestamp rule applies: an entry whose mtime is not older than
//! the index file's own mtime cannot be trusted even when all stat fields
//! match, because both may have been written within the filesystem's
//! timestamp granularity.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::errors::ScanError;
use crate::index::{mode_class, mode_is_executable, IndexEntry, ModeClass};
use crate::limits::StatusLimits;
use crate::oracle::{AttrLookup, TextPolicy};
use crate::repo::oid::ObjectId;
use crate::repo::refs;

/// Outcome of the stat stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Unchanged,
    /// Stat data is inconclusive; content comparison required.
    MaybeDirty,
    Dirty,
    Deleted,
}

/// Stat-only classification of one stage-0 entry.
///
/// `index_mtime` is the index file's own (seconds, nanoseconds) mtime for
/// the racy check. Gitlink entries are not resolved here; see
/// [`gitlink_changed`].
#[must_use]
pub fn classify_stat(
    entry: &IndexEntry,
    meta: Option<&Metadata>,
    index_mtime: (u32, u32),
    honor_filemode: bool,
) -> Verdict {
    let Some(meta) = meta else {
        return Verdict::Deleted;
    };
    if entry.flags.assume_unchanged() || entry.flags.skip_worktree() {
        return Verdict::Unchanged;
    }

    let entry_class = mode_class(entry.mode);
    let disk_class = if meta.file_type().is_symlink() {
        ModeClass::Symlink
    } else if meta.is_dir() {
        // A directory where a file was: for gitlink entries this is the
        // expected shape, for anything else it is a typechange.
        ModeClass::Directory
    } else if meta.file_type().is_file() {
        ModeClass::Regular
    } else {
        // Sockets, fifos and devices cannot match any blob.
        return Verdict::Dirty;
    };

    match entry_class {
        ModeClass::Gitlink => {
            return if disk_class == ModeClass::Directory {
                Verdict::MaybeDirty
            } else {
                Verdict::Dirty
            };
        }
        ModeClass::Directory | ModeClass::Unknown => return Verdict::Unchanged,
        ModeClass::Regular | ModeClass::Symlink => {
            if disk_class != entry_class {
                return Verdict::Dirty;
            }
        }
    }

    if honor_filemode
        && entry_class == ModeClass::Regular
        && mode_is_executable(entry.mode) != (meta.mode() & 0o111 != 0)
    {
        return Verdict::Dirty;
    }

    // A zeroed size is git's racy smudge: the cached stat data is void.
    if entry.size != 0 && entry.size != meta.size() as u32 {
        return Verdict::Dirty;
    }
    if entry.size == 0 && meta.size() != 0 {
        return Verdict::MaybeDirty;
    }

    let mtime_match = entry.mtime_s == meta.mtime() as u32
        && ns_match(entry.mtime_ns, meta.mtime_nsec() as u32);
    let ctime_match = entry.ctime_s == meta.ctime() as u32
        && ns_match(entry.ctime_ns, meta.ctime_nsec() as u32);
    let identity_match = entry.dev == meta.dev() as u32 && entry.ino == meta.ino() as u32;

    if !(mtime_match && ctime_match && identity_match) || entry.flags.intent_to_add() {
        return Verdict::MaybeDirty;
    }

    // Racy: entry written in the same instant as the index itself.
    let (idx_s, idx_ns) = index_mtime;
    if entry.mtime_s > idx_s || (entry.mtime_s == idx_s && entry.mtime_ns >= idx_ns) {
        return Verdict::MaybeDirty;
    }

    Verdict::Unchanged
}

/// Nanosecond comparison: a zero on either side means "not recorded".
#[inline]
fn ns_match(a: u32, b: u32) -> bool {
    a == b || a == 0 || b == 0
}

/// Content comparison for a `MaybeDirty` regular file or symlink.
///
/// Returns `true` when the working-tree blob differs from the entry's id.
/// Files larger than `dirty_max_file_size` are treated as dirty without
/// hashing. A file that vanishes between stat and read counts as dirty.
pub fn content_changed(
    workdir: &Path,
    rel: &[u8],
    entry: &IndexEntry,
    meta: &Metadata,
    attrs: &mut AttrLookup<'_>,
    autocrlf_text: bool,
    limits: &StatusLimits,
    scratch: &mut Vec<u8>,
) -> Result<bool, ScanError> {
    let abs = workdir.join(Path::new(std::ffi::OsStr::from_bytes(rel)));

    if mode_class(entry.mode) == ModeClass::Symlink {
        let target = match fs::read_link(&abs) {
            Ok(target) => target,
            Err(err) if unreadable_is_dirty(&err) => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        let oid = hash_blob(target.as_os_str().as_bytes());
        return Ok(oid != entry.oid);
    }

    if meta.size() > limits.dirty_max_file_size {
        return Ok(true);
    }

    scratch.clear();
    let mut file = match fs::File::open(&abs) {
        Ok(file) => file,
        Err(err) if unreadable_is_dirty(&err) => return Ok(true),
        Err(err) => return Err(err.into()),
    };
    io::Read::read_to_end(&mut file, scratch)?;

    let normalize = match attrs.text_policy(rel) {
        TextPolicy::Text => true,
        TextPolicy::Binary => false,
        TextPolicy::Auto => looks_like_text(scratch),
        TextPolicy::Unspecified => autocrlf_text && looks_like_text(scratch),
    };

    let oid = if normalize && scratch.windows(2).any(|w| w == b"\r\n") {
        let normalized = strip_crlf(scratch);
        hash_blob(&normalized)
    } else {
        hash_blob(scratch)
    };
    Ok(oid != entry.oid)
}

/// Whether a gitlink entry's nested repository head moved.
///
/// A directory that is not (or no longer) a repository compares clean;
/// status tools do not descend into submodule internals.
#[must_use]
pub fn gitlink_changed(workdir: &Path, rel: &[u8], entry_oid: ObjectId) -> bool {
    match nested_head(&workdir.join(Path::new(std::ffi::OsStr::from_bytes(rel)))) {
        Some(head) => head != entry_oid,
        None => false,
    }
}

fn nested_head(dir: &Path) -> Option<ObjectId> {
    let dot_git = dir.join(".git");
    let gitdir: PathBuf = if dot_git.is_dir() {
        dot_git
    } else if dot_git.is_file() {
        let data = fs::read(&dot_git).ok()?;
        let text = String::from_utf8_lossy(&data);
        let rel = text.trim().strip_prefix("gitdir:")?.trim();
        let target = if Path::new(rel).is_absolute() {
            PathBuf::from(rel)
        } else {
            dir.join(rel)
        };
        fs::canonicalize(target).ok()?
    } else {
        return None;
    };

    let commondir = match fs::read(gitdir.join("commondir")) {
        Ok(data) => {
            let text = String::from_utf8_lossy(&data);
            let rel = text.trim();
            if Path::new(rel).is_absolute() {
                PathBuf::from(rel)
            } else {
                gitdir.join(rel)
            }
        }
        Err(_) => gitdir.clone(),
    };

    refs::read_head(&gitdir, &commondir).ok()?.oid
}

#[inline]
fn unreadable_is_dirty(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

/// Git's binary probe: no NUL in the first 8000 bytes.
#[must_use]
pub fn looks_like_text(data: &[u8]) -> bool {
    let probe = &data[..data.len().min(8000)];
    memchr::memchr(0, probe).is_none()
}

fn strip_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(pos) = memchr::memchr(b'\r', rest) {
        out.extend_from_slice(&rest[..pos]);
        if rest.get(pos + 1) == Some(&b'\n') {
            // Drop the CR of a CRLF pair; lone CRs are kept.
            out.push(b'\n');
            rest = &rest[pos + 2..];
        } else {
            out.push(b'\r');
            rest = &rest[pos + 1..];
        }
    }
    out.extend_from_slice(rest);
    out
}

/// Computes the git blob id of `content`.
#[must_use]
pub fn hash_blob(content: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(b"blob ");
    hasher.update(content.len().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    let bytes: [u8; 20] = hasher.finalize().into();
    ObjectId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSnapshot;
    use sha1::Digest;

    fn entry_for(meta: &Metadata, oid: ObjectId) -> IndexEntry {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"DIRC");
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        let start = buf.len();
        for v in [
            meta.ctime() as u32,
            meta.ctime_nsec() as u32,
            meta.mtime() as u32,
            meta.mtime_nsec() as u32,
            meta.dev() as u32,
            meta.ino() as u32,
            0o100644,
            0,
            0,
            meta.size() as u32,
        ] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf.extend_from_slice(oid.as_bytes());
        buf.extend_from_slice(&(5u16).to_be_bytes());
        buf.extend_from_slice(b"f.txt");
        buf.push(0);
        while (buf.len() - start) % 8 != 0 {
            buf.push(0);
        }
        let mut hasher = sha1::Sha1::new();
        hasher.update(&buf);
        let digest: [u8; 20] = hasher.finalize().into();
        buf.extend_from_slice(&digest);

        IndexSnapshot::parse(&buf, None, false).unwrap().entries()[0]
    }

    #[test]
    fn deleted_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"hello").unwrap();
        let meta = fs::symlink_metadata(&path).unwrap();
        let entry = entry_for(&meta, hash_blob(b"hello"));

        assert_eq!(
            classify_stat(&entry, None, (u32::MAX, 0), true),
            Verdict::Deleted
        );
    }

    #[test]
    fn size_change_is_dirty_without_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"hello").unwrap();
        let meta = fs::symlink_metadata(&path).unwrap();
        let entry = entry_for(&meta, hash_blob(b"hello"));

        fs::write(&path, b"hello world").unwrap();
        let newer = fs::symlink_metadata(&path).unwrap();
        assert_eq!(
            classify_stat(&entry, Some(&newer), (u32::MAX, 0), true),
            Verdict::Dirty
        );
    }

    #[test]
    fn matching_stat_is_unchanged_when_not_racy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"hello").unwrap();
        let meta = fs::symlink_metadata(&path).unwrap();
        let entry = entry_for(&meta, hash_blob(b"hello"));

        // Index written far in the future relative to the entry.
        assert_eq!(
            classify_stat(&entry, Some(&meta), (u32::MAX, 0), true),
            Verdict::Unchanged
        );
        // Index written at the same instant: racy, must verify content.
        assert_eq!(
            classify_stat(
                &entry,
                Some(&meta),
                (meta.mtime() as u32, meta.mtime_nsec() as u32),
                true
            ),
            Verdict::MaybeDirty
        );
    }

    #[test]
    fn crlf_stripping_only_touches_pairs() {
        assert_eq!(strip_crlf(b"a\r\nb\rc\n"), b"a\nb\rc\n");
        assert_eq!(strip_crlf(b"no breaks"), b"no breaks");
        assert_eq!(strip_crlf(b"\r\n\r\n"), b"\n\n");
    }

    #[test]
    fn blob_hash_matches_git() {
        // `echo -n 'hello' | git hash-object --stdin`
        assert_eq!(
            format!("{}", hash_blob(b"hello")),
            "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0"
        );
        // Empty blob, a constant everyone knows.
        assert_eq!(
            format!("{}", hash_blob(b"")),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn binary_probe() {
        assert!(looks_like_text(b"plain text\n"));
        assert!(!looks_like_text(b"bin\0ary"));
    }
}
