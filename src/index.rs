//! Index snapshot: the parsed on-disk index.
//!
//! The index file is read into a private buffer (never mapped) so that a
//! concurrent rewrite by another git process cannot change bytes under the
//! parser; structural validation catches the torn-write case where the file
//! was replaced mid-read. On any inconsistency the parser returns an error
//! and the request fails for that repository.
//!
//! Versions 2, 3 and 4 are supported, including version 4 prefix-compressed
//! paths. Extensions are skipped. Checksum verification over the index tail
//! is available but disabled by default for latency.
//!
//! # Invariants
//! - Entries are strictly ordered by (path, stage); the parser rejects
//!   anything else.
//! - Stage-0 and stage>0 entries for the same path never coexist in a valid
//!   index; the ordering check makes duplicates impossible, and the differ
//!   treats any stage>0 group as conflicted regardless.
//! - The snapshot is immutable after parsing and shared read-only across
//!   workers.

use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::errors::IndexError;
use crate::repo::oid::ObjectId;

const SIGNATURE: &[u8; 4] = b"DIRC";
const HEADER_LEN: usize = 12;
const CHECKSUM_LEN: usize = 20;
/// Fixed portion of an entry before the path: 10 u32 stat fields, the
/// object id and the 16-bit flags word.
const ENTRY_FIXED_LEN: usize = 62;

const FLAG_ASSUME_VALID: u16 = 0x8000;
const FLAG_EXTENDED: u16 = 0x4000;
const FLAG_NAME_MASK: u16 = 0x0fff;

const EXT_FLAG_SKIP_WORKTREE: u16 = 0x4000;
const EXT_FLAG_INTENT_TO_ADD: u16 = 0x2000;

/// Change detector for the on-disk index file (mtime + size).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexFingerprint {
    pub mtime_s: i64,
    pub mtime_ns: i64,
    pub size: u64,
}

impl IndexFingerprint {
    #[must_use]
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            mtime_s: meta.mtime(),
            mtime_ns: meta.mtime_nsec(),
            size: meta.size(),
        }
    }
}

/// Entry flag bits kept in the snapshot (compact form of the on-disk bits).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryFlags(u8);

impl EntryFlags {
    const ASSUME_UNCHANGED: u8 = 1 << 0;
    const SKIP_WORKTREE: u8 = 1 << 1;
    const INTENT_TO_ADD: u8 = 1 << 2;

    #[inline]
    #[must_use]
    pub const fn assume_unchanged(self) -> bool {
        self.0 & Self::ASSUME_UNCHANGED != 0
    }

    #[inline]
    #[must_use]
    pub const fn skip_worktree(self) -> bool {
        self.0 & Self::SKIP_WORKTREE != 0
    }

    #[inline]
    #[must_use]
    pub const fn intent_to_add(self) -> bool {
        self.0 & Self::INTENT_TO_ADD != 0
    }
}

/// Mode class of an index or tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeClass {
    Regular,
    Symlink,
    Gitlink,
    Directory,
    Unknown,
}

/// Classifies a git mode word (`0o100644`, `0o120000`, ...).
#[inline]
#[must_use]
pub fn mode_class(mode: u32) -> ModeClass {
    match mode >> 12 {
        0o10 => ModeClass::Regular,
        0o12 => ModeClass::Symlink,
        0o16 => ModeClass::Gitlink,
        0o04 => ModeClass::Directory,
        _ => ModeClass::Unknown,
    }
}

/// Returns true when the mode's executable bit is set.
#[inline]
#[must_use]
pub fn mode_is_executable(mode: u32) -> bool {
    mode & 0o111 != 0
}

/// One index entry. Paths live in the snapshot's arena.
#[derive(Clone, Copy, Debug)]
pub struct IndexEntry {
    pub ctime_s: u32,
    pub ctime_ns: u32,
    pub mtime_s: u32,
    pub mtime_ns: u32,
    pub dev: u32,
    pub ino: u32,
    pub mode: u32,
    pub size: u32,
    pub oid: ObjectId,
    pub stage: u8,
    pub flags: EntryFlags,
    path_off: u32,
    path_len: u32,
}

/// Immutable snapshot of the parsed index.
pub struct IndexSnapshot {
    version: u32,
    entries: Vec<IndexEntry>,
    paths: Vec<u8>,
    fingerprint: Option<IndexFingerprint>,
    /// Index file mtime truncated to the 32-bit on-disk resolution, for the
    /// racy-timestamp smudge in the dirty predicate.
    mtime_s: u32,
    mtime_ns: u32,
}

impl IndexSnapshot {
    /// An empty snapshot, used when the repository has no index file yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 2,
            entries: Vec::new(),
            paths: Vec::new(),
            fingerprint: None,
            mtime_s: 0,
            mtime_ns: 0,
        }
    }

    /// Reads and parses the index at `path`.
    ///
    /// A missing file is not an error: fresh repositories have no index, so
    /// this returns the empty snapshot.
    pub fn load(path: &Path, verify_checksum: bool) -> Result<Self, IndexError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(err) => return Err(err.into()),
        };
        let meta = file.metadata()?;
        let mut data = Vec::with_capacity(meta.size() as usize);
        file.read_to_end(&mut data)?;

        let fingerprint = IndexFingerprint::from_metadata(&meta);
        Self::parse(&data, Some(fingerprint), verify_checksum)
    }

    /// Parses an index image from memory.
    pub fn parse(
        data: &[u8],
        fingerprint: Option<IndexFingerprint>,
        verify_checksum: bool,
    ) -> Result<Self, IndexError> {
        if data.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(IndexError::TooSmall { len: data.len() });
        }
        if &data[..4] != SIGNATURE {
            return Err(IndexError::BadSignature);
        }
        let version = be_u32(data, 4)?;
        if !(2..=4).contains(&version) {
            return Err(IndexError::UnsupportedVersion { version });
        }
        let count = be_u32(data, 8)? as usize;

        if verify_checksum {
            let body = &data[..data.len() - CHECKSUM_LEN];
            let tail = &data[data.len() - CHECKSUM_LEN..];
            let mut hasher = Sha1::new();
            hasher.update(body);
            let digest: [u8; 20] = hasher.finalize().into();
            if digest[..] != tail[..] {
                return Err(IndexError::ChecksumMismatch);
            }
        }

        let mut entries = Vec::with_capacity(count);
        let mut paths = Vec::new();
        let mut prev_path: Vec<u8> = Vec::new();
        let end = data.len() - CHECKSUM_LEN;
        let mut pos = HEADER_LEN;

        for _ in 0..count {
            pos = parse_entry(data, pos, end, version, &mut entries, &mut paths, &mut prev_path)?;
        }

        // Ordering validates structural consistency: a torn or interleaved
        // write cannot produce a strictly (path, stage)-ordered image.
        for pair in entries.windows(2) {
            let a = (&paths[range(&pair[0])], pair[0].stage);
            let b = (&paths[range(&pair[1])], pair[1].stage);
            if a >= b {
                return Err(IndexError::Unordered);
            }
        }

        // Extensions follow the entries; validate framing, skip content.
        while pos < end {
            if pos + 8 > end {
                return Err(IndexError::MalformedExtension);
            }
            let size = be_u32(data, pos + 4)? as usize;
            pos = pos
                .checked_add(8 + size)
                .filter(|&p| p <= end)
                .ok_or(IndexError::MalformedExtension)?;
        }

        let (mtime_s, mtime_ns) = match fingerprint {
            Some(fp) => (fp.mtime_s as u32, fp.mtime_ns as u32),
            None => (0, 0),
        };

        Ok(Self {
            version,
            entries,
            paths,
            fingerprint,
            mtime_s,
            mtime_ns,
        })
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
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

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Path bytes for an entry of this snapshot.
    #[inline]
    #[must_use]
    pub fn path(&self, entry: &IndexEntry) -> &[u8] {
        &self.paths[range(entry)]
    }

    /// Fingerprint of the file this snapshot was parsed from, if any.
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> Option<IndexFingerprint> {
        self.fingerprint
    }

    /// Index file mtime at the on-disk 32-bit resolution.
    #[inline]
    #[must_use]
    pub fn file_mtime(&self) -> (u32, u32) {
        (self.mtime_s, self.mtime_ns)
    }

    /// Finds the first entry (lowest stage) with exactly this path.
    #[must_use]
    pub fn find(&self, path: &[u8]) -> Option<usize> {
        let idx = self.lower_bound(path);
        let entry = self.entries.get(idx)?;
        if self.path(entry) == path {
            Some(idx)
        } else {
            None
        }
    }

    /// True when any entry path starts with `prefix`.
    #[must_use]
    pub fn contains_prefix(&self, prefix: &[u8]) -> bool {
        let idx = self.lower_bound(prefix);
        match self.entries.get(idx) {
            Some(entry) => self.path(entry).starts_with(prefix),
            None => false,
        }
    }

    /// First position whose path is `>= path`.
    #[must_use]
    pub fn lower_bound(&self, path: &[u8]) -> usize {
        self.entries
            .partition_point(|entry| &self.paths[range(entry)][..] < path)
    }
}

#[inline]
fn range(entry: &IndexEntry) -> std::ops::Range<usize> {
    let start = entry.path_off as usize;
    start..start + entry.path_len as usize
}

#[inline]
fn be_u32(data: &[u8], off: usize) -> Result<u32, IndexError> {
    let bytes: [u8; 4] = data
        .get(off..off + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(IndexError::Truncated)?;
    Ok(u32::from_be_bytes(bytes))
}

#[inline]
fn be_u16(data: &[u8], off: usize) -> Result<u16, IndexError> {
    let bytes: [u8; 2] = data
        .get(off..off + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or(IndexError::Truncated)?;
    Ok(u16::from_be_bytes(bytes))
}

#[allow(clippy::too_many_arguments)]
fn parse_entry(
    data: &[u8],
    start: usize,
    end: usize,
    version: u32,
    entries: &mut Vec<IndexEntry>,
    paths: &mut Vec<u8>,
    prev_path: &mut Vec<u8>,
) -> Result<usize, IndexError> {
    if start + ENTRY_FIXED_LEN > end {
        return Err(IndexError::Truncated);
    }

    let ctime_s = be_u32(data, start)?;
    let ctime_ns = be_u32(data, start + 4)?;
    let mtime_s = be_u32(data, start + 8)?;
    let mtime_ns = be_u32(data, start + 12)?;
    let dev = be_u32(data, start + 16)?;
    let ino = be_u32(data, start + 20)?;
    let mode = be_u32(data, start + 24)?;
    // uid (start+28) and gid (start+32) are not part of the dirty
    // predicate and are not retained.
    let size = be_u32(data, start + 36)?;
    let oid = ObjectId::try_from_slice(&data[start + 40..start + 60]).ok_or(IndexError::Truncated)?;
    let flags16 = be_u16(data, start + 60)?;

    let stage = ((flags16 >> 12) & 0x3) as u8;
    let mut flag_bits = 0u8;
    if flags16 & FLAG_ASSUME_VALID != 0 {
        flag_bits |= EntryFlags::ASSUME_UNCHANGED;
    }

    let mut pos = start + ENTRY_FIXED_LEN;
    if flags16 & FLAG_EXTENDED != 0 {
        if version < 3 {
            return Err(IndexError::MalformedPath);
        }
        let ext = be_u16(data, pos)?;
        if ext & EXT_FLAG_SKIP_WORKTREE != 0 {
            flag_bits |= EntryFlags::SKIP_WORKTREE;
        }
        if ext & EXT_FLAG_INTENT_TO_ADD != 0 {
            flag_bits |= EntryFlags::INTENT_TO_ADD;
        }
        pos += 2;
    }
    if pos > end {
        return Err(IndexError::Truncated);
    }

    let name_len_hint = (flags16 & FLAG_NAME_MASK) as usize;
    let path_off = paths.len() as u32;
    let path_len;

    if version == 4 {
        // Prefix compression: strip N bytes from the previous path, then
        // append the NUL-terminated suffix.
        let (strip, varint_len) = decode_offset_varint(&data[pos..end])?;
        pos += varint_len;
        let keep = prev_path
            .len()
            .checked_sub(strip)
            .ok_or(IndexError::MalformedPath)?;
        prev_path.truncate(keep);

        let rest = &data[pos..end];
        let nul = memchr::memchr(0, rest).ok_or(IndexError::MalformedPath)?;
        prev_path.extend_from_slice(&rest[..nul]);
        pos += nul + 1;

        paths.extend_from_slice(prev_path);
        path_len = prev_path.len() as u32;
    } else {
        let rest = &data[pos..end];
        let nul = if name_len_hint < FLAG_NAME_MASK as usize {
            match rest.get(name_len_hint) {
                Some(0) => name_len_hint,
                _ => return Err(IndexError::MalformedPath),
            }
        } else {
            memchr::memchr(0, rest).ok_or(IndexError::MalformedPath)?
        };
        paths.extend_from_slice(&rest[..nul]);
        path_len = nul as u32;

        // Entries are padded with NULs to an 8-byte boundary measured from
        // the entry start.
        let entry_len = pos - start + nul + 1;
        let padded = (entry_len + 7) & !7;
        pos = start
            .checked_add(padded)
            .filter(|&p| p <= end)
            .ok_or(IndexError::Truncated)?;
    }

    if path_len == 0 {
        return Err(IndexError::MalformedPath);
    }

    entries.push(IndexEntry {
        ctime_s,
        ctime_ns,
        mtime_s,
        mtime_ns,
        dev,
        ino,
        mode,
        size,
        oid,
        stage,
        flags: EntryFlags(flag_bits),
        path_off,
        path_len,
    });

    Ok(pos)
}

/// Decodes git's "offset" varint (big-endian 7-bit groups with an implicit
/// +1 per continuation), returning (value, encoded length).
fn decode_offset_varint(data: &[u8]) -> Result<(usize, usize), IndexError> {
    let mut pos = 0usize;
    let mut byte = *data.get(pos).ok_or(IndexError::MalformedPath)?;
    let mut value = (byte & 0x7f) as usize;
    while byte & 0x80 != 0 {
        pos += 1;
        byte = *data.get(pos).ok_or(IndexError::MalformedPath)?;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_shl(7))
            .ok_or(IndexError::MalformedPath)?
            | (byte & 0x7f) as usize;
    }
    Ok((value, pos + 1))
}
