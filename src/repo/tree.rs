//! Tree object iteration and range-restricted head-tree walks.
//!
//! Tree entries are stored as `<octal mode> <name>\0<20-byte oid>` and are
//! sorted by git's tree order, where a subtree named `d` sorts as `d/`.
//! A depth-first in-order walk therefore emits full paths in exactly the
//! byte-wise order the index uses, which is what lets the staged pass merge
//! a tree walk against an index range in lockstep.
//!
//! [`TreeCursor`] walks the subtrees intersecting a `[lo, hi)` path range
//! and skips everything else without loading it, so partitioned workers
//! each read only their slice of the tree.

use crate::errors::OdbError;
use crate::repo::odb::{ObjectKind, Odb};
use crate::repo::oid::ObjectId;

/// Tree mode for subtree entries.
const MODE_TREE: u32 = 0o040000;

/// A single parsed tree entry.
#[derive(Clone, Copy, Debug)]
pub struct TreeEntryRef<'a> {
    pub mode: u32,
    pub name: &'a [u8],
    pub oid: ObjectId,
    /// Total encoded length of this entry.
    pub consumed: usize,
}

/// Parses the entry at the start of `data`.
pub fn parse_tree_entry(data: &[u8]) -> Result<TreeEntryRef<'_>, OdbError> {
    let space = memchr::memchr(b' ', data).ok_or(CORRUPT)?;
    let mut mode = 0u32;
    if space == 0 || space > 7 {
        return Err(CORRUPT);
    }
    for &byte in &data[..space] {
        if !(b'0'..=b'7').contains(&byte) {
            return Err(CORRUPT);
        }
        mode = (mode << 3) | (byte - b'0') as u32;
    }

    let rest = &data[space + 1..];
    let nul = memchr::memchr(0, rest).ok_or(CORRUPT)?;
    let name = &rest[..nul];
    if name.is_empty() {
        return Err(CORRUPT);
    }
    let oid_start = space + 1 + nul + 1;
    let oid = data
        .get(oid_start..oid_start + ObjectId::LEN)
        .and_then(ObjectId::try_from_slice)
        .ok_or(CORRUPT)?;

    Ok(TreeEntryRef {
        mode,
        name,
        oid,
        consumed: oid_start + ObjectId::LEN,
    })
}

const CORRUPT: OdbError = OdbError::CorruptObject {
    detail: "malformed tree entry",
};

#[inline]
#[must_use]
pub fn is_tree_mode(mode: u32) -> bool {
    mode & 0o170000 == MODE_TREE
}

struct Frame {
    data: Vec<u8>,
    pos: usize,
    /// Length of the cursor's path buffer holding this frame's directory
    /// prefix (including the trailing `/`).
    base_len: usize,
}

/// Ordered cursor over the non-tree entries of a head tree, restricted to
/// full paths in `[lo, hi)`.
///
/// Subtrees wholly outside the range are never loaded. Entries are yielded
/// in ascending full-path order; `hi = None` means unbounded.
pub struct TreeCursor<'a> {
    odb: &'a Odb,
    stack: Vec<Frame>,
    path: Vec<u8>,
    lo: Vec<u8>,
    hi: Option<Vec<u8>>,
    mode: u32,
    oid: ObjectId,
}

impl<'a> TreeCursor<'a> {
    /// Creates a cursor over `root` (pass `None` for the empty pseudo-tree
    /// of an unborn head).
    pub fn new(
        odb: &'a Odb,
        root: Option<ObjectId>,
        lo: &[u8],
        hi: Option<&[u8]>,
    ) -> Result<Self, OdbError> {
        let mut stack = Vec::new();
        if let Some(root) = root {
            let data = odb.read_kind(&root, ObjectKind::Tree)?;
            stack.push(Frame {
                data,
                pos: 0,
                base_len: 0,
            });
        }
        Ok(Self {
            odb,
            stack,
            path: Vec::with_capacity(256),
            lo: lo.to_vec(),
            hi: hi.map(<[u8]>::to_vec),
            mode: 0,
            oid: ObjectId::default(),
        })
    }

    /// Full path of the current entry (valid after `advance` returned true).
    #[inline]
    #[must_use]
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> u32 {
        self.mode
    }

    #[inline]
    #[must_use]
    pub fn oid(&self) -> ObjectId {
        self.oid
    }

    /// Moves to the next in-range entry. Returns `false` when exhausted.
    pub fn advance(&mut self) -> Result<bool, OdbError> {
        loop {
            let mut frame = match self.stack.pop() {
                Some(frame) => frame,
                None => return Ok(false),
            };

            if frame.pos >= frame.data.len() {
                // Parent's next entry re-truncates the path itself.
                continue;
            }

            let (mode, oid) = {
                let entry = parse_tree_entry(&frame.data[frame.pos..])?;
                self.path.truncate(frame.base_len);
                self.path.extend_from_slice(entry.name);
                frame.pos += entry.consumed;
                (entry.mode, entry.oid)
            };

            if is_tree_mode(mode) {
                self.path.push(b'/');
                // The walk emits ascending paths: once a subtree prefix is
                // at or past `hi`, nothing later can be in range.
                if let Some(hi) = &self.hi {
                    if self.path >= *hi {
                        self.stack.clear();
                        return Ok(false);
                    }
                }
                if self.subtree_may_intersect_lo() {
                    let data = self.odb.read_kind(&oid, ObjectKind::Tree)?;
                    let base_len = self.path.len();
                    self.stack.push(frame);
                    self.stack.push(Frame {
                        data,
                        pos: 0,
                        base_len,
                    });
                } else {
                    self.stack.push(frame);
                }
                continue;
            }

            if let Some(hi) = &self.hi {
                if self.path >= *hi {
                    self.stack.clear();
                    return Ok(false);
                }
            }
            self.stack.push(frame);
            if self.path[..] < self.lo[..] {
                continue;
            }
            self.mode = mode;
            self.oid = oid;
            return Ok(true);
        }
    }

    /// True when the subtree whose prefix is currently in `self.path`
    /// can contain a path `>= lo`.
    fn subtree_may_intersect_lo(&self) -> bool {
        self.path[..] >= self.lo[..] || self.lo.starts_with(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entry_fields() {
        let mut data = Vec::new();
        data.extend_from_slice(b"100644 file.txt\0");
        data.extend_from_slice(&[0x5a; 20]);
        data.extend_from_slice(b"40000 sub\0");
        data.extend_from_slice(&[0x5b; 20]);

        let first = parse_tree_entry(&data).unwrap();
        assert_eq!(first.mode, 0o100644);
        assert_eq!(first.name, b"file.txt");
        assert!(!is_tree_mode(first.mode));

        let second = parse_tree_entry(&data[first.consumed..]).unwrap();
        assert_eq!(second.mode, 0o040000);
        assert_eq!(second.name, b"sub");
        assert!(is_tree_mode(second.mode));
        assert_eq!(first.consumed + second.consumed, data.len());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_tree_entry(b"").is_err());
        assert!(parse_tree_entry(b"100644 name-without-nul").is_err());
        assert!(parse_tree_entry(b"10x644 f\0aaaaaaaaaaaaaaaaaaaa").is_err());
        // NUL present but oid truncated.
        let mut data = Vec::new();
        data.extend_from_slice(b"100644 f\0");
        data.extend_from_slice(&[0xcc; 7]);
        assert!(parse_tree_entry(&data).is_err());
    }
}
