//! Commit parsing and the bounded ahead/behind walk.
//!
//! The walk mirrors git's paint-down-to-common: two tips are pushed into a
//! single frontier ordered by committer date, each commit is flagged with
//! the side(s) it is reachable from, and flags propagate to parents. A
//! commit popped with exactly one flag is ahead of (or behind) the other
//! side; a commit carrying both flags is a common ancestor and stops
//! propagation of counting below it.
//!
//! # Correctness contract
//! - With monotone committer dates the counts equal `git rev-list --count`
//!   over `upstream..HEAD` and `HEAD..upstream`.
//! - Skewed clocks can surface a common ancestor late; the walk stays
//!   deterministic (ties break on object id) and never undercounts a side
//!   below what the bound permits.
//! - The walk examines at most `max_commits` commits and returns whatever
//!   was counted when the bound hits.
//! - Parents missing from the object store (shallow clones) terminate the
//!   walk on that edge, matching how status tools treat shallow history.

use std::collections::BinaryHeap;

use ahash::AHashMap;

use crate::errors::OdbError;
use crate::repo::odb::{ObjectKind, Odb};
use crate::repo::oid::ObjectId;

const FLAG_LOCAL: u8 = 1 << 0;
const FLAG_UPSTREAM: u8 = 1 << 1;
const FLAG_BOTH: u8 = FLAG_LOCAL | FLAG_UPSTREAM;

/// Parsed commit fields the daemon needs.
#[derive(Clone, Debug)]
pub struct CommitMeta {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    /// Committer timestamp (seconds since epoch).
    pub time: i64,
}

/// Reads and parses a commit object.
pub fn read_commit(odb: &Odb, oid: &ObjectId) -> Result<CommitMeta, OdbError> {
    let data = odb.read_kind(oid, ObjectKind::Commit)?;
    parse_commit(&data)
}

/// Parses a commit buffer (header lines up to the first blank line).
pub fn parse_commit(data: &[u8]) -> Result<CommitMeta, OdbError> {
    const CORRUPT: OdbError = OdbError::CorruptObject {
        detail: "malformed commit",
    };

    let mut tree = None;
    let mut parents = Vec::new();
    let mut time = 0i64;

    for line in data.split(|&b| b == b'\n') {
        if line.is_empty() {
            break; // message follows
        }
        if let Some(rest) = line.strip_prefix(b"tree ") {
            tree = ObjectId::from_hex(rest);
        } else if let Some(rest) = line.strip_prefix(b"parent ") {
            parents.push(ObjectId::from_hex(rest).ok_or(CORRUPT)?);
        } else if let Some(rest) = line.strip_prefix(b"committer ") {
            time = parse_ident_time(rest).ok_or(CORRUPT)?;
        }
    }

    Ok(CommitMeta {
        tree: tree.ok_or(CORRUPT)?,
        parents,
        time,
    })
}

/// Extracts the epoch seconds from `Name <email> <epoch> <zone>`.
fn parse_ident_time(ident: &[u8]) -> Option<i64> {
    let close = memchr::memrchr(b'>', ident)?;
    let rest = ident.get(close + 1..)?;
    let mut fields = rest.split(|&b| b == b' ').filter(|f| !f.is_empty());
    let epoch = fields.next()?;
    std::str::from_utf8(epoch).ok()?.parse().ok()
}

#[derive(Default)]
struct NodeState {
    flags: u8,
    in_heap: bool,
    counted: bool,
    time: i64,
    parents: Vec<ObjectId>,
}

#[derive(PartialEq, Eq)]
struct HeapItem {
    time: i64,
    oid: ObjectId,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on (time, oid): newest first, deterministic ties.
        self.time
            .cmp(&other.time)
            .then_with(|| self.oid.cmp(&other.oid))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Counts commits reachable from exactly one of `local` / `upstream`.
///
/// Returns `(ahead, behind)` where `ahead` counts commits only on the local
/// side. At most `max_commits` commits are examined.
pub fn ahead_behind(
    odb: &Odb,
    local: ObjectId,
    upstream: ObjectId,
    max_commits: usize,
) -> Result<(usize, usize), OdbError> {
    if local == upstream {
        return Ok((0, 0));
    }

    let mut nodes: AHashMap<ObjectId, NodeState> = AHashMap::new();
    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::new();
    // Heap entries still carrying a single-side flag; once none remain,
    // everything below is common history.
    let mut interesting = 0usize;

    let mut discover = |oid: ObjectId,
                        flag: u8,
                        nodes: &mut AHashMap<ObjectId, NodeState>,
                        heap: &mut BinaryHeap<HeapItem>,
                        interesting: &mut usize|
     -> Result<(), OdbError> {
        if let Some(state) = nodes.get_mut(&oid) {
            let old = state.flags;
            let new = old | flag;
            if new == old {
                return Ok(());
            }
            state.flags = new;
            if state.in_heap && old != FLAG_BOTH && new == FLAG_BOTH {
                *interesting -= 1;
            }
            if !state.in_heap && !state.counted && new == FLAG_BOTH {
                // A counted node later found to be common must still push
                // the BOTH flag down, so it re-enters the frontier.
                state.in_heap = true;
                let time = state.time;
                heap.push(HeapItem { time, oid });
            }
            return Ok(());
        }

        let meta = match read_commit(odb, &oid) {
            Ok(meta) => meta,
            // Shallow boundary: treat the missing parent as history's end.
            Err(OdbError::NotFound) => return Ok(()),
            Err(err) => return Err(err),
        };
        nodes.insert(
            oid,
            NodeState {
                flags: flag,
                in_heap: true,
                counted: false,
                time: meta.time,
                parents: meta.parents,
            },
        );
        heap.push(HeapItem {
            time: meta.time,
            oid,
        });
        if flag != FLAG_BOTH {
            *interesting += 1;
        }
        Ok(())
    };

    discover(local, FLAG_LOCAL, &mut nodes, &mut heap, &mut interesting)?;
    discover(
        upstream,
        FLAG_UPSTREAM,
        &mut nodes,
        &mut heap,
        &mut interesting,
    )?;

    let mut ahead = 0usize;
    let mut behind = 0usize;
    let mut examined = 0usize;

    while interesting > 0 && examined < max_commits {
        let Some(item) = heap.pop() else {
            break;
        };
        examined += 1;

        let (flags, parents) = {
            let state = nodes.get_mut(&item.oid).expect("heap item has state");
            state.in_heap = false;
            if state.flags != FLAG_BOTH {
                interesting -= 1;
                if !state.counted {
                    state.counted = true;
                    if state.flags == FLAG_LOCAL {
                        ahead += 1;
                    } else {
                        behind += 1;
                    }
                }
            }
            (state.flags, std::mem::take(&mut state.parents))
        };

        for parent in &parents {
            discover(*parent, flags, &mut nodes, &mut heap, &mut interesting)?;
        }
        // Parents are kept in case this node re-enters the frontier after
        // a flag upgrade.
        nodes
            .get_mut(&item.oid)
            .expect("heap item has state")
            .parents = parents;
    }

    Ok((ahead, behind))
}
