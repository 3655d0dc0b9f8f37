//! Index differ: bounded staged/unstaged/conflicted/untracked counts.
//!
//! One request fans out across the worker pool in three concurrent passes:
//!
//! - **Staged** walks the head tree and the stage-0 index entries in
//!   lockstep, partitioned into contiguous path ranges. Each partition's
//!   tree cursor loads only the subtrees intersecting its range.
//! - **Unstaged/conflicted** partitions the index the same way; stage-0
//!   entries go through the dirty predicate, stage>0 groups count one
//!   conflicted path each.
//! - **Untracked** recursively walks the working directory (see
//!   [`untracked`]).
//!
//! Partition cuts depend only on the index contents (fixed chunk size,
//! aligned to path-group boundaries), never on the worker count, and every
//! counter saturates through a shared capped atomic. Together these make
//! the response bytes identical across `num_threads` settings.

pub mod counter;
pub mod dirty;
pub mod untracked;

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::errors::ScanError;
use crate::index::IndexSnapshot;
use crate::limits::StatusLimits;
use crate::oracle::{AttrLookup, AttrOracle, IgnoreOracle};
use crate::pool::{Batch, WorkerPool};
use crate::repo::oid::ObjectId;
use crate::repo::tree::TreeCursor;
use crate::repo::Repo;
use counter::CappedCounter;
use dirty::Verdict;

/// Entries per partition before alignment; fixed so that partitioning is
/// independent of the worker count.
const PARTITION_CHUNK: usize = 2048;

/// First-error slot shared by all tasks of a request.
#[derive(Default)]
pub struct ErrorSlot {
    slot: Mutex<Option<ScanError>>,
}

impl ErrorSlot {
    /// Records the first error; later ones are dropped.
    pub fn record(&self, err: ScanError) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert(err);
    }

    /// True once any task has failed (used as an abort signal).
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn take(&self) -> Option<ScanError> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Inputs of one diff computation.
pub struct DiffRequest {
    pub repo: Arc<Repo>,
    pub snapshot: Arc<IndexSnapshot>,
    /// Root tree of the head commit; `None` for an unborn head.
    pub head_tree: Option<ObjectId>,
    pub limits: StatusLimits,
    pub recurse_ignored: bool,
    pub use_global_excludes: bool,
}

/// Bounded counts produced by one diff computation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffCounts {
    pub index_size: usize,
    pub staged: usize,
    pub unstaged: usize,
    pub conflicted: usize,
    pub untracked: usize,
}

/// Runs all passes and joins them.
pub fn run_diff(pool: &Arc<WorkerPool>, req: &DiffRequest) -> Result<DiffCounts, ScanError> {
    let snapshot = &req.snapshot;
    let index_size = snapshot.len();

    let staged = Arc::new(CappedCounter::new(req.limits.max_staged));
    let unstaged = Arc::new(CappedCounter::new(req.limits.max_unstaged));
    let conflicted = Arc::new(CappedCounter::new(req.limits.max_conflicted));
    let untracked = Arc::new(CappedCounter::new(req.limits.max_untracked));
    let errors = Arc::new(ErrorSlot::default());
    let batch = Batch::new();

    let ranges = partition_ranges(snapshot, PARTITION_CHUNK);

    // The escape hatch for pathological indexes: staged still runs (it is
    // bounded by the head walk), the worktree-facing passes are skipped.
    let worktree_passes = index_size <= req.limits.max_index_size;

    spawn_staged_pass(pool, &batch, req, &ranges, &staged, &errors);

    if worktree_passes {
        spawn_index_pass(pool, &batch, req, &ranges, &unstaged, &conflicted, &errors);

        let oracle = Arc::new(IgnoreOracle::new(&req.repo, req.use_global_excludes));
        let scan = Arc::new(untracked::UntrackedScan {
            pool: Arc::clone(pool),
            batch: batch.clone(),
            snapshot: Arc::clone(snapshot),
            counter: Arc::clone(&untracked),
            errors: Arc::clone(&errors),
            recurse_ignored: req.recurse_ignored,
        });
        untracked::start(scan, &oracle);
    }

    batch.join(pool).map_err(|_| ScanError::WorkerPanic)?;
    if let Some(err) = errors.take() {
        return Err(err);
    }

    Ok(DiffCounts {
        index_size,
        staged: staged.get(),
        unstaged: if worktree_passes { unstaged.get() } else { 0 },
        conflicted: if worktree_passes { conflicted.get() } else { 0 },
        untracked: if worktree_passes { untracked.get() } else { 0 },
    })
}

/// Splits the index into contiguous entry ranges, each aligned so that all
/// stages of a path land in the same range. An empty index yields one
/// empty range so the staged pass still sees tree-only paths.
fn partition_ranges(snapshot: &IndexSnapshot, chunk: usize) -> Vec<(usize, usize)> {
    let len = snapshot.len();
    if len == 0 {
        return vec![(0, 0)];
    }
    let entries = snapshot.entries();
    let mut ranges = Vec::with_capacity(len / chunk + 1);
    let mut start = 0usize;
    while start < len {
        let mut end = (start + chunk).min(len);
        while end < len && snapshot.path(&entries[end]) == snapshot.path(&entries[end - 1]) {
            end += 1;
        }
        ranges.push((start, end));
        start = end;
    }
    ranges
}

/// Path bounds `[lo, hi)` of a partition: the first entry's path, and the
/// next partition's first path (`None` for the last partition). The first
/// partition is unbounded below so tree-only paths before the first index
/// entry are seen.
fn partition_bounds(
    snapshot: &IndexSnapshot,
    ranges: &[(usize, usize)],
    idx: usize,
) -> (Vec<u8>, Option<Vec<u8>>) {
    let entries = snapshot.entries();
    let lo = if idx == 0 {
        Vec::new()
    } else {
        snapshot.path(&entries[ranges[idx].0]).to_vec()
    };
    let hi = ranges
        .get(idx + 1)
        .map(|&(start, _)| snapshot.path(&entries[start]).to_vec());
    (lo, hi)
}

fn spawn_staged_pass(
    pool: &Arc<WorkerPool>,
    batch: &Batch,
    req: &DiffRequest,
    ranges: &[(usize, usize)],
    staged: &Arc<CappedCounter>,
    errors: &Arc<ErrorSlot>,
) {
    for idx in 0..ranges.len() {
        let (lo, hi) = partition_bounds(&req.snapshot, ranges, idx);
        let range = ranges[idx];
        let repo = Arc::clone(&req.repo);
        let snapshot = Arc::clone(&req.snapshot);
        let head_tree = req.head_tree;
        let staged = Arc::clone(staged);
        let errors = Arc::clone(errors);
        pool.spawn_in(batch, move || {
            if let Err(err) =
                staged_partition(&repo, &snapshot, head_tree, &lo, hi.as_deref(), range, &staged)
            {
                errors.record(err);
            }
        });
    }
}

/// Lockstep merge of one partition's tree range against its index range.
fn staged_partition(
    repo: &Repo,
    snapshot: &IndexSnapshot,
    head_tree: Option<ObjectId>,
    lo: &[u8],
    hi: Option<&[u8]>,
    (start, end): (usize, usize),
    staged: &CappedCounter,
) -> Result<(), ScanError> {
    let entries = snapshot.entries();
    let mut cursor = TreeCursor::new(repo.odb(), head_tree, lo, hi)?;
    let mut tree_live = cursor.advance()?;
    let mut i = start;

    while !staged.is_full() {
        if i >= end && !tree_live {
            break;
        }

        // Index side: the group of all stages of one path.
        let group = if i < end {
            let path = snapshot.path(&entries[i]);
            let mut j = i + 1;
            while j < end && snapshot.path(&entries[j]) == path {
                j += 1;
            }
            let stage0 = entries[i..j].iter().find(|e| e.stage == 0);
            let conflicted = entries[i..j].iter().any(|e| e.stage != 0);
            Some((path, j, stage0, conflicted))
        } else {
            None
        };

        match (tree_live, group) {
            (true, Some((path, j, stage0, conflicted))) => {
                match cursor.path().cmp(path) {
                    std::cmp::Ordering::Less => {
                        // In head only: deletion staged.
                        staged.add(1);
                        tree_live = cursor.advance()?;
                    }
                    std::cmp::Ordering::Greater => {
                        if !conflicted && stage0.is_some() {
                            staged.add(1); // in index only: addition staged
                        }
                        i = j;
                    }
                    std::cmp::Ordering::Equal => {
                        if !conflicted {
                            if let Some(entry) = stage0 {
                                if entry.oid != cursor.oid() || entry.mode != cursor.mode() {
                                    staged.add(1);
                                }
                            }
                        }
                        // Conflicted paths are accounted by the conflict
                        // pass, not as staged changes.
                        tree_live = cursor.advance()?;
                        i = j;
                    }
                }
            }
            (true, None) => {
                staged.add(1);
                tree_live = cursor.advance()?;
            }
            (false, Some((_, j, stage0, conflicted))) => {
                if !conflicted && stage0.is_some() {
                    staged.add(1);
                }
                i = j;
            }
            (false, None) => break,
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_index_pass(
    pool: &Arc<WorkerPool>,
    batch: &Batch,
    req: &DiffRequest,
    ranges: &[(usize, usize)],
    unstaged: &Arc<CappedCounter>,
    conflicted: &Arc<CappedCounter>,
    errors: &Arc<ErrorSlot>,
) {
    let attr_oracle = Arc::new(AttrOracle::new(&req.repo));
    let honor_filemode = req.repo.config().get_bool("core.filemode").unwrap_or(true);

    for &range in ranges {
        let repo = Arc::clone(&req.repo);
        let snapshot = Arc::clone(&req.snapshot);
        let attr_oracle = Arc::clone(&attr_oracle);
        let unstaged = Arc::clone(unstaged);
        let conflicted = Arc::clone(conflicted);
        let errors = Arc::clone(errors);
        let limits = req.limits;
        pool.spawn_in(batch, move || {
            if let Err(err) = index_partition(
                &repo,
                &snapshot,
                range,
                &attr_oracle,
                honor_filemode,
                &limits,
                &unstaged,
                &conflicted,
                &errors,
            ) {
                errors.record(err);
            }
        });
    }
}

/// Dirty predicate + conflict accounting over one index range.
#[allow(clippy::too_many_arguments)]
fn index_partition(
    repo: &Repo,
    snapshot: &IndexSnapshot,
    (start, end): (usize, usize),
    attr_oracle: &AttrOracle,
    honor_filemode: bool,
    limits: &StatusLimits,
    unstaged: &CappedCounter,
    conflicted: &CappedCounter,
    errors: &ErrorSlot,
) -> Result<(), ScanError> {
    let entries = snapshot.entries();
    let workdir = repo.workdir();
    let index_mtime = snapshot.file_mtime();
    let mut attrs = AttrLookup::new(attr_oracle);
    let mut scratch = Vec::new();

    let mut i = start;
    while i < end {
        if (unstaged.is_full() && conflicted.is_full()) || errors.is_set() {
            return Ok(());
        }
        let entry = &entries[i];
        let path = snapshot.path(entry);

        if entry.stage != 0 {
            // Count the path once, regardless of how many stages exist.
            let first = i == start || snapshot.path(&entries[i - 1]) != path;
            if first {
                conflicted.add(1);
            }
            i += 1;
            continue;
        }
        i += 1;
        if unstaged.is_full() {
            continue;
        }

        let abs = workdir.join(Path::new(std::ffi::OsStr::from_bytes(path)));
        let meta = match fs::symlink_metadata(&abs) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => None,
            Err(err) => return Err(err.into()),
        };

        let verdict = dirty::classify_stat(entry, meta.as_ref(), index_mtime, honor_filemode);
        let is_dirty = match verdict {
            Verdict::Unchanged => false,
            Verdict::Dirty | Verdict::Deleted => true,
            Verdict::MaybeDirty => {
                use crate::index::{mode_class, ModeClass};
                if mode_class(entry.mode) == ModeClass::Gitlink {
                    dirty::gitlink_changed(workdir, path, entry.oid)
                } else {
                    dirty::content_changed(
                        workdir,
                        path,
                        entry,
                        meta.as_ref().expect("MaybeDirty implies a stat result"),
                        &mut attrs,
                        attr_oracle.autocrlf_text(),
                        limits,
                        &mut scratch,
                    )?
                }
            }
        };
        if is_dirty {
            unstaged.add(1);
        }
    }
    Ok(())
}
