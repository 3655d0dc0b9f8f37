//! Parallel untracked-file scanner.
//!
//! Walks the working directory recursively, checking every file against
//! the index snapshot (binary search on the sorted entry paths) and the
//! ignore oracle. Subdirectory walks are enqueued to the worker pool while
//! the queue has capacity and recursed inline otherwise, so deep trees
//! cannot flood the queue.
//!
//! Policy details, matching git status semantics:
//! - `.git` entries are never visited.
//! - A directory containing its own `.git` is a nested repository: it is
//!   a single untracked entry when nothing under it is in the index, and
//!   is never descended into.
//! - Ignored directories are skipped entirely unless the configuration
//!   asks for individually-unignored children, in which case the walk
//!   descends but only whitelisted entries count.
//!
//! The untracked counter is shared and saturating; workers re-check it at
//! every directory boundary and stop early once it fills.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::diff::counter::CappedCounter;
use crate::diff::ErrorSlot;
use crate::index::IndexSnapshot;
use crate::oracle::{DirIgnores, IgnoreOracle};
use crate::pool::{Batch, WorkerPool};

/// Queue-pressure limit: beyond this many queued tasks, recurse inline.
const SPAWN_QUEUE_CAP: usize = 256;

/// Shared state of one untracked scan.
pub struct UntrackedScan {
    pub pool: Arc<WorkerPool>,
    pub batch: Batch,
    pub snapshot: Arc<IndexSnapshot>,
    pub counter: Arc<CappedCounter>,
    pub errors: Arc<ErrorSlot>,
    pub recurse_ignored: bool,
}

/// Starts the walk at the working-directory root. Completion is observed
/// by joining the scan's batch.
pub fn start(scan: Arc<UntrackedScan>, oracle: &Arc<IgnoreOracle>) {
    let root = oracle.workdir().to_path_buf();
    let node = oracle.root_node();
    let scan2 = Arc::clone(&scan);
    let spawned = scan.pool.spawn_in_if_below(&scan.batch, SPAWN_QUEUE_CAP, {
        let root = root.clone();
        let node = Arc::clone(&node);
        move || walk_dir(&scan2, root, Vec::new(), node, false)
    });
    if !spawned {
        walk_dir(&scan, root, Vec::new(), node, false);
    }
}

/// Walks one directory. `rel` is the workdir-relative path of `abs`
/// (empty at the root), without a trailing slash.
fn walk_dir(
    scan: &Arc<UntrackedScan>,
    abs: PathBuf,
    rel: Vec<u8>,
    node: Arc<DirIgnores>,
    under_ignored: bool,
) {
    if scan.counter.is_full() || scan.errors.is_set() {
        return;
    }

    let reader = match fs::read_dir(&abs) {
        Ok(reader) => reader,
        // The directory vanished mid-walk; its contents are simply gone.
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => {
            scan.errors.record(err.into());
            return;
        }
    };

    let mut child_rel = Vec::with_capacity(rel.len() + 32);
    for entry in reader {
        if scan.counter.is_full() {
            return;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                scan.errors.record(err.into());
                return;
            }
        };
        let name_os = entry.file_name();
        let name = name_os.as_encoded_bytes();
        if name == b".git" {
            continue;
        }

        child_rel.clear();
        child_rel.extend_from_slice(&rel);
        if !child_rel.is_empty() {
            child_rel.push(b'/');
        }
        child_rel.extend_from_slice(name);

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                scan.errors.record(err.into());
                return;
            }
        };

        if file_type.is_dir() {
            visit_dir(scan, &entry, name, &child_rel, &node, under_ignored);
        } else {
            // Symlinks count as files and are never followed.
            if scan.snapshot.find(&child_rel).is_some() {
                continue;
            }
            if !node.is_excluded(&child_rel, false, under_ignored) {
                scan.counter.add(1);
            }
        }
    }
}

fn visit_dir(
    scan: &Arc<UntrackedScan>,
    entry: &fs::DirEntry,
    name: &[u8],
    child_rel: &[u8],
    node: &Arc<DirIgnores>,
    under_ignored: bool,
) {
    let abs = entry.path();

    // Nested repository: one entry, no descent.
    if abs.join(".git").symlink_metadata().is_ok() {
        let mut prefix = child_rel.to_vec();
        prefix.push(b'/');
        let tracked =
            scan.snapshot.find(child_rel).is_some() || scan.snapshot.contains_prefix(&prefix);
        if !tracked && !node.is_excluded(child_rel, true, under_ignored) {
            scan.counter.add(1);
        }
        return;
    }

    let ignored = node.is_excluded(child_rel, true, under_ignored);
    if ignored && !scan.recurse_ignored {
        return;
    }

    let child_node = node.child(name, &abs);
    let child_rel = child_rel.to_vec();
    let scan2 = Arc::clone(scan);
    let spawned = scan.pool.spawn_in_if_below(&scan.batch, SPAWN_QUEUE_CAP, {
        let abs = abs.clone();
        let child_node = Arc::clone(&child_node);
        let child_rel = child_rel.clone();
        move || walk_dir(&scan2, abs, child_rel, child_node, ignored)
    });
    if !spawned {
        walk_dir(scan, abs, child_rel, child_node, ignored);
    }
}
