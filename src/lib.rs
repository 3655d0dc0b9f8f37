//! Low-latency git status daemon for interactive shell prompts.
//!
//! For each prompt render the shell writes one tab-delimited request line
//! (`id`, working directory, diff flag) and reads back one line describing
//! the repository: head, branch, upstream, in-progress action, and bounded
//! counts of staged, unstaged, conflicted and untracked entries plus
//! ahead/behind, stash and tag-at-head.
//!
//! The engine below the request loop is where the time goes:
//! - an index snapshot parser tolerant of concurrent rewrites ([`index`]),
//! - a stat-first dirty predicate with content-hash fallback
//!   ([`diff::dirty`]),
//! - partitioned parallel passes over the index and head tree plus a
//!   concurrent untracked walk ([`diff`]), all saturating at configured
//!   bounds,
//! - a process-lifetime repository cache ([`cache`]) so warm requests
//!   skip re-opening and re-parsing,
//! - hand-rolled read-only git plumbing: refs, loose objects, packs with
//!   delta resolution, trees and commit walks ([`repo`]).
//!
//! The daemon never mutates a repository.

pub mod cache;
pub mod daemon;
pub mod diff;
pub mod errors;
pub mod index;
pub mod limits;
pub mod options;
pub mod oracle;
pub mod pool;
pub mod protocol;
pub mod repo;
