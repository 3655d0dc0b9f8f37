//! Request loop and per-request orchestration.
//!
//! The loop is single-threaded: requests are processed one at a time and
//! all parallelism lives inside a request. Per the error policy, a request
//! that fails for any reason emits an id-only response and the loop moves
//! on; only input exhaustion (or a fatal read error) ends the loop.
//!
//! Within a request the tag lookup (a read-only query whose result is
//! needed only at response time) is started first on the pool and joined
//! just before the response is written, hiding its latency behind the
//! index passes.

use std::io::{BufRead, Write};
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::cache::RepoCache;
use crate::diff::{run_diff, DiffCounts, DiffRequest};
use crate::options::Options;
use crate::pool::WorkerPool;
use crate::protocol::{encode_empty, parse_request, Request, StatusResponse};
use crate::repo::refs::{self, PackedRefs};
use crate::repo::{commits, stash, state, tags};

/// The daemon: options, repository cache and worker pool.
pub struct Daemon {
    opts: Options,
    cache: RepoCache,
    pool: Arc<WorkerPool>,
}

impl Daemon {
    #[must_use]
    pub fn new(opts: Options) -> Self {
        let cache = RepoCache::new(opts.cache_ttl, opts.cache_cap);
        let pool = Arc::new(WorkerPool::new(opts.num_threads));
        Self { opts, cache, pool }
    }

    /// Reads requests from `input` until EOF, writing one response line
    /// per request to `output`.
    pub fn run(&mut self, input: impl BufRead, output: &mut impl Write) -> std::io::Result<()> {
        let mut lines = input.split(b'\n');
        while let Some(line) = lines.next().transpose()? {
            let request = match parse_request(&line) {
                Ok(request) => request,
                Err(err) => {
                    // Malformed line: skip it, keep serving.
                    warn!(error = %err, "invalid request line");
                    continue;
                }
            };
            let response = self.handle(&request);
            output.write_all(&response)?;
            output.flush()?;
        }
        Ok(())
    }

    /// Processes one request, returning the encoded response line.
    pub fn handle(&mut self, request: &Request) -> Vec<u8> {
        let started = Instant::now();
        let result = self.process(request);
        let line = match result {
            Ok(line) => line,
            Err(err) => {
                debug!(error = %err, "request failed");
                encode_empty(&request.id)
            }
        };
        self.cache.evict();
        debug!(
            elapsed_us = started.elapsed().as_micros() as u64,
            "request done"
        );
        line
    }

    fn process(&mut self, request: &Request) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        let dir = std::path::Path::new(std::ffi::OsStr::from_bytes(&request.dir));
        let cached = self.cache.open(dir)?;
        let repo = Arc::clone(&cached.repo);

        let head = refs::read_head(repo.gitdir(), repo.commondir())?;

        // Tag enumeration never touches the index; overlap it with the
        // diff passes and join right before the response is written.
        let pool = Arc::clone(&self.pool);
        let tag_job = head.oid.map(|head_oid| {
            let repo = Arc::clone(&repo);
            pool.spawn_job(move || tags::tag_at_head(repo.commondir(), repo.odb(), head_oid))
        });

        let mut response = StatusResponse {
            workdir: repo.workdir().as_os_str().as_bytes().to_vec(),
            head_commit: head.oid,
            local_branch: head.branch.clone().unwrap_or_default(),
            repo_action: state::repo_action(repo.gitdir()),
            ..StatusResponse::default()
        };

        let upstream = match &head.branch {
            Some(branch) => refs::upstream_for_branch(repo.config(), repo.commondir(), branch)?,
            None => None,
        };
        if let Some(upstream) = &upstream {
            response.upstream_branch = upstream.branch.clone();
            response.upstream_remote_name = upstream.remote.clone();
            response.upstream_remote_url = upstream.url.clone();
        }

        if request.diff {
            let snapshot = cached.snapshot(self.opts.limits.verify_index_checksum)?;
            let head_tree = match head.oid {
                Some(oid) => Some(commits::read_commit(repo.odb(), &oid)?.tree),
                None => None,
            };
            let counts = run_diff(
                &self.pool,
                &DiffRequest {
                    repo: Arc::clone(&repo),
                    snapshot,
                    head_tree,
                    limits: self.opts.limits,
                    recurse_ignored: self.opts.recurse_ignored_dirs,
                    use_global_excludes: self.opts.use_global_excludes,
                },
            )?;
            apply_counts(&mut response, counts);
        }

        if let (Some(head_oid), Some(upstream)) = (head.oid, &upstream) {
            let (ahead, behind) = commits::ahead_behind(
                repo.odb(),
                head_oid,
                upstream.tip,
                self.opts.limits.max_commits,
            )?;
            response.commits_ahead = ahead as u64;
            response.commits_behind = behind as u64;
        }

        let packed = PackedRefs::load(repo.commondir());
        response.num_stashes = stash::stash_count(repo.commondir(), &packed) as u64;

        if let Some(job) = tag_job {
            if let Ok(Some(tag)) = job.join(&self.pool) {
                response.tag_at_head = tag;
            }
        }

        Ok(response.encode(&request.id))
    }
}

fn apply_counts(response: &mut StatusResponse, counts: DiffCounts) {
    response.index_size = counts.index_size as u64;
    response.num_staged = counts.staged as u64;
    response.num_unstaged = counts.unstaged as u64;
    response.num_conflicted = counts.conflicted as u64;
    response.num_untracked = counts.untracked as u64;
}
