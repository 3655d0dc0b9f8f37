//! Process options and flag parsing.
//!
//! Flags are parsed by hand: the surface is a dozen `--key=value` switches
//! and the daemon has no subcommands. Unknown flags are an error so typos
//! fail fast at startup rather than silently running with defaults.

use std::time::Duration;

use crate::limits::StatusLimits;

/// Full daemon configuration.
#[derive(Clone, Debug)]
pub struct Options {
    /// Worker threads for the shared pool.
    pub num_threads: usize,
    /// Scan bounds and thresholds.
    pub limits: StatusLimits,
    /// Repository-cache idle TTL.
    pub cache_ttl: Duration,
    /// Repository-cache entry cap.
    pub cache_cap: usize,
    /// Visit ignored directories to count individually-unignored children.
    pub recurse_ignored_dirs: bool,
    /// Consult the user-global exclude file.
    pub use_global_excludes: bool,
    /// Log verbosity (`error`..`trace`).
    pub log_level: tracing::Level,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            limits: StatusLimits::DEFAULT,
            cache_ttl: Duration::from_secs(3600),
            cache_cap: 64,
            recurse_ignored_dirs: false,
            use_global_excludes: true,
            log_level: tracing::Level::INFO,
        }
    }
}

impl Options {
    /// Parses command-line flags.
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut opts = Self::default();
        for arg in args {
            let (key, value) = match arg.split_once('=') {
                Some((key, value)) => (key, value),
                None => (arg.as_str(), ""),
            };
            match key {
                "--num-threads" => opts.num_threads = parse_num(key, value)?,
                "--max-num-staged" => opts.limits.max_staged = parse_bound(key, value)?,
                "--max-num-unstaged" => opts.limits.max_unstaged = parse_bound(key, value)?,
                "--max-num-conflicted" => opts.limits.max_conflicted = parse_bound(key, value)?,
                "--max-num-untracked" => opts.limits.max_untracked = parse_bound(key, value)?,
                "--max-commits-ahead-behind" => opts.limits.max_commits = parse_num(key, value)?,
                "--dirty-max-index-size" => opts.limits.max_index_size = parse_bound(key, value)?,
                "--dirty-max-file-size" => {
                    opts.limits.dirty_max_file_size = parse_num(key, value)?
                }
                "--verify-index-checksum" => opts.limits.verify_index_checksum = true,
                "--repo-ttl-seconds" => {
                    opts.cache_ttl = Duration::from_secs(parse_num(key, value)?)
                }
                "--repo-cache-cap" => opts.cache_cap = parse_num(key, value)?,
                "--recurse-ignored-dirs" => opts.recurse_ignored_dirs = true,
                "--no-global-excludes" => opts.use_global_excludes = false,
                "--log-level" => {
                    opts.log_level = match value {
                        "error" => tracing::Level::ERROR,
                        "warn" => tracing::Level::WARN,
                        "info" => tracing::Level::INFO,
                        "debug" => tracing::Level::DEBUG,
                        "trace" => tracing::Level::TRACE,
                        other => return Err(format!("unknown log level: {other}")),
                    }
                }
                other => return Err(format!("unknown flag: {other}")),
            }
        }
        if opts.num_threads == 0 {
            return Err("--num-threads must be > 0".to_string());
        }
        opts.limits.validate();
        Ok(opts)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{key} needs a numeric value, got {value:?}"))
}

/// A bound of `-1` means unbounded.
fn parse_bound(key: &str, value: &str) -> Result<usize, String> {
    if value == "-1" {
        return Ok(usize::MAX);
    }
    parse_num(key, value)
}
