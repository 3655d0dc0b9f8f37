//! Bounds and thresholds for status computation.
//!
//! Every scan the daemon performs is bounded: counters saturate at their
//! configured maximum and the corresponding scan stops early. Limits are
//! validated at startup; invalid configurations are treated as programmer
//! errors (panic in `validate`).
//!
//! # Design Notes
//! - A bound of `usize::MAX` effectively disables saturation for that
//!   category without a special "unlimited" sentinel.
//! - `max_index_size` is the documented performance escape hatch: above it
//!   the unstaged pass is skipped and unstaged/conflicted/untracked are
//!   reported as zero.

/// Hard caps for a single status request.
///
/// Defaults mirror interactive-prompt usage: the prompt only needs to know
/// whether each category is non-empty, so the per-category bounds default
/// to 1. Raising them trades latency for exact counts.
#[derive(Clone, Copy, Debug)]
pub struct StatusLimits {
    /// Maximum number of staged changes to count.
    pub max_staged: usize,

    /// Maximum number of unstaged changes to count.
    pub max_unstaged: usize,

    /// Maximum number of conflicted paths to count.
    pub max_conflicted: usize,

    /// Maximum number of untracked entries to count.
    pub max_untracked: usize,

    /// Maximum commits examined by the ahead/behind walk.
    ///
    /// Bounds both counts at once; a walk that exceeds this returns the
    /// counts accumulated so far.
    pub max_commits: usize,

    /// Index entry count above which the unstaged pass is skipped.
    ///
    /// When exceeded, `num_unstaged`, `num_conflicted` and `num_untracked`
    /// are reported as 0. `num_staged` and `index_size` are still computed.
    pub max_index_size: usize,

    /// File size above which working-tree content is never hashed.
    ///
    /// A stat-suspicious entry larger than this is reported dirty without
    /// reading its content.
    pub dirty_max_file_size: u64,

    /// Verify the SHA-1 checksum over the index tail when parsing.
    ///
    /// Disabled by default for latency; structural validation still runs.
    pub verify_index_checksum: bool,
}

impl StatusLimits {
    /// Defaults tuned for interactive prompts.
    pub const DEFAULT: Self = Self {
        max_staged: 1,
        max_unstaged: 1,
        max_conflicted: 1,
        max_untracked: 1,
        max_commits: 4096,
        max_index_size: usize::MAX,
        dirty_max_file_size: 8 * 1024 * 1024,
        verify_index_checksum: false,
    };

    /// Restrictive limits for tests and constrained environments.
    pub const RESTRICTIVE: Self = Self {
        max_staged: 1,
        max_unstaged: 1,
        max_conflicted: 1,
        max_untracked: 1,
        max_commits: 256,
        max_index_size: 4096,
        dirty_max_file_size: 64 * 1024,
        verify_index_checksum: true,
    };

    /// Validates that limits are internally consistent.
    ///
    /// # Panics
    ///
    /// Panics if any bound is zero in a way that would make every response
    /// degenerate (indicates a configuration bug, not user error).
    pub fn validate(&self) {
        assert!(self.max_commits > 0, "max_commits must be > 0");
        assert!(self.max_index_size > 0, "max_index_size must be > 0");
    }
}

impl Default for StatusLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}
