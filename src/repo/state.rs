//! In-progress operation detection (merge, rebase, bisect, ...).
//!
//! Mirrors the state-file checks git itself performs: the presence of
//! specific files under the (worktree-private) git directory determines the
//! action string reported in the response.

use std::path::Path;

/// Returns the current repository action, or `""` when none is in progress.
///
/// Check order matches git's repository-state logic: rebase variants first,
/// then merge/cherry-pick/revert/bisect.
#[must_use]
pub fn repo_action(gitdir: &Path) -> &'static str {
    let rebase_merge = gitdir.join("rebase-merge");
    if rebase_merge.is_dir() {
        if rebase_merge.join("interactive").is_file() {
            return "rebase-i";
        }
        return "rebase-m";
    }

    let rebase_apply = gitdir.join("rebase-apply");
    if rebase_apply.is_dir() {
        if rebase_apply.join("rebasing").is_file() {
            return "rebase";
        }
        if rebase_apply.join("applying").is_file() {
            return "am";
        }
        return "am/rebase";
    }

    if gitdir.join("MERGE_HEAD").is_file() {
        return "merge";
    }
    if gitdir.join("CHERRY_PICK_HEAD").is_file() {
        return "cherry-pick";
    }
    if gitdir.join("REVERT_HEAD").is_file() {
        return "revert";
    }
    if gitdir.join("BISECT_LOG").is_file() {
        return "bisect";
    }
    ""
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn detects_states_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let gitdir = dir.path();

        assert_eq!(repo_action(gitdir), "");

        fs::write(gitdir.join("BISECT_LOG"), b"").unwrap();
        assert_eq!(repo_action(gitdir), "bisect");

        fs::write(gitdir.join("MERGE_HEAD"), b"").unwrap();
        assert_eq!(repo_action(gitdir), "merge");

        fs::create_dir(gitdir.join("rebase-merge")).unwrap();
        assert_eq!(repo_action(gitdir), "rebase-m");

        fs::write(gitdir.join("rebase-merge/interactive"), b"").unwrap();
        assert_eq!(repo_action(gitdir), "rebase-i");
    }
}
