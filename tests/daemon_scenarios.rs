//! End-to-end scenarios over on-disk repository fixtures.
//!
//! Field indexes follow the wire order: 0 id, 1 workdir, 2 head, 3 branch,
//! 4 upstream branch, 5 remote name, 6 remote url, 7 action, 8 index_size,
//! 9 staged, 10 unstaged, 11 conflicted, 12 untracked, 13 ahead,
//! 14 behind, 15 stashes, 16 tag.

mod common;

use common::{fields, respond, respond_with, test_options, IndexEntrySpec, TestRepo};
use git_statusd::daemon::Daemon;
use git_statusd::limits::StatusLimits;

#[test]
fn empty_repo_unborn_head() {
    let repo = TestRepo::init();
    let line = respond(test_options(2), repo.workdir(), "A", true);
    let f = fields(&line);

    assert_eq!(f.len(), 17);
    assert_eq!(f[0], "A");
    assert_eq!(f[1], repo.canonical_workdir().to_str().unwrap());
    assert_eq!(f[2], "", "unborn head has no commit");
    assert_eq!(f[3], "main");
    assert_eq!(&f[4..8], &["", "", "", ""]);
    assert_eq!(&f[8..16], &["0", "0", "0", "0", "0", "0", "0", "0"]);
    assert_eq!(f[16], "");
}

#[test]
fn clean_checkout_no_upstream() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);

    let line = respond(test_options(2), repo.workdir(), "B", true);
    let f = fields(&line);

    assert_eq!(f[2], format!("{commit}"));
    assert_eq!(f[3], "main");
    assert_eq!(f[8], "1", "index size");
    assert_eq!(&f[9..15], &["0", "0", "0", "0", "0", "0"]);
}

#[test]
fn single_untracked_file() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);

    repo.write_file("foo.txt", b"new file\n");

    let line = respond(test_options(2), repo.workdir(), "C", true);
    let f = fields(&line);
    assert_eq!(f[12], "1", "untracked");
    assert_eq!(&f[9..12], &["0", "0", "0"]);
}

#[test]
fn staged_edit() {
    let repo = TestRepo::init();
    let old_blob = repo.blob(b"old contents\n");
    let tree = repo.tree(&[("a.txt", 0o100644, old_blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);

    // Index and worktree agree on the new contents; only head differs.
    let (_new_blob, entry) = repo.checked_out_file("a.txt", b"new contents\n");
    repo.write_index(vec![entry]);

    let line = respond(test_options(2), repo.workdir(), "D", true);
    let f = fields(&line);
    assert_eq!(f[9], "1", "staged");
    assert_eq!(&f[10..13], &["0", "0", "0"]);
}

#[test]
fn unstaged_edit_by_size() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("b.txt", b"short");
    let tree = repo.tree(&[("b.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);

    // Rewrite after the index: cached size no longer matches.
    repo.write_file("b.txt", b"much longer contents");

    let line = respond(test_options(2), repo.workdir(), "E", true);
    let f = fields(&line);
    assert_eq!(f[10], "1", "unstaged");
    assert_eq!(f[9], "0");
    assert_eq!(f[12], "0");
}

#[test]
fn unstaged_edit_same_size_content_hash() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("c.txt", b"aaaa\n");
    let tree = repo.tree(&[("c.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);

    // Same length, different bytes: only the hash fallback catches it.
    repo.write_file("c.txt", b"bbbb\n");

    let line = respond(test_options(2), repo.workdir(), "E2", true);
    let f = fields(&line);
    assert_eq!(f[10], "1", "unstaged");
}

#[test]
fn conflict_counts_once() {
    let repo = TestRepo::init();
    let base = repo.blob(b"base\n");
    let ours = repo.blob(b"ours\n");
    let theirs = repo.blob(b"theirs\n");
    let tree = repo.tree(&[("c.txt", 0o100644, base)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);

    repo.write_file("c.txt", b"<<<<<<< conflict\n");
    repo.write_index(vec![
        IndexEntrySpec::conflict("c.txt", 1, base),
        IndexEntrySpec::conflict("c.txt", 2, ours),
        IndexEntrySpec::conflict("c.txt", 3, theirs),
    ]);

    let line = respond(test_options(2), repo.workdir(), "F", true);
    let f = fields(&line);
    assert_eq!(f[11], "1", "conflicted counts the path once");
    assert_eq!(f[9], "0", "conflicted paths are not staged");
    assert_eq!(f[12], "0", "conflicted paths are not untracked");
    assert_eq!(f[8], "3", "index size counts all stages");
}

#[test]
fn ahead_behind_against_upstream() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);

    let base = repo.commit(tree, &[], 100);
    let l1 = repo.commit(tree, &[base], 200);
    let l2 = repo.commit(tree, &[l1], 300);
    let u1 = repo.commit(tree, &[base], 150);
    let u2 = repo.commit(tree, &[u1], 160);
    let u3 = repo.commit(tree, &[u2], 170);

    repo.set_ref("refs/heads/main", l2);
    repo.set_ref("refs/remotes/origin/main", u3);
    repo.write_index(vec![entry]);
    repo.append_config(
        "[branch \"main\"]\n\tremote = origin\n\tmerge = refs/heads/main\n\
         [remote \"origin\"]\n\turl = https://example.com/demo.git\n",
    );

    let line = respond(test_options(2), repo.workdir(), "G", true);
    let f = fields(&line);
    assert_eq!(f[4], "main", "upstream branch");
    assert_eq!(f[5], "origin");
    assert_eq!(f[6], "https://example.com/demo.git");
    assert_eq!(f[13], "2", "ahead");
    assert_eq!(f[14], "3", "behind");
}

#[test]
fn untracked_saturates_at_bound() {
    let repo = TestRepo::init();
    for i in 0..10 {
        repo.write_file(&format!("untracked-{i}.txt"), b"x");
    }

    let mut opts = test_options(4);
    opts.limits = StatusLimits {
        max_untracked: 3,
        ..opts.limits
    };
    let line = respond(opts, repo.workdir(), "H", true);
    let f = fields(&line);
    assert_eq!(f[12], "3", "untracked saturated at the bound");
}

#[test]
fn gitignore_excludes_untracked() {
    let repo = TestRepo::init();
    repo.write_file(".gitignore", b".gitignore\n*.log\nbuild/\n!keep.log\n");
    repo.write_file("debug.log", b"x");
    repo.write_file("keep.log", b"x");
    repo.write_file("build/out.bin", b"x");
    repo.write_file("src/main.rs", b"x");

    let line = respond(test_options(2), repo.workdir(), "I", true);
    let f = fields(&line);
    // keep.log (whitelisted) + src/main.rs; debug.log and build/ excluded.
    assert_eq!(f[12], "2");
}

#[test]
fn stash_count_and_action() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);
    repo.write_stash_log(2);
    std::fs::write(repo.gitdir().join("MERGE_HEAD"), format!("{commit}\n")).unwrap();

    let line = respond(test_options(2), repo.workdir(), "J", true);
    let f = fields(&line);
    assert_eq!(f[7], "merge");
    assert_eq!(f[15], "2", "stashes");
}

#[test]
fn tag_at_head_prefers_last_name() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let head = repo.commit(tree, &[], 100);
    let other = repo.commit(tree, &[head], 200);
    repo.set_ref("refs/heads/main", head);
    repo.write_index(vec![entry]);

    repo.set_ref("refs/tags/v1.0", head);
    // Annotated tag pointing at head peels to it.
    let annotated = repo.tag_object(head, "v2.0", 300);
    repo.set_ref("refs/tags/v2.0", annotated);
    // A tag on a different commit never matches.
    repo.set_ref("refs/tags/v9.9", other);

    let line = respond(test_options(2), repo.workdir(), "K", true);
    let f = fields(&line);
    assert_eq!(f[16], "v2.0");
}

#[test]
fn diff_flag_zero_skips_counts() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);
    repo.write_file("untracked.txt", b"x");

    let line = respond(test_options(2), repo.workdir(), "L", false);
    let f = fields(&line);
    assert_eq!(f[2], format!("{commit}"), "head still reported");
    assert_eq!(
        &f[8..13],
        &["0", "0", "0", "0", "0"],
        "diff fields forced to zero"
    );
}

#[test]
fn not_a_repository_yields_id_only() {
    let dir = tempfile::tempdir().unwrap();
    let line = respond(test_options(2), dir.path(), "M", true);
    assert_eq!(line, "M\n");
}

#[test]
fn index_too_large_escape_hatch() {
    let repo = TestRepo::init();
    let old_blob = repo.blob(b"old\n");
    let tree = repo.tree(&[("a.txt", 0o100644, old_blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);

    let (new_blob, _) = repo.checked_out_file("a.txt", b"new\n");
    repo.write_index(vec![
        IndexEntrySpec::clean(&repo, "a.txt", new_blob),
        IndexEntrySpec::staged("b.txt", old_blob),
    ]);
    repo.write_file("untracked.txt", b"x");

    let mut opts = test_options(2);
    opts.limits = StatusLimits {
        max_index_size: 1,
        ..opts.limits
    };

    let line = respond(opts, repo.workdir(), "N", true);
    let f = fields(&line);
    assert_eq!(f[8], "2", "index size still reported");
    assert_eq!(f[9], "2", "staged pass still runs"); // a.txt modified + b.txt added
    assert_eq!(&f[10..13], &["0", "0", "0"], "worktree passes skipped");
}

#[test]
fn responses_identical_across_worker_counts() {
    let repo = TestRepo::init();
    let (blob_a, entry_a) = repo.checked_out_file("a.txt", b"alpha\n");
    let (blob_b, entry_b) = repo.checked_out_file("dir/b.txt", b"beta\n");
    let old = repo.blob(b"old\n");
    let tree = repo.tree(&[
        ("a.txt", 0o100644, blob_a),
        ("dir/b.txt", 0o100644, blob_b),
        ("gone.txt", 0o100644, old),
    ]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry_a, entry_b]);
    repo.write_file("dir/b.txt", b"changed beta bytes\n");
    for i in 0..5 {
        repo.write_file(&format!("new-{i}.txt"), b"x");
    }

    let mut expected = None;
    for threads in [1usize, 2, 8, 32] {
        let line = respond(test_options(threads), repo.workdir(), "X", true);
        match &expected {
            None => expected = Some(line),
            Some(prev) => assert_eq!(&line, prev, "threads={threads} diverged"),
        }
    }
}

#[test]
fn idempotent_back_to_back_requests() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);
    repo.write_file("loose.txt", b"x");

    let mut daemon = Daemon::new(test_options(2));
    let first = respond_with(&mut daemon, repo.workdir(), "Y", true);
    let second = respond_with(&mut daemon, repo.workdir(), "Y", true);
    assert_eq!(first, second);
}

#[test]
fn subdirectory_request_canonicalizes_to_root() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("sub/inner.txt", b"data\n");
    let tree = repo.tree(&[("sub/inner.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);

    let line = respond(test_options(2), &repo.workdir().join("sub"), "Z", true);
    let f = fields(&line);
    assert_eq!(f[1], repo.canonical_workdir().to_str().unwrap());
    assert_eq!(&f[9..13], &["0", "0", "0", "0"]);
}

#[test]
fn detached_head_has_empty_branch() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    std::fs::write(repo.gitdir().join("HEAD"), format!("{commit}\n")).unwrap();
    repo.write_index(vec![entry]);

    let line = respond(test_options(2), repo.workdir(), "W", true);
    let f = fields(&line);
    assert_eq!(f[2], format!("{commit}"));
    assert_eq!(f[3], "", "detached head has no branch");
}

#[test]
fn staged_deletion_is_counted() {
    let repo = TestRepo::init();
    let blob = repo.blob(b"doomed\n");
    let tree = repo.tree(&[("doomed.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    // Empty index: the file was `git rm --cached`ed.
    repo.write_index(vec![]);

    let line = respond(test_options(2), repo.workdir(), "V", true);
    let f = fields(&line);
    assert_eq!(f[9], "1", "deletion staged");
    assert_eq!(f[8], "0");
}

#[test]
fn deleted_worktree_file_is_unstaged() {
    let repo = TestRepo::init();
    let (blob, entry) = repo.checked_out_file("a.txt", b"alpha\n");
    let tree = repo.tree(&[("a.txt", 0o100644, blob)]);
    let commit = repo.commit(tree, &[], 100);
    repo.set_ref("refs/heads/main", commit);
    repo.write_index(vec![entry]);
    std::fs::remove_file(repo.workdir().join("a.txt")).unwrap();

    let line = respond(test_options(2), repo.workdir(), "U", true);
    let f = fields(&line);
    assert_eq!(f[10], "1", "deleted file counts as unstaged");
    assert_eq!(f[9], "0");
}
