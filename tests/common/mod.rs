//! On-disk repository fixtures for daemon tests.
//!
//! Builds real repository structures (loose objects, refs, packed-refs,
//! config, index files) without shelling out to git, so scenarios are
//! hermetic and byte-deterministic.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use tempfile::TempDir;

use git_statusd::daemon::Daemon;
use git_statusd::limits::StatusLimits;
use git_statusd::options::Options;
use git_statusd::protocol::Request;
use git_statusd::repo::oid::ObjectId;

/// A scratch repository rooted in a temp dir.
pub struct TestRepo {
    dir: TempDir,
}

/// One entry for [`TestRepo::write_index`].
pub struct IndexEntrySpec {
    pub path: String,
    pub oid: ObjectId,
    pub mode: u32,
    pub stage: u8,
    /// Fill cached stat data from this worktree file; stage>0 entries and
    /// deliberately-stale entries pass `None` (zeroed stat data).
    pub stat_from: Option<PathBuf>,
}

impl IndexEntrySpec {
    pub fn clean(repo: &TestRepo, path: &str, oid: ObjectId) -> Self {
        Self {
            path: path.to_string(),
            oid,
            mode: 0o100644,
            stage: 0,
            stat_from: Some(repo.workdir().join(path)),
        }
    }

    pub fn staged(path: &str, oid: ObjectId) -> Self {
        Self {
            path: path.to_string(),
            oid,
            mode: 0o100644,
            stage: 0,
            stat_from: None,
        }
    }

    pub fn conflict(path: &str, stage: u8, oid: ObjectId) -> Self {
        Self {
            path: path.to_string(),
            oid,
            mode: 0o100644,
            stage,
            stat_from: None,
        }
    }
}

impl TestRepo {
    /// Creates `.git` with an unborn `main` branch.
    pub fn init() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let gitdir = dir.path().join(".git");
        fs::create_dir_all(gitdir.join("objects")).unwrap();
        fs::create_dir_all(gitdir.join("refs/heads")).unwrap();
        fs::write(gitdir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        Self { dir }
    }

    pub fn workdir(&self) -> &Path {
        self.dir.path()
    }

    pub fn canonical_workdir(&self) -> PathBuf {
        fs::canonicalize(self.dir.path()).unwrap()
    }

    pub fn gitdir(&self) -> PathBuf {
        self.dir.path().join(".git")
    }

    pub fn write_file(&self, rel: &str, content: &[u8]) {
        let path = self.workdir().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn append_config(&self, text: &str) {
        let path = self.gitdir().join("config");
        let mut existing = fs::read_to_string(&path).unwrap_or_default();
        existing.push_str(text);
        fs::write(path, existing).unwrap();
    }

    fn write_object(&self, kind: &str, content: &[u8]) -> ObjectId {
        let mut hasher = Sha1::new();
        let header = format!("{kind} {}\0", content.len());
        hasher.update(header.as_bytes());
        hasher.update(content);
        let bytes: [u8; 20] = hasher.finalize().into();
        let oid = ObjectId::from_bytes(bytes);

        let hex = format!("{oid}");
        let dir = self.gitdir().join("objects").join(&hex[..2]);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(&hex[2..]);
        if !path.exists() {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(header.as_bytes()).unwrap();
            enc.write_all(content).unwrap();
            fs::write(path, enc.finish().unwrap()).unwrap();
        }
        oid
    }

    pub fn blob(&self, content: &[u8]) -> ObjectId {
        self.write_object("blob", content)
    }

    /// Builds (nested) tree objects from full-path blob entries.
    pub fn tree(&self, files: &[(&str, u32, ObjectId)]) -> ObjectId {
        let mut here: Vec<(String, u32, ObjectId)> = Vec::new();
        let mut subdirs: BTreeMap<String, Vec<(String, u32, ObjectId)>> = BTreeMap::new();

        for (path, mode, oid) in files {
            match path.split_once('/') {
                None => here.push((path.to_string(), *mode, *oid)),
                Some((dir, rest)) => subdirs
                    .entry(dir.to_string())
                    .or_default()
                    .push((rest.to_string(), *mode, *oid)),
            }
        }
        for (dir, nested) in subdirs {
            let refs: Vec<(&str, u32, ObjectId)> = nested
                .iter()
                .map(|(p, m, o)| (p.as_str(), *m, *o))
                .collect();
            let sub = self.tree(&refs);
            here.push((dir, 0o40000, sub));
        }

        // Git tree order: directories sort as "name/".
        here.sort_by(|a, b| {
            let key = |entry: &(String, u32, ObjectId)| {
                let mut k = entry.0.clone().into_bytes();
                if entry.1 == 0o40000 {
                    k.push(b'/');
                }
                k
            };
            key(a).cmp(&key(b))
        });

        let mut data = Vec::new();
        for (name, mode, oid) in &here {
            data.extend_from_slice(format!("{mode:o} {name}").as_bytes());
            data.push(0);
            data.extend_from_slice(oid.as_bytes());
        }
        self.write_object("tree", &data)
    }

    pub fn commit(&self, tree: ObjectId, parents: &[ObjectId], time: i64) -> ObjectId {
        let mut data = Vec::new();
        data.extend_from_slice(format!("tree {tree}\n").as_bytes());
        for parent in parents {
            data.extend_from_slice(format!("parent {parent}\n").as_bytes());
        }
        data.extend_from_slice(
            format!("author A U Thor <author@example.com> {time} +0000\n").as_bytes(),
        );
        data.extend_from_slice(
            format!("committer A U Thor <author@example.com> {time} +0000\n").as_bytes(),
        );
        data.extend_from_slice(b"\ntest commit\n");
        self.write_object("commit", &data)
    }

    pub fn tag_object(&self, target: ObjectId, name: &str, time: i64) -> ObjectId {
        let data = format!(
            "object {target}\ntype commit\ntag {name}\n\
             tagger A U Thor <author@example.com> {time} +0000\n\ntag message\n"
        );
        self.write_object("tag", data.as_bytes())
    }

    pub fn set_ref(&self, name: &str, oid: ObjectId) {
        let path = self.gitdir().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{oid}\n")).unwrap();
    }

    /// Writes a v2 index with the given entries.
    pub fn write_index(&self, mut entries: Vec<IndexEntrySpec>) {
        entries.sort_by(|a, b| (a.path.as_bytes(), a.stage).cmp(&(b.path.as_bytes(), b.stage)));

        let mut buf = Vec::new();
        buf.extend_from_slice(b"DIRC");
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());

        for entry in &entries {
            let start = buf.len();
            let meta = entry
                .stat_from
                .as_ref()
                .and_then(|path| fs::symlink_metadata(path).ok());
            let stat = |f: fn(&fs::Metadata) -> u32| meta.as_ref().map_or(0, f);

            for value in [
                stat(|m| m.ctime() as u32),
                stat(|m| m.ctime_nsec() as u32),
                stat(|m| m.mtime() as u32),
                stat(|m| m.mtime_nsec() as u32),
                stat(|m| m.dev() as u32),
                stat(|m| m.ino() as u32),
                entry.mode,
                stat(|m| m.uid()),
                stat(|m| m.gid()),
                stat(|m| m.size() as u32),
            ] {
                buf.extend_from_slice(&value.to_be_bytes());
            }
            buf.extend_from_slice(entry.oid.as_bytes());
            let name_len = entry.path.len().min(0xfff) as u16;
            let flags = ((entry.stage as u16) << 12) | name_len;
            buf.extend_from_slice(&flags.to_be_bytes());
            buf.extend_from_slice(entry.path.as_bytes());
            buf.push(0);
            while (buf.len() - start) % 8 != 0 {
                buf.push(0);
            }
        }

        let mut hasher = Sha1::new();
        hasher.update(&buf);
        let digest: [u8; 20] = hasher.finalize().into();
        buf.extend_from_slice(&digest);
        fs::write(self.gitdir().join("index"), buf).unwrap();
    }

    /// Blob + worktree file + clean index entry in one step.
    pub fn checked_out_file(&self, rel: &str, content: &[u8]) -> (ObjectId, IndexEntrySpec) {
        let oid = self.blob(content);
        self.write_file(rel, content);
        (oid, IndexEntrySpec::clean(self, rel, oid))
    }

    pub fn write_stash_log(&self, lines: usize) {
        let logs = self.gitdir().join("logs/refs");
        fs::create_dir_all(&logs).unwrap();
        let mut data = String::new();
        for i in 0..lines {
            data.push_str(&format!(
                "{0} {0} A <a@x> 1700000000 +0000\tstash entry {i}\n",
                "a".repeat(40)
            ));
        }
        fs::write(logs.join("stash"), data).unwrap();
    }
}

/// Options tuned for tests: exact counts, hermetic excludes.
pub fn test_options(threads: usize) -> Options {
    Options {
        num_threads: threads,
        limits: StatusLimits {
            max_staged: usize::MAX,
            max_unstaged: usize::MAX,
            max_conflicted: usize::MAX,
            max_untracked: usize::MAX,
            max_commits: 4096,
            max_index_size: usize::MAX,
            dirty_max_file_size: 8 * 1024 * 1024,
            verify_index_checksum: true,
        },
        cache_ttl: Duration::from_secs(3600),
        cache_cap: 16,
        recurse_ignored_dirs: false,
        use_global_excludes: false,
        log_level: tracing::Level::ERROR,
    }
}

/// Runs one request through a fresh daemon and returns the response line.
pub fn respond(opts: Options, repo_dir: &Path, id: &str, diff: bool) -> String {
    let mut daemon = Daemon::new(opts);
    respond_with(&mut daemon, repo_dir, id, diff)
}

/// Runs one request through an existing daemon.
pub fn respond_with(daemon: &mut Daemon, repo_dir: &Path, id: &str, diff: bool) -> String {
    let request = Request {
        id: id.as_bytes().to_vec(),
        dir: repo_dir.as_os_str().as_encoded_bytes().to_vec(),
        diff,
    };
    String::from_utf8(daemon.handle(&request)).unwrap()
}

/// Splits a response line into its tab-separated fields.
pub fn fields(line: &str) -> Vec<&str> {
    line.trim_end_matches('\n').split('\t').collect()
}
