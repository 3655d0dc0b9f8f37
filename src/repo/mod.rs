//! Repository discovery and the opened-repository handle.
//!
//! Discovery walks up from the requested path until it finds a `.git`
//! directory or file, resolving gitdir pointers (worktrees created with
//! `git worktree add`) and the `commondir` indirection for linked
//! worktrees. The resulting [`Repo`] owns the object database and config
//! and is shared read-only across the workers of a request.
//!
//! # Invariants
//! - `workdir` is canonical and has no trailing separator.
//! - `gitdir` holds per-worktree files (HEAD, index, state files).
//! - `commondir` holds shared files (objects, refs, packed-refs, config,
//!   logs). For an ordinary repository `commondir == gitdir`.

pub mod commits;
pub mod config;
pub mod odb;
pub mod oid;
pub mod pack;
pub mod refs;
pub mod stash;
pub mod state;
pub mod tags;
pub mod tree;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::RepoOpenError;
use config::Config;
use odb::Odb;

/// An opened repository.
pub struct Repo {
    workdir: PathBuf,
    gitdir: PathBuf,
    commondir: PathBuf,
    config: Config,
    odb: Odb,
}

impl Repo {
    /// Discovers the repository containing `path` and opens it.
    ///
    /// `path` may be any sub-path of a working tree; the handle is
    /// canonicalized to the repository root. Bare repositories are
    /// rejected: the daemon answers questions about working trees.
    pub fn discover(path: &Path) -> Result<Self, RepoOpenError> {
        let start = fs::canonicalize(path).map_err(RepoOpenError::Canonicalization)?;

        let mut dir: &Path = &start;
        loop {
            let dot_git = dir.join(".git");
            match fs::metadata(&dot_git) {
                Ok(meta) if meta.is_dir() => {
                    return Self::open_at(dir.to_path_buf(), dot_git);
                }
                Ok(meta) if meta.is_file() => {
                    let gitdir = read_gitdir_file(&dot_git, dir)?;
                    return Self::open_at(dir.to_path_buf(), gitdir);
                }
                Ok(_) => return Err(RepoOpenError::NotARepository),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(RepoOpenError::Io(err)),
            }
            dir = match dir.parent() {
                Some(parent) => parent,
                None => return Err(RepoOpenError::NotARepository),
            };
        }
    }

    fn open_at(workdir: PathBuf, gitdir: PathBuf) -> Result<Self, RepoOpenError> {
        let commondir = match fs::read(gitdir.join("commondir")) {
            Ok(data) => {
                let text = String::from_utf8_lossy(&data);
                let rel = text.trim();
                if rel.is_empty() {
                    return Err(RepoOpenError::MalformedCommondirFile);
                }
                let joined = if Path::new(rel).is_absolute() {
                    PathBuf::from(rel)
                } else {
                    gitdir.join(rel)
                };
                fs::canonicalize(&joined).map_err(|_| RepoOpenError::MalformedCommondirFile)?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => gitdir.clone(),
            Err(err) => return Err(RepoOpenError::Io(err)),
        };

        let config = Config::load(&commondir.join("config"));
        if config.get_bool("core.bare") == Some(true) {
            return Err(RepoOpenError::BareRepository);
        }

        let odb = Odb::open(&commondir.join("objects"));

        Ok(Self {
            workdir,
            gitdir,
            commondir,
            config,
            odb,
        })
    }

    #[inline]
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    #[inline]
    #[must_use]
    pub fn gitdir(&self) -> &Path {
        &self.gitdir
    }

    #[inline]
    #[must_use]
    pub fn commondir(&self) -> &Path {
        &self.commondir
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn odb(&self) -> &Odb {
        &self.odb
    }

    /// Path of the on-disk index for this worktree.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.gitdir.join("index")
    }

    /// Path of the repository-level exclude file.
    #[must_use]
    pub fn info_exclude_path(&self) -> PathBuf {
        self.commondir.join("info").join("exclude")
    }

    /// Path of `info/attributes`.
    #[must_use]
    pub fn info_attributes_path(&self) -> PathBuf {
        self.commondir.join("info").join("attributes")
    }
}

fn read_gitdir_file(dot_git: &Path, base: &Path) -> Result<PathBuf, RepoOpenError> {
    let data = fs::read(dot_git)?;
    let text = String::from_utf8_lossy(&data);
    let rel = text
        .trim()
        .strip_prefix("gitdir:")
        .ok_or(RepoOpenError::MalformedGitdirFile)?
        .trim();
    if rel.is_empty() {
        return Err(RepoOpenError::MalformedGitdirFile);
    }

    let target = if Path::new(rel).is_absolute() {
        PathBuf::from(rel)
    } else {
        base.join(rel)
    };
    let target = fs::canonicalize(&target).map_err(|_| RepoOpenError::GitdirTargetNotDir)?;
    if !target.is_dir() {
        return Err(RepoOpenError::GitdirTargetNotDir);
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("src/deep")).unwrap();

        let repo = Repo::discover(&root.join("src/deep")).unwrap();
        assert_eq!(repo.workdir(), fs::canonicalize(root).unwrap());
        assert_eq!(repo.gitdir(), repo.commondir());
    }

    #[test]
    fn non_repository_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Repo::discover(dir.path()),
            Err(RepoOpenError::NotARepository)
        ));
    }

    #[test]
    fn missing_path_fails_canonicalization() {
        assert!(matches!(
            Repo::discover(Path::new("/nonexistent/statusd-missing")),
            Err(RepoOpenError::Canonicalization(_))
        ));
    }

    #[test]
    fn gitdir_file_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let real_gitdir = root.join("real-gitdir");
        fs::create_dir_all(real_gitdir.join("objects")).unwrap();
        fs::create_dir_all(root.join("wt")).unwrap();
        fs::write(
            root.join("wt/.git"),
            format!("gitdir: {}\n", real_gitdir.display()),
        )
        .unwrap();

        let repo = Repo::discover(&root.join("wt")).unwrap();
        assert_eq!(repo.gitdir(), fs::canonicalize(&real_gitdir).unwrap());
    }

    #[test]
    fn bare_repository_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/config"), "[core]\n\tbare = true\n").unwrap();

        assert!(matches!(
            Repo::discover(root),
            Err(RepoOpenError::BareRepository)
        ));
    }
}
