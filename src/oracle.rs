//! Attribute & ignore oracle.
//!
//! Wraps the `ignore` crate's gitignore matchers and a small
//! `.gitattributes` reader behind the two questions the scans ask:
//! *is this path excluded?* and *does text conversion apply when hashing
//! this file?*
//!
//! Ignore decisions follow git's precedence: per-directory `.gitignore`
//! files from innermost to outermost, then `$GIT_DIR/info/exclude`, then
//! the user-global exclude file. Per-directory matchers are built during
//! the walk's descent and shared through the parent chain, so each
//! `.gitignore` is parsed at most once per request.

use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::repo::Repo;

/// Outcome of matching a path against one layer of ignore rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IgnoreMatch {
    None,
    Ignored,
    Whitelisted,
}

fn to_match(m: ignore::Match<&ignore::gitignore::Glob>) -> IgnoreMatch {
    if m.is_ignore() {
        IgnoreMatch::Ignored
    } else if m.is_whitelist() {
        IgnoreMatch::Whitelisted
    } else {
        IgnoreMatch::None
    }
}

/// Request-scoped ignore state: the low-precedence layers shared by every
/// directory of the walk.
pub struct IgnoreOracle {
    workdir: PathBuf,
    info_exclude: Option<Gitignore>,
    global_exclude: Option<Gitignore>,
}

impl IgnoreOracle {
    /// Builds the oracle for one repository.
    ///
    /// `use_global_excludes` controls whether `core.excludesFile` (or its
    /// XDG default) is consulted; tests disable it for hermeticity.
    #[must_use]
    pub fn new(repo: &Repo, use_global_excludes: bool) -> Self {
        let workdir = repo.workdir().to_path_buf();

        let info_exclude = build_rooted(&workdir, &repo.info_exclude_path());

        let global_exclude = if use_global_excludes {
            global_excludes_path(repo).and_then(|path| build_rooted(&workdir, &path))
        } else {
            None
        };

        Self {
            workdir,
            info_exclude,
            global_exclude,
        }
    }

    #[inline]
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Chain node for the working-directory root.
    #[must_use]
    pub fn root_node(self: &Arc<Self>) -> Arc<DirIgnores> {
        Arc::new(DirIgnores {
            oracle: Arc::clone(self),
            parent: None,
            rel_len: 0,
            matcher: load_dir_matcher(&self.workdir),
        })
    }

    fn low_precedence(&self, rel: &Path, is_dir: bool) -> IgnoreMatch {
        if let Some(info) = &self.info_exclude {
            let m = to_match(info.matched(rel, is_dir));
            if m != IgnoreMatch::None {
                return m;
            }
        }
        if let Some(global) = &self.global_exclude {
            let m = to_match(global.matched(rel, is_dir));
            if m != IgnoreMatch::None {
                return m;
            }
        }
        IgnoreMatch::None
    }
}

/// One directory's ignore rules, linked to its parent.
pub struct DirIgnores {
    oracle: Arc<IgnoreOracle>,
    parent: Option<Arc<DirIgnores>>,
    /// Length of this directory's workdir-relative path plus its trailing
    /// slash (0 for the root), used to slice candidate paths.
    rel_len: usize,
    matcher: Option<Gitignore>,
}

impl DirIgnores {
    /// Chain node for a child directory `name` at absolute path `abs`.
    #[must_use]
    pub fn child(self: &Arc<Self>, name: &[u8], abs: &Path) -> Arc<DirIgnores> {
        Arc::new(DirIgnores {
            oracle: Arc::clone(&self.oracle),
            parent: Some(Arc::clone(self)),
            rel_len: self.rel_len + name.len() + 1,
            matcher: load_dir_matcher(abs),
        })
    }

    /// Decides whether `rel` (workdir-relative path of an entry in this
    /// directory) is excluded. `under_ignored` carries the state of
    /// enclosing ignored directories: contents of an ignored directory stay
    /// ignored unless re-included by a negated pattern.
    #[must_use]
    pub fn is_excluded(&self, rel: &[u8], is_dir: bool, under_ignored: bool) -> bool {
        // Innermost .gitignore wins.
        let mut node = Some(self);
        while let Some(current) = node {
            if let Some(matcher) = &current.matcher {
                let sub = bytes_path(&rel[current.rel_len..]);
                match to_match(matcher.matched(sub, is_dir)) {
                    IgnoreMatch::Ignored => return true,
                    IgnoreMatch::Whitelisted => return false,
                    IgnoreMatch::None => {}
                }
            }
            node = current.parent.as_deref();
        }

        match self.oracle.low_precedence(bytes_path(rel), is_dir) {
            IgnoreMatch::Ignored => true,
            IgnoreMatch::Whitelisted => false,
            IgnoreMatch::None => under_ignored,
        }
    }
}

#[inline]
fn bytes_path(bytes: &[u8]) -> &Path {
    Path::new(std::ffi::OsStr::from_bytes(bytes))
}

fn load_dir_matcher(dir: &Path) -> Option<Gitignore> {
    let path = dir.join(".gitignore");
    if !path.is_file() {
        return None;
    }
    let (matcher, _err) = Gitignore::new(&path);
    Some(matcher)
}

fn build_rooted(root: &Path, file: &Path) -> Option<Gitignore> {
    if !file.is_file() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(root);
    builder.add(file);
    builder.build().ok()
}

fn global_excludes_path(repo: &Repo) -> Option<PathBuf> {
    if let Some(configured) = repo.config().get("core.excludesfile") {
        return Some(expand_home(configured));
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("git").join("ignore"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/git/ignore"))
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Text-conversion policy derived from `.gitattributes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextPolicy {
    /// No attribute matched.
    Unspecified,
    /// `text=auto`: normalize when content looks like text.
    Auto,
    /// `text` / `eol=...`: always normalize.
    Text,
    /// `-text` / `binary`: never normalize.
    Binary,
}

/// Compiled patterns of one `.gitattributes` file.
struct AttrFile {
    set: GlobSet,
    policies: Vec<TextPolicy>,
}

impl AttrFile {
    fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read(path).ok()?;
        Self::parse(&data)
    }

    fn parse(data: &[u8]) -> Option<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut policies = Vec::new();

        for line in data.split(|&b| b == b'\n') {
            let text = String::from_utf8_lossy(line);
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let Some(pattern) = fields.next() else {
                continue;
            };

            let mut policy = None;
            for attr in fields {
                match attr {
                    "text" | "crlf" => policy = Some(TextPolicy::Text),
                    "-text" | "-crlf" | "binary" => policy = Some(TextPolicy::Binary),
                    "text=auto" => policy = Some(TextPolicy::Auto),
                    _ if attr.starts_with("eol=") => policy = Some(TextPolicy::Text),
                    _ => {}
                }
            }
            let Some(policy) = policy else {
                continue;
            };

            // Patterns without a slash match the basename anywhere below
            // the attributes file; anchored patterns match relative to it.
            let glob_text = if pattern.contains('/') {
                pattern.trim_start_matches('/').to_string()
            } else {
                format!("**/{pattern}")
            };
            let Ok(glob) = GlobBuilder::new(&glob_text).literal_separator(true).build() else {
                continue;
            };
            builder.add(glob);
            policies.push(policy);
        }

        if policies.is_empty() {
            return None;
        }
        let set = builder.build().ok()?;
        Some(Self { set, policies })
    }

    /// Last matching pattern wins, per gitattributes semantics.
    fn match_policy(&self, rel: &Path) -> Option<TextPolicy> {
        self.set
            .matches(rel)
            .into_iter()
            .max()
            .map(|idx| self.policies[idx])
    }
}

/// Request-scoped attribute state shared across workers.
pub struct AttrOracle {
    workdir: PathBuf,
    info: Option<AttrFile>,
    /// `core.autocrlf` is `true` or `input`: unspecified files normalize
    /// when their content looks like text.
    autocrlf_text: bool,
}

impl AttrOracle {
    #[must_use]
    pub fn new(repo: &Repo) -> Self {
        let autocrlf_text = match repo.config().get("core.autocrlf") {
            Some(value) => {
                value.eq_ignore_ascii_case("input") || matches!(value, "true" | "1" | "yes" | "on")
            }
            None => false,
        };
        Self {
            workdir: repo.workdir().to_path_buf(),
            info: AttrFile::load(&repo.info_attributes_path()),
            autocrlf_text,
        }
    }

    #[inline]
    #[must_use]
    pub fn autocrlf_text(&self) -> bool {
        self.autocrlf_text
    }
}

/// Per-worker attribute lookup with a directory-chain memo.
///
/// Not thread-safe; each unstaged-pass worker owns one.
pub struct AttrLookup<'a> {
    oracle: &'a AttrOracle,
    /// dir rel-path -> `.gitattributes` chain from root to that dir, each
    /// with the byte length of its directory prefix (including `/`).
    chains: AHashMap<Vec<u8>, Arc<Vec<(usize, Arc<AttrFile>)>>>,
}

impl<'a> AttrLookup<'a> {
    #[must_use]
    pub fn new(oracle: &'a AttrOracle) -> Self {
        Self {
            oracle,
            chains: AHashMap::new(),
        }
    }

    /// Effective text policy for a workdir-relative file path.
    pub fn text_policy(&mut self, rel: &[u8]) -> TextPolicy {
        let dir_len = memchr::memrchr(b'/', rel).map_or(0, |i| i + 1);
        let chain = self.chain(&rel[..dir_len]);

        let mut policy = TextPolicy::Unspecified;
        for (prefix_len, file) in chain.iter() {
            if let Some(found) = file.match_policy(bytes_path(&rel[*prefix_len..])) {
                policy = found;
            }
        }
        if let Some(info) = &self.oracle.info {
            if let Some(found) = info.match_policy(bytes_path(rel)) {
                policy = found;
            }
        }
        policy
    }

    /// Chain of attribute files for a directory prefix (`""` or `"a/b/"`).
    fn chain(&mut self, dir: &[u8]) -> Arc<Vec<(usize, Arc<AttrFile>)>> {
        if let Some(found) = self.chains.get(dir) {
            return Arc::clone(found);
        }

        let chain = if dir.is_empty() {
            let mut files = Vec::new();
            if let Some(file) = AttrFile::load(&self.oracle.workdir.join(".gitattributes")) {
                files.push((0usize, Arc::new(file)));
            }
            Arc::new(files)
        } else {
            // dir ends with '/'; parent prefix is everything up to and
            // including the previous slash.
            let parent_len = memchr::memrchr(b'/', &dir[..dir.len() - 1]).map_or(0, |i| i + 1);
            let parent = self.chain(&dir[..parent_len]);
            let abs = self.oracle.workdir.join(bytes_path(&dir[..dir.len() - 1]));
            match AttrFile::load(&abs.join(".gitattributes")) {
                Some(file) => {
                    let mut files = parent.as_ref().clone();
                    files.push((dir.len(), Arc::new(file)));
                    Arc::new(files)
                }
                None => parent,
            }
        };

        self.chains.insert(dir.to_vec(), Arc::clone(&chain));
        chain
    }
}
