//! Reference resolution: HEAD, loose refs, packed-refs, upstream lookup.
//!
//! Loose refs take precedence over packed entries with the same name.
//! Symref chains are followed to a small fixed depth; deeper chains are
//! treated as malformed.

use std::fs;
use std::io;
use std::path::Path;

use crate::errors::RepoOpenError;
use crate::repo::config::Config;
use crate::repo::oid::ObjectId;

/// Maximum symref hops when resolving a reference.
const MAX_SYMREF_DEPTH: u32 = 5;

/// Resolved HEAD state.
#[derive(Clone, Debug)]
pub struct HeadInfo {
    /// Commit at HEAD; `None` for an unborn branch.
    pub oid: Option<ObjectId>,
    /// Short branch name; `None` when detached.
    pub branch: Option<String>,
}

/// Reads and resolves `HEAD`.
///
/// An unborn branch (symref to a ref that does not exist yet) yields
/// `oid: None` with the branch name set, which is how fresh repositories
/// report their default branch.
pub fn read_head(gitdir: &Path, commondir: &Path) -> Result<HeadInfo, RepoOpenError> {
    let raw = fs::read(gitdir.join("HEAD")).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => RepoOpenError::MalformedRef {
            name: "HEAD".to_string(),
        },
        _ => RepoOpenError::Io(err),
    })?;
    let text = trim_ref_line(&raw);

    if let Some(target) = text.strip_prefix(b"ref: ") {
        let name = String::from_utf8_lossy(target).into_owned();
        let branch = name
            .strip_prefix("refs/heads/")
            .map(str::to_string)
            .or_else(|| Some(name.clone()));
        let oid = resolve_ref(commondir, &name)?;
        return Ok(HeadInfo { oid, branch });
    }

    match ObjectId::from_hex(text) {
        Some(oid) => Ok(HeadInfo {
            oid: Some(oid),
            branch: None,
        }),
        None => Err(RepoOpenError::MalformedRef {
            name: "HEAD".to_string(),
        }),
    }
}

/// Resolves a fully-qualified ref name to a commit-ish id.
///
/// Returns `Ok(None)` when the ref does not exist (loose or packed).
pub fn resolve_ref(commondir: &Path, name: &str) -> Result<Option<ObjectId>, RepoOpenError> {
    let mut name = name.to_string();
    for _ in 0..MAX_SYMREF_DEPTH {
        match fs::read(commondir.join(&name)) {
            Ok(raw) => {
                let text = trim_ref_line(&raw);
                if let Some(target) = text.strip_prefix(b"ref: ") {
                    name = String::from_utf8_lossy(target).into_owned();
                    continue;
                }
                return match ObjectId::from_hex(text) {
                    Some(oid) => Ok(Some(oid)),
                    None => Err(RepoOpenError::MalformedRef { name }),
                };
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let packed = PackedRefs::load(commondir);
                return Ok(packed.find(name.as_bytes()).map(|r| r.oid));
            }
            Err(err) => return Err(RepoOpenError::Io(err)),
        }
    }
    Err(RepoOpenError::MalformedRef {
        name: "HEAD".to_string(),
    })
}

fn trim_ref_line(raw: &[u8]) -> &[u8] {
    let mut text = raw;
    while let Some((&last, rest)) = text.split_last() {
        if last == b'\n' || last == b'\r' || last == b' ' {
            text = rest;
        } else {
            break;
        }
    }
    text
}

/// One entry of `packed-refs`.
#[derive(Clone, Debug)]
pub struct PackedRef {
    pub name: Vec<u8>,
    pub oid: ObjectId,
    /// Pre-peeled target for annotated tags (`^` continuation lines).
    pub peeled: Option<ObjectId>,
}

/// Parsed `packed-refs` file, sorted by name.
#[derive(Debug, Default)]
pub struct PackedRefs {
    entries: Vec<PackedRef>,
}

impl PackedRefs {
    /// Loads and parses `packed-refs`; a missing file yields no entries.
    #[must_use]
    pub fn load(commondir: &Path) -> Self {
        let Ok(data) = fs::read(commondir.join("packed-refs")) else {
            return Self::default();
        };
        Self::parse(&data)
    }

    /// Parses packed-refs text. Malformed lines are skipped.
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        let mut entries: Vec<PackedRef> = Vec::new();
        for line in data.split(|&b| b == b'\n') {
            if line.is_empty() || line[0] == b'#' {
                continue;
            }
            if line[0] == b'^' {
                if let (Some(last), Some(oid)) =
                    (entries.last_mut(), ObjectId::from_hex(trim_ref_line(&line[1..])))
                {
                    last.peeled = Some(oid);
                }
                continue;
            }
            let Some(space) = memchr::memchr(b' ', line) else {
                continue;
            };
            let Some(oid) = ObjectId::from_hex(&line[..space]) else {
                continue;
            };
            let name = trim_ref_line(&line[space + 1..]).to_vec();
            if name.is_empty() {
                continue;
            }
            entries.push(PackedRef {
                name,
                oid,
                peeled: None,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    /// Looks up a ref by full name.
    #[must_use]
    pub fn find(&self, name: &[u8]) -> Option<&PackedRef> {
        let idx = self
            .entries
            .binary_search_by(|entry| entry.name.as_slice().cmp(name))
            .ok()?;
        Some(&self.entries[idx])
    }

    /// All entries whose name starts with `prefix`, in name order.
    pub fn iter_prefix<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = &'a PackedRef> {
        let start = self
            .entries
            .partition_point(|entry| entry.name.as_slice() < prefix);
        self.entries[start..]
            .iter()
            .take_while(move |entry| entry.name.starts_with(prefix))
    }
}

/// Upstream of the checked-out branch.
#[derive(Clone, Debug)]
pub struct Upstream {
    /// Short branch name on the remote (e.g. `main`).
    pub branch: String,
    /// Remote name (e.g. `origin`, or `.` for a local upstream).
    pub remote: String,
    /// Remote URL; empty for local upstreams.
    pub url: String,
    /// Tip of the remote-tracking ref.
    pub tip: ObjectId,
}

/// Resolves the upstream of `branch` from config plus the tracking ref.
///
/// Mirrors `git branch --set-upstream` semantics: both `branch.<name>.remote`
/// and `branch.<name>.merge` must be set, and the remote-tracking ref must
/// actually exist, otherwise there is no upstream to report.
pub fn upstream_for_branch(
    config: &Config,
    commondir: &Path,
    branch: &str,
) -> Result<Option<Upstream>, RepoOpenError> {
    let Some(remote) = config.get(&format!("branch.{branch}.remote")) else {
        return Ok(None);
    };
    let Some(merge) = config.get(&format!("branch.{branch}.merge")) else {
        return Ok(None);
    };
    let short = merge.strip_prefix("refs/heads/").unwrap_or(merge);

    let tracking = if remote == "." {
        merge.to_string()
    } else {
        format!("refs/remotes/{remote}/{short}")
    };
    let Some(tip) = resolve_ref(commondir, &tracking)? else {
        return Ok(None);
    };

    let url = if remote == "." {
        String::new()
    } else {
        config
            .get(&format!("remote.{remote}.url"))
            .unwrap_or_default()
            .to_string()
    };

    Ok(Some(Upstream {
        branch: short.to_string(),
        remote: remote.to_string(),
        url,
        tip,
    }))
}
