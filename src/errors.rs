//! Error types for the status daemon, one enum per stage.
//!
//! Errors are stage-specific to keep diagnostics precise. All enums are
//! `#[non_exhaustive]` so variants can be added without breaking callers;
//! consumers should include a fallback match arm.
//!
//! The error policy is applied in the request loop: a failed request emits
//! a response carrying only the request id and the loop continues. Nothing
//! in this module aborts the process.

use std::fmt;
use std::io;

/// Errors from repository discovery and open.
#[derive(Debug)]
#[non_exhaustive]
pub enum RepoOpenError {
    /// I/O error during discovery.
    Io(io::Error),
    /// Path canonicalization failed (missing directory, permission).
    Canonicalization(io::Error),
    /// No `.git` directory or file found walking up from the request path.
    NotARepository,
    /// The repository has no working directory (bare).
    BareRepository,
    /// The `.git` file is malformed (bad gitdir pointer).
    MalformedGitdirFile,
    /// The gitdir target doesn't exist or isn't a directory.
    GitdirTargetNotDir,
    /// The `commondir` file is malformed.
    MalformedCommondirFile,
    /// A ref or HEAD file could not be parsed.
    MalformedRef { name: String },
}

impl RepoOpenError {
    #[inline]
    pub fn io(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for RepoOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Canonicalization(err) => write!(f, "path canonicalization failed: {err}"),
            Self::NotARepository => write!(f, "not a git repository"),
            Self::BareRepository => write!(f, "repository has no working directory"),
            Self::MalformedGitdirFile => {
                write!(f, "malformed .git file (expected 'gitdir: <path>')")
            }
            Self::GitdirTargetNotDir => write!(f, "gitdir target is not a directory"),
            Self::MalformedCommondirFile => write!(f, "malformed commondir file"),
            Self::MalformedRef { name } => write!(f, "malformed ref: {name}"),
        }
    }
}

impl std::error::Error for RepoOpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) | Self::Canonicalization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RepoOpenError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from parsing the on-disk index.
///
/// The index may be rewritten concurrently by other processes; the parser
/// reads it into a private buffer and validates structure, surfacing any
/// inconsistency here rather than producing a bogus snapshot.
#[derive(Debug)]
#[non_exhaustive]
pub enum IndexError {
    /// I/O error reading the index file.
    Io(io::Error),
    /// File too small to hold a header.
    TooSmall { len: usize },
    /// Bad signature (expected `DIRC`).
    BadSignature,
    /// Unsupported index version.
    UnsupportedVersion { version: u32 },
    /// Entry data extends past the end of the file.
    Truncated,
    /// Entry path is malformed (missing terminator, bad compression).
    MalformedPath,
    /// Entries are not strictly ordered by (path, stage).
    Unordered,
    /// Extension record is malformed.
    MalformedExtension,
    /// Trailing checksum does not match file content.
    ChecksumMismatch,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::TooSmall { len } => write!(f, "index file too small: {len} bytes"),
            Self::BadSignature => write!(f, "bad index signature (expected DIRC)"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported index version: {version}")
            }
            Self::Truncated => write!(f, "index entry extends past end of file"),
            Self::MalformedPath => write!(f, "malformed index entry path"),
            Self::Unordered => write!(f, "index entries not ordered by (path, stage)"),
            Self::MalformedExtension => write!(f, "malformed index extension"),
            Self::ChecksumMismatch => write!(f, "index checksum mismatch"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for IndexError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from the object database (loose objects and packs).
#[derive(Debug)]
#[non_exhaustive]
pub enum OdbError {
    /// I/O error reading object data.
    Io(io::Error),
    /// Object not present in any loose directory or pack.
    NotFound,
    /// Loose object or pack entry is corrupt.
    CorruptObject { detail: &'static str },
    /// Pack index has an unsupported version or layout.
    UnsupportedPackIndex,
    /// Delta chain exceeded the hard depth cap.
    DeltaChainTooDeep { depth: u32 },
    /// Object exists but has an unexpected kind for the operation.
    UnexpectedKind,
}

impl fmt::Display for OdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::NotFound => write!(f, "object not found"),
            Self::CorruptObject { detail } => write!(f, "corrupt object: {detail}"),
            Self::UnsupportedPackIndex => write!(f, "unsupported pack index"),
            Self::DeltaChainTooDeep { depth } => {
                write!(f, "delta chain too deep: {depth}")
            }
            Self::UnexpectedKind => write!(f, "unexpected object kind"),
        }
    }
}

impl std::error::Error for OdbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for OdbError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from the diff passes (staged/unstaged/conflicted/untracked).
///
/// Worker failures never cross the pool boundary as panics; they are
/// captured per task and surfaced here when the batch joins.
#[derive(Debug)]
#[non_exhaustive]
pub enum ScanError {
    /// Unexpected filesystem failure during a scan.
    Io(io::Error),
    /// Index could not be parsed.
    Index(IndexError),
    /// Object database failure while walking the head tree.
    Odb(OdbError),
    /// A worker task panicked; the request is aborted.
    WorkerPanic,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error during scan: {err}"),
            Self::Index(err) => write!(f, "{err}"),
            Self::Odb(err) => write!(f, "{err}"),
            Self::WorkerPanic => write!(f, "worker panicked during scan"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Index(err) => Some(err),
            Self::Odb(err) => Some(err),
            Self::WorkerPanic => None,
        }
    }
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<IndexError> for ScanError {
    fn from(err: IndexError) -> Self {
        Self::Index(err)
    }
}

impl From<OdbError> for ScanError {
    fn from(err: OdbError) -> Self {
        Self::Odb(err)
    }
}

/// Errors from parsing a request line.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestParseError {
    /// Line has no fields at all.
    Empty,
    /// Line has a field count outside 2..=3.
    FieldCount { got: usize },
    /// `diff_flag` is neither "0" nor "1".
    BadDiffFlag,
}

impl fmt::Display for RequestParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty request line"),
            Self::FieldCount { got } => {
                write!(f, "bad request field count: {got} (expected 2 or 3)")
            }
            Self::BadDiffFlag => write!(f, "diff flag must be \"0\" or \"1\""),
        }
    }
}

impl std::error::Error for RequestParseError {}
