//! Object lookup over loose directories and packs.
//!
//! The store is opened once per repository and shared read-only across
//! workers for the lifetime of the cache entry. Packs are scanned at open;
//! a lookup miss triggers one rescan of the pack directory before giving
//! up, which covers repacks performed while the handle is cached.
//!
//! Alternate object directories (`objects/info/alternates`) are honored one
//! level deep, which matches how they are written in practice.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use flate2::read::ZlibDecoder;
use memchr::memchr;

use crate::errors::OdbError;
use crate::repo::oid::ObjectId;
use crate::repo::pack::Pack;

/// Maximum alternate object directories honored.
const MAX_ALTERNATES: usize = 16;
/// Cap on a single decompressed loose object.
const MAX_LOOSE_OBJECT_BYTES: u64 = 1 << 31;

/// Kind of a stored object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    fn from_header(name: &[u8]) -> Option<Self> {
        match name {
            b"commit" => Some(Self::Commit),
            b"tree" => Some(Self::Tree),
            b"blob" => Some(Self::Blob),
            b"tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

/// Read-only object database handle.
pub struct Odb {
    roots: Vec<PathBuf>,
    packs: RwLock<Vec<Arc<Pack>>>,
    refreshed: AtomicBool,
}

impl Odb {
    /// Opens the store rooted at `objects_dir`.
    ///
    /// Unreadable packs are skipped; an unborn repository with no objects
    /// directory content yields a store where every lookup misses.
    pub fn open(objects_dir: &Path) -> Self {
        let mut roots = vec![objects_dir.to_path_buf()];
        roots.extend(read_alternates(objects_dir));
        let packs = scan_packs(&roots);
        Self {
            roots,
            packs: RwLock::new(packs),
            refreshed: AtomicBool::new(false),
        }
    }

    /// Reads an object, returning its kind and full content.
    pub fn read(&self, oid: &ObjectId) -> Result<(ObjectKind, Vec<u8>), OdbError> {
        if let Some(result) = self.read_packed(oid)? {
            return Ok(result);
        }
        match self.read_loose(oid) {
            Ok(Some(result)) => return Ok(result),
            Ok(None) => {}
            Err(err) => return Err(err),
        }

        // One rescan covers packs created since open (e.g. by `git gc`).
        if !self.refreshed.swap(true, Ordering::AcqRel) {
            let rescanned = scan_packs(&self.roots);
            *self.packs.write().unwrap_or_else(|e| e.into_inner()) = rescanned;
            if let Some(result) = self.read_packed(oid)? {
                return Ok(result);
            }
        }
        Err(OdbError::NotFound)
    }

    /// Reads an object and checks its kind.
    pub fn read_kind(&self, oid: &ObjectId, want: ObjectKind) -> Result<Vec<u8>, OdbError> {
        let (kind, data) = self.read(oid)?;
        if kind != want {
            return Err(OdbError::UnexpectedKind);
        }
        Ok(data)
    }

    fn read_packed(&self, oid: &ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>, OdbError> {
        let packs = self.packs.read().unwrap_or_else(|e| e.into_inner());
        for pack in packs.iter() {
            if let Some(offset) = pack.lookup(oid) {
                return pack.read_at(offset).map(Some);
            }
        }
        Ok(None)
    }

    fn read_loose(&self, oid: &ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>, OdbError> {
        let mut hex = Vec::with_capacity(ObjectId::HEX_LEN);
        oid.write_hex(&mut hex);
        let (fan, rest) = hex.split_at(2);
        let rel: PathBuf = [
            std::str::from_utf8(fan).expect("hex is ascii"),
            std::str::from_utf8(rest).expect("hex is ascii"),
        ]
        .iter()
        .collect();

        for root in &self.roots {
            let path = root.join(&rel);
            let compressed = match fs::read(&path) {
                Ok(data) => data,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            return parse_loose(&compressed).map(Some);
        }
        Ok(None)
    }
}

fn parse_loose(compressed: &[u8]) -> Result<(ObjectKind, Vec<u8>), OdbError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut raw = Vec::new();
    decoder
        .by_ref()
        .take(MAX_LOOSE_OBJECT_BYTES)
        .read_to_end(&mut raw)
        .map_err(|_| OdbError::CorruptObject {
            detail: "loose object inflate failed",
        })?;

    let nul = memchr(0, &raw).ok_or(OdbError::CorruptObject {
        detail: "loose object missing header terminator",
    })?;
    let header = &raw[..nul];
    let space = memchr(b' ', header).ok_or(OdbError::CorruptObject {
        detail: "loose object malformed header",
    })?;
    let kind = ObjectKind::from_header(&header[..space]).ok_or(OdbError::CorruptObject {
        detail: "loose object unknown kind",
    })?;
    let size: usize = std::str::from_utf8(&header[space + 1..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(OdbError::CorruptObject {
            detail: "loose object bad size",
        })?;

    let content = raw.split_off(nul + 1);
    if content.len() != size {
        return Err(OdbError::CorruptObject {
            detail: "loose object size mismatch",
        });
    }
    Ok((kind, content))
}

fn read_alternates(objects_dir: &Path) -> Vec<PathBuf> {
    let Ok(data) = fs::read(objects_dir.join("info").join("alternates")) else {
        return Vec::new();
    };
    data.split(|&b| b == b'\n')
        .filter(|line| !line.is_empty() && line[0] != b'#')
        .take(MAX_ALTERNATES)
        .map(|line| {
            let text = String::from_utf8_lossy(line);
            let path = Path::new(text.trim());
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                objects_dir.join(path)
            }
        })
        .collect()
}

fn scan_packs(roots: &[PathBuf]) -> Vec<Arc<Pack>> {
    let mut packs = Vec::new();
    for root in roots {
        let Ok(dir) = fs::read_dir(root.join("pack")) else {
            continue;
        };
        let mut idx_paths: Vec<PathBuf> = dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "idx"))
            .collect();
        idx_paths.sort();
        for idx_path in idx_paths {
            if let Ok(pack) = Pack::open(&idx_path) {
                packs.push(Arc::new(pack));
            }
        }
    }
    packs
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use sha1::{Digest, Sha1};
    use std::io::Write;

    fn write_loose(objects: &Path, kind: &str, content: &[u8]) -> ObjectId {
        let mut hasher = Sha1::new();
        hasher.update(format!("{kind} {}\0", content.len()).as_bytes());
        hasher.update(content);
        let bytes: [u8; 20] = hasher.finalize().into();
        let oid = ObjectId::from_bytes(bytes);

        let hex = format!("{oid}");
        let dir = objects.join(&hex[..2]);
        fs::create_dir_all(&dir).unwrap();
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(format!("{kind} {}\0", content.len()).as_bytes())
            .unwrap();
        enc.write_all(content).unwrap();
        fs::write(dir.join(&hex[2..]), enc.finish().unwrap()).unwrap();
        oid
    }

    #[test]
    fn reads_loose_objects() {
        let dir = tempfile::tempdir().unwrap();
        let oid = write_loose(dir.path(), "blob", b"loose content");

        let odb = Odb::open(dir.path());
        let (kind, content) = odb.read(&oid).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(content, b"loose content");
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let odb = Odb::open(dir.path());
        let missing = ObjectId::from_bytes([0x33; 20]);
        assert!(matches!(odb.read(&missing), Err(OdbError::NotFound)));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let oid = write_loose(dir.path(), "blob", b"x");

        let odb = Odb::open(dir.path());
        assert!(matches!(
            odb.read_kind(&oid, ObjectKind::Tree),
            Err(OdbError::UnexpectedKind)
        ));
    }

    #[test]
    fn alternates_are_searched() {
        let main = tempfile::tempdir().unwrap();
        let alt = tempfile::tempdir().unwrap();
        let oid = write_loose(alt.path(), "blob", b"from alternate");

        fs::create_dir_all(main.path().join("info")).unwrap();
        fs::write(
            main.path().join("info").join("alternates"),
            format!("{}\n", alt.path().display()),
        )
        .unwrap();

        let odb = Odb::open(main.path());
        let (_, content) = odb.read(&oid).unwrap();
        assert_eq!(content, b"from alternate");
    }
}
