//! Tag-at-head lookup.
//!
//! Scans `refs/tags` (loose and packed), peels annotated tags, and returns
//! the lexicographically-last tag whose peeled target is the head commit.
//! This query touches neither the index nor the working tree, which is why
//! the daemon runs it concurrently with the index passes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::repo::odb::{ObjectKind, Odb};
use crate::repo::oid::ObjectId;
use crate::repo::refs::PackedRefs;

/// Maximum annotated-tag nesting honored while peeling.
const MAX_PEEL_DEPTH: u32 = 10;

/// Returns the name of the last (byte-wise) tag pointing at `head`.
#[must_use]
pub fn tag_at_head(commondir: &Path, odb: &Odb, head: ObjectId) -> Option<String> {
    // name -> (oid, pre-peeled target). Loose refs shadow packed ones,
    // so packed entries only fill names not already collected.
    let mut tags: BTreeMap<Vec<u8>, (ObjectId, Option<ObjectId>)> = BTreeMap::new();

    let tags_dir = commondir.join("refs").join("tags");
    collect_loose(&tags_dir, &mut Vec::new(), &mut tags);

    let packed = PackedRefs::load(commondir);
    for entry in packed.iter_prefix(b"refs/tags/") {
        let name = entry.name[b"refs/tags/".len()..].to_vec();
        tags.entry(name).or_insert((entry.oid, entry.peeled));
    }

    let mut best = None;
    for (name, (oid, peeled)) in &tags {
        let target = match peeled {
            Some(peeled) => *peeled,
            None => peel(odb, *oid),
        };
        if target == head {
            best = Some(String::from_utf8_lossy(name).into_owned());
        }
    }
    best
}

fn collect_loose(
    dir: &Path,
    prefix: &mut Vec<u8>,
    out: &mut BTreeMap<Vec<u8>, (ObjectId, Option<ObjectId>)>,
) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name_os = entry.file_name();
        let name = name_os.as_encoded_bytes();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        let saved = prefix.len();
        if !prefix.is_empty() {
            prefix.push(b'/');
        }
        prefix.extend_from_slice(name);

        if file_type.is_dir() {
            collect_loose(&entry.path(), prefix, out);
        } else if let Ok(data) = fs::read(entry.path()) {
            let trimmed: Vec<u8> = data
                .iter()
                .copied()
                .take_while(|&b| b != b'\n' && b != b'\r')
                .collect();
            if let Some(oid) = ObjectId::from_hex(&trimmed) {
                out.insert(prefix.clone(), (oid, None));
            }
        }
        prefix.truncate(saved);
    }
}

/// Follows annotated-tag objects down to the tagged commit (or other
/// object). Unreadable objects peel to themselves, which simply never
/// matches a head commit.
fn peel(odb: &Odb, mut oid: ObjectId) -> ObjectId {
    for _ in 0..MAX_PEEL_DEPTH {
        match odb.read(&oid) {
            Ok((ObjectKind::Tag, data)) => match tag_target(&data) {
                Some(target) => oid = target,
                None => return oid,
            },
            _ => return oid,
        }
    }
    oid
}

/// Extracts the `object` line of an annotated tag.
fn tag_target(data: &[u8]) -> Option<ObjectId> {
    let line = data.split(|&b| b == b'\n').next()?;
    let rest = line.strip_prefix(b"object ")?;
    ObjectId::from_hex(rest)
}
