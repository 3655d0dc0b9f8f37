//! Pack and pack-index readers.
//!
//! Packs are memory-mapped read-only and consulted for every object lookup
//! that misses the loose directories. Only version-2 pack indexes are
//! supported (git has written v2 exclusively for well over a decade);
//! anything else surfaces as `UnsupportedPackIndex`.
//!
//! Delta chains are resolved recursively with a hard depth cap so a corrupt
//! pack cannot recurse unboundedly. Ref-delta bases are required to live in
//! the same pack: on-disk packs are self-contained (thin packs only exist
//! on the wire).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use memmap2::Mmap;

use crate::errors::OdbError;
use crate::repo::odb::ObjectKind;
use crate::repo::oid::ObjectId;

const IDX_MAGIC: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];
const IDX_HEADER_LEN: usize = 8;
const FANOUT_LEN: usize = 256 * 4;
/// Trailing pack checksum + idx checksum.
const IDX_TRAILER_LEN: usize = 40;

const PACK_HEADER_LEN: usize = 12;

/// Hard cap on delta recursion. Git's own writers stay far below this.
const MAX_DELTA_DEPTH: u32 = 64;

const OBJ_COMMIT: u8 = 1;
const OBJ_TREE: u8 = 2;
const OBJ_BLOB: u8 = 3;
const OBJ_TAG: u8 = 4;
const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

/// One mapped pack file with its index.
pub struct Pack {
    idx: Mmap,
    data: Mmap,
    count: usize,
    oid_table_off: usize,
    offset_table_off: usize,
    large_table_off: usize,
    large_count: usize,
}

impl Pack {
    /// Opens `<base>.pack` and `<base>.idx` given the path of either file.
    pub fn open(pack_path: &Path) -> Result<Self, OdbError> {
        let idx_path = pack_path.with_extension("idx");
        let data_path = pack_path.with_extension("pack");

        let idx = map_file(&idx_path)?;
        let data = map_file(&data_path)?;

        if idx.len() < IDX_HEADER_LEN + FANOUT_LEN + IDX_TRAILER_LEN {
            return Err(OdbError::UnsupportedPackIndex);
        }
        if idx[..4] != IDX_MAGIC {
            // A v1 index has no magic; either way we cannot read it.
            return Err(OdbError::UnsupportedPackIndex);
        }
        let version = be_u32(&idx, 4);
        if version != 2 {
            return Err(OdbError::UnsupportedPackIndex);
        }

        let count = be_u32(&idx, IDX_HEADER_LEN + 255 * 4) as usize;
        let oid_table_off = IDX_HEADER_LEN + FANOUT_LEN;
        let crc_table_off = oid_table_off + count * 20;
        let offset_table_off = crc_table_off + count * 4;
        let large_table_off = offset_table_off + count * 4;

        let min_len = large_table_off + IDX_TRAILER_LEN;
        if idx.len() < min_len || (idx.len() - min_len) % 8 != 0 {
            return Err(OdbError::UnsupportedPackIndex);
        }
        let large_count = (idx.len() - min_len) / 8;

        if data.len() < PACK_HEADER_LEN + 20 || &data[..4] != b"PACK" {
            return Err(OdbError::CorruptObject {
                detail: "bad pack header",
            });
        }

        Ok(Self {
            idx,
            data,
            count,
            oid_table_off,
            offset_table_off,
            large_table_off,
            large_count,
        })
    }

    /// Number of objects in this pack.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Looks up an object id, returning its pack data offset.
    #[must_use]
    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        let first_byte = oid.first_byte() as usize;
        let lo = if first_byte == 0 {
            0
        } else {
            be_u32(&self.idx, IDX_HEADER_LEN + (first_byte - 1) * 4) as usize
        };
        let hi = be_u32(&self.idx, IDX_HEADER_LEN + first_byte * 4) as usize;
        if lo > hi || hi > self.count {
            return None;
        }

        let target = oid.as_bytes();
        let mut lo = lo;
        let mut hi = hi;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let off = self.oid_table_off + mid * 20;
            let probe = &self.idx[off..off + 20];
            match probe.cmp(&target[..]) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return self.offset_at(mid),
            }
        }
        None
    }

    fn offset_at(&self, pos: usize) -> Option<u64> {
        let raw = be_u32(&self.idx, self.offset_table_off + pos * 4);
        if raw & 0x8000_0000 == 0 {
            return Some(raw as u64);
        }
        let large_idx = (raw & 0x7fff_ffff) as usize;
        if large_idx >= self.large_count {
            return None;
        }
        let off = self.large_table_off + large_idx * 8;
        let bytes: [u8; 8] = self.idx[off..off + 8].try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Decodes the object stored at `offset`, resolving delta chains.
    pub fn read_at(&self, offset: u64) -> Result<(ObjectKind, Vec<u8>), OdbError> {
        self.read_at_depth(offset, 0)
    }

    fn read_at_depth(&self, offset: u64, depth: u32) -> Result<(ObjectKind, Vec<u8>), OdbError> {
        if depth > MAX_DELTA_DEPTH {
            return Err(OdbError::DeltaChainTooDeep { depth });
        }
        let offset = offset as usize;
        if offset < PACK_HEADER_LEN || offset >= self.data.len() {
            return Err(OdbError::CorruptObject {
                detail: "pack offset out of range",
            });
        }

        let (obj_type, size, header_len) = decode_entry_header(&self.data[offset..])?;
        let body = &self.data[offset + header_len..];

        match obj_type {
            OBJ_COMMIT | OBJ_TREE | OBJ_BLOB | OBJ_TAG => {
                let kind = match obj_type {
                    OBJ_COMMIT => ObjectKind::Commit,
                    OBJ_TREE => ObjectKind::Tree,
                    OBJ_TAG => ObjectKind::Tag,
                    _ => ObjectKind::Blob,
                };
                Ok((kind, inflate(body, size)?))
            }
            OBJ_OFS_DELTA => {
                let (neg, consumed) = decode_ofs_base(body)?;
                let base_offset = (offset as u64)
                    .checked_sub(neg)
                    .ok_or(OdbError::CorruptObject {
                        detail: "ofs-delta base before pack start",
                    })?;
                let (kind, base) = self.read_at_depth(base_offset, depth + 1)?;
                let delta = inflate(&body[consumed..], size)?;
                Ok((kind, apply_delta(&base, &delta)?))
            }
            OBJ_REF_DELTA => {
                let base_oid =
                    ObjectId::try_from_slice(body.get(..20).ok_or(OdbError::CorruptObject {
                        detail: "truncated ref-delta base",
                    })?)
                    .ok_or(OdbError::CorruptObject {
                        detail: "truncated ref-delta base",
                    })?;
                let base_offset = self.lookup(&base_oid).ok_or(OdbError::CorruptObject {
                    detail: "ref-delta base not in pack",
                })?;
                let (kind, base) = self.read_at_depth(base_offset, depth + 1)?;
                let delta = inflate(&body[20..], size)?;
                Ok((kind, apply_delta(&base, &delta)?))
            }
            _ => Err(OdbError::CorruptObject {
                detail: "unknown pack object type",
            }),
        }
    }
}

fn map_file(path: &Path) -> Result<Mmap, OdbError> {
    let file = File::open(path)?;
    #[allow(unsafe_code)]
    unsafe {
        // SAFETY: mapped read-only and treated as immutable. Git replaces
        // packs atomically (write + rename); a pack being deleted under us
        // during `git gc` can fault, which the process-level error policy
        // treats the same as any other fatal I/O condition.
        Mmap::map(&file).map_err(OdbError::from)
    }
}

#[inline]
fn be_u32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes(data[off..off + 4].try_into().expect("bounds checked"))
}

/// Decodes a pack entry header: type in bits 4-6 of the first byte, size in
/// little-endian 7-bit groups starting with the low 4 bits.
fn decode_entry_header(data: &[u8]) -> Result<(u8, usize, usize), OdbError> {
    let mut pos = 0usize;
    let first = *data.first().ok_or(OdbError::CorruptObject {
        detail: "truncated entry header",
    })?;
    let obj_type = (first >> 4) & 0x7;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4u32;
    let mut byte = first;
    while byte & 0x80 != 0 {
        pos += 1;
        byte = *data.get(pos).ok_or(OdbError::CorruptObject {
            detail: "truncated entry header",
        })?;
        size |= ((byte & 0x7f) as usize)
            .checked_shl(shift)
            .ok_or(OdbError::CorruptObject {
                detail: "entry size overflow",
            })?;
        shift += 7;
    }
    Ok((obj_type, size, pos + 1))
}

/// Decodes the negative base offset of an ofs-delta (big-endian 7-bit
/// groups with an implicit +1 per continuation byte).
fn decode_ofs_base(data: &[u8]) -> Result<(u64, usize), OdbError> {
    let mut pos = 0usize;
    let mut byte = *data.first().ok_or(OdbError::CorruptObject {
        detail: "truncated ofs-delta offset",
    })?;
    let mut value = (byte & 0x7f) as u64;
    while byte & 0x80 != 0 {
        pos += 1;
        byte = *data.get(pos).ok_or(OdbError::CorruptObject {
            detail: "truncated ofs-delta offset",
        })?;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_shl(7))
            .ok_or(OdbError::CorruptObject {
                detail: "ofs-delta offset overflow",
            })?
            | (byte & 0x7f) as u64;
    }
    Ok((value, pos + 1))
}

/// Little-endian base-128 varint used inside delta payloads.
fn decode_le_varint(data: &[u8], pos: &mut usize) -> Result<usize, OdbError> {
    let mut value = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos).ok_or(OdbError::CorruptObject {
            detail: "truncated delta varint",
        })?;
        *pos += 1;
        value |= ((byte & 0x7f) as usize)
            .checked_shl(shift)
            .ok_or(OdbError::CorruptObject {
                detail: "delta varint overflow",
            })?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Applies a git delta to `base`, producing the target buffer.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, OdbError> {
    let mut pos = 0usize;
    let src_size = decode_le_varint(delta, &mut pos)?;
    let dst_size = decode_le_varint(delta, &mut pos)?;
    if src_size != base.len() {
        return Err(OdbError::CorruptObject {
            detail: "delta base size mismatch",
        });
    }

    let mut out = Vec::with_capacity(dst_size);
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            // Copy from base: offset/size bytes are present per low bits.
            let mut offset = 0usize;
            let mut size = 0usize;
            for bit in 0..4 {
                if cmd & (1 << bit) != 0 {
                    let byte = *delta.get(pos).ok_or(OdbError::CorruptObject {
                        detail: "truncated delta copy op",
                    })?;
                    pos += 1;
                    offset |= (byte as usize) << (8 * bit);
                }
            }
            for bit in 0..3 {
                if cmd & (0x10 << bit) != 0 {
                    let byte = *delta.get(pos).ok_or(OdbError::CorruptObject {
                        detail: "truncated delta copy op",
                    })?;
                    pos += 1;
                    size |= (byte as usize) << (8 * bit);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset.checked_add(size).filter(|&e| e <= base.len()).ok_or(
                OdbError::CorruptObject {
                    detail: "delta copy out of range",
                },
            )?;
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            // Insert literal bytes.
            let len = cmd as usize;
            let chunk = delta.get(pos..pos + len).ok_or(OdbError::CorruptObject {
                detail: "truncated delta insert",
            })?;
            out.extend_from_slice(chunk);
            pos += len;
        } else {
            return Err(OdbError::CorruptObject {
                detail: "reserved delta opcode",
            });
        }
    }

    if out.len() != dst_size {
        return Err(OdbError::CorruptObject {
            detail: "delta result size mismatch",
        });
    }
    Ok(out)
}

/// Inflates exactly `expected_len` bytes of zlib data.
pub(crate) fn inflate(src: &[u8], expected_len: usize) -> Result<Vec<u8>, OdbError> {
    let mut out = vec![0u8; expected_len];
    let mut decoder = ZlibDecoder::new(src);
    decoder
        .read_exact(&mut out)
        .map_err(|_| OdbError::CorruptObject {
            detail: "zlib inflate failed",
        })?;
    Ok(out)
}
