//! Binary layout and parser for the frozen metadata tree (spec §3 "Frozen
//! metadata"). Sequential fields are read with `byteorder`, the same crate
//! the teacher already reaches for in `superblock.rs`, rather than manual
//! offset arithmetic — this payload has enough variable-length tables that
//! a cursor reads far more plainly than `buf[a..b]` slicing would.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::MetadataError;

pub const MAGIC: &[u8; 4] = b"FMV2";

const OPT_MTIME_ONLY: u8 = 0x01;
const OPT_PACKED_CHUNK_TABLE: u8 = 0x02;

/// `(block_number, offset_in_block, size)`. A hole chunk has the high bit of
/// `size` set; its length is the remaining 31 bits, extended to 63 bits by
/// borrowing `block_number` when `offset_in_block == u32::MAX` (spec §3: "a
/// hole longer than 32 bits").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    Data {
        block_number: u32,
        offset_in_block: u32,
        size: u32,
    },
    Hole {
        length: u64,
    },
}

impl Chunk {
    const HOLE_BIT: u32 = 0x8000_0000;
    const HOLE_LEN_MASK: u32 = 0x7fff_ffff;
    const HOLE_EXT_MARKER: u32 = u32::MAX;

    fn decode(block_number: u32, offset_in_block: u32, size: u32) -> Self {
        if size & Self::HOLE_BIT != 0 {
            let low = (size & Self::HOLE_LEN_MASK) as u64;
            let length = if offset_in_block == Self::HOLE_EXT_MARKER {
                ((block_number as u64) << 31) | low
            } else {
                low
            };
            Chunk::Hole { length }
        } else {
            Chunk::Data {
                block_number,
                offset_in_block,
                size,
            }
        }
    }

    pub fn size(&self) -> u64 {
        match *self {
            Chunk::Data { size, .. } => size as u64,
            Chunk::Hole { length } => length,
        }
    }

    pub fn is_hole(&self) -> bool {
        matches!(self, Chunk::Hole { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Directory {
    pub parent: u32,
    pub first_entry: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DirEntryRecord {
    pub name_index: u32,
    pub inode_number: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct InodeRecord {
    pub mode_index: u32,
    pub uid_index: u32,
    pub gid_index: u32,
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
    pub mtime_nsec: u32,
    /// Index into `symlinks[]`; only meaningful for inodes in the symlink
    /// range.
    pub symlink_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InodeKind {
    Directory,
    Symlink,
    Regular,
    Device,
}

/// Boundaries of the four contiguous inode-number ranges (spec invariant 5).
#[derive(Debug, Clone, Copy)]
pub struct InodeRanges {
    pub dir_count: u32,
    pub link_count: u32,
    pub file_count: u32,
    pub device_count: u32,
}

impl InodeRanges {
    pub fn total(&self) -> u32 {
        self.dir_count + self.link_count + self.file_count + self.device_count
    }

    pub fn kind_of(&self, inode: u32) -> Option<InodeKind> {
        let mut base = 0u32;
        for (count, kind) in [
            (self.dir_count, InodeKind::Directory),
            (self.link_count, InodeKind::Symlink),
            (self.file_count, InodeKind::Regular),
            (self.device_count, InodeKind::Device),
        ] {
            if inode < base + count {
                return Some(kind);
            }
            base += count;
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub mtime_only: bool,
    pub packed_chunk_table: bool,
    pub time_resolution_sec: u32,
    pub subsecond_resolution_nsec_multiplier: u32,
}

pub struct FrozenMetadata {
    pub options: Options,
    pub ranges: InodeRanges,
    pub chunks: Vec<Chunk>,
    /// `num_inodes + 1` begin-offsets into `chunks`; inode `i`'s range is
    /// `chunk_table[i]..chunk_table[i + 1]`.
    pub chunk_table: Vec<u32>,
    /// `num_directories + 1` records; directory `d`'s entries are
    /// `directories[d].first_entry .. directories[d + 1].first_entry`.
    pub directories: Vec<Directory>,
    pub entries: Vec<DirEntryRecord>,
    pub inodes: Vec<InodeRecord>,
    names_offsets: Vec<u32>,
    names_blob: Vec<u8>,
    symlinks_offsets: Vec<u32>,
    symlinks_blob: Vec<u8>,
    pub uids: Vec<u32>,
    pub gids: Vec<u32>,
    pub modes: Vec<u32>,
    pub block_categories: Vec<Option<u16>>,
    pub category_metadata_json: Option<String>,
}

impl FrozenMetadata {
    pub fn parse(buf: &[u8]) -> Result<Self, MetadataError> {
        let mut c = Cursor::new(buf);

        let mut magic = [0u8; 4];
        c.read_exact(&mut magic)
            .map_err(|_| MetadataError::Truncated("header magic"))?;
        if &magic != MAGIC {
            return Err(MetadataError::BadMagic);
        }

        let opt_flags = read_u8(&mut c, "options")?;
        let time_resolution_sec = read_u32(&mut c, "time_resolution_sec")?;
        let subsecond_resolution_nsec_multiplier =
            read_u32(&mut c, "subsecond_resolution_nsec_multiplier")?;

        let num_chunks = read_u32(&mut c, "num_chunks")? as usize;
        let num_inodes = read_u32(&mut c, "num_inodes")? as usize;
        let num_dir_inodes = read_u32(&mut c, "num_dir_inodes")?;
        let num_link_inodes = read_u32(&mut c, "num_link_inodes")?;
        let num_file_inodes = read_u32(&mut c, "num_file_inodes")?;
        let num_device_inodes = read_u32(&mut c, "num_device_inodes")?;
        let num_directories = read_u32(&mut c, "num_directories")? as usize;
        let num_entries = read_u32(&mut c, "num_entries")? as usize;
        let num_names = read_u32(&mut c, "num_names")? as usize;
        let names_blob_len = read_u32(&mut c, "names_blob_len")? as usize;
        let num_symlinks = read_u32(&mut c, "num_symlinks")? as usize;
        let symlinks_blob_len = read_u32(&mut c, "symlinks_blob_len")? as usize;
        let num_uids = read_u32(&mut c, "num_uids")? as usize;
        let num_gids = read_u32(&mut c, "num_gids")? as usize;
        let num_modes = read_u32(&mut c, "num_modes")? as usize;
        let chunk_table_bits = read_u8(&mut c, "chunk_table_bits")?;
        let num_block_categories = read_u32(&mut c, "num_block_categories")? as usize;
        let category_json_len = read_u32(&mut c, "category_json_len")? as usize;

        let ranges = InodeRanges {
            dir_count: num_dir_inodes,
            link_count: num_link_inodes,
            file_count: num_file_inodes,
            device_count: num_device_inodes,
        };
        if ranges.total() as usize != num_inodes {
            return Err(MetadataError::Inconsistent(format!(
                "inode range counts sum to {} but num_inodes is {}",
                ranges.total(),
                num_inodes
            )));
        }

        let mut chunks = Vec::with_capacity(num_chunks);
        for _ in 0..num_chunks {
            let block_number = read_u32(&mut c, "chunk.block_number")?;
            let offset_in_block = read_u32(&mut c, "chunk.offset_in_block")?;
            let size = read_u32(&mut c, "chunk.size")?;
            chunks.push(Chunk::decode(block_number, offset_in_block, size));
        }

        let chunk_table_len = num_inodes + 1;
        let chunk_table = if chunk_table_bits == 0 {
            let mut v = Vec::with_capacity(chunk_table_len);
            for _ in 0..chunk_table_len {
                v.push(read_u32(&mut c, "chunk_table entry")?);
            }
            v
        } else {
            let words = (chunk_table_len * chunk_table_bits as usize).div_ceil(64);
            let mut data = Vec::with_capacity(words);
            for _ in 0..words {
                data.push(read_u64(&mut c, "chunk_table packed word")?);
            }
            let packed = crate::util::packed_int::PackedIntVector::new(
                &data,
                chunk_table_bits as u32,
                chunk_table_len,
            );
            packed.iter().map(|v| v as u32).collect()
        };
        for w in chunk_table.windows(2) {
            if w[1] < w[0] {
                return Err(MetadataError::Inconsistent(
                    "chunk_table entries are not monotonically non-decreasing".into(),
                ));
            }
        }
        if *chunk_table.last().unwrap_or(&0) as usize > num_chunks {
            return Err(MetadataError::Inconsistent(
                "chunk_table's final entry exceeds num_chunks".into(),
            ));
        }

        let mut directories = Vec::with_capacity(num_directories + 1);
        for _ in 0..num_directories + 1 {
            let parent = read_u32(&mut c, "directory.parent")?;
            let first_entry = read_u32(&mut c, "directory.first_entry")?;
            directories.push(Directory { parent, first_entry });
        }

        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            let name_index = read_u32(&mut c, "entry.name_index")?;
            let inode_number = read_u32(&mut c, "entry.inode_number")?;
            entries.push(DirEntryRecord {
                name_index,
                inode_number,
            });
        }

        let mut inodes = Vec::with_capacity(num_inodes);
        for _ in 0..num_inodes {
            let mode_index = read_u32(&mut c, "inode.mode_index")?;
            let uid_index = read_u32(&mut c, "inode.uid_index")?;
            let gid_index = read_u32(&mut c, "inode.gid_index")?;
            let mtime = read_i64(&mut c, "inode.mtime")?;
            let atime = read_i64(&mut c, "inode.atime")?;
            let ctime = read_i64(&mut c, "inode.ctime")?;
            let mtime_nsec = read_u32(&mut c, "inode.mtime_nsec")?;
            let symlink_index = read_u32(&mut c, "inode.symlink_index")?;
            inodes.push(InodeRecord {
                mode_index,
                uid_index,
                gid_index,
                mtime,
                atime,
                ctime,
                mtime_nsec,
                symlink_index,
            });
        }

        let names_offsets = read_offset_table(&mut c, num_names + 1, "names offset table")?;
        let names_blob = read_blob(&mut c, names_blob_len, "names blob")?;
        validate_offsets(&names_offsets, names_blob.len(), "names")?;

        let symlinks_offsets =
            read_offset_table(&mut c, num_symlinks + 1, "symlinks offset table")?;
        let symlinks_blob = read_blob(&mut c, symlinks_blob_len, "symlinks blob")?;
        validate_offsets(&symlinks_offsets, symlinks_blob.len(), "symlinks")?;

        let mut uids = Vec::with_capacity(num_uids);
        for _ in 0..num_uids {
            uids.push(read_u32(&mut c, "uid")?);
        }
        let mut gids = Vec::with_capacity(num_gids);
        for _ in 0..num_gids {
            gids.push(read_u32(&mut c, "gid")?);
        }
        let mut modes = Vec::with_capacity(num_modes);
        for _ in 0..num_modes {
            modes.push(read_u32(&mut c, "mode")?);
        }

        let mut block_categories = Vec::with_capacity(num_block_categories);
        for _ in 0..num_block_categories {
            let raw = read_u16(&mut c, "block_category")?;
            block_categories.push(if raw == u16::MAX { None } else { Some(raw) });
        }

        let category_metadata_json = if category_json_len > 0 {
            let bytes = read_blob(&mut c, category_json_len, "category_metadata_json")?;
            Some(
                String::from_utf8(bytes)
                    .map_err(|_| MetadataError::Inconsistent("category_metadata_json is not valid UTF-8".into()))?,
            )
        } else {
            None
        };

        Ok(FrozenMetadata {
            options: Options {
                mtime_only: opt_flags & OPT_MTIME_ONLY != 0,
                packed_chunk_table: opt_flags & OPT_PACKED_CHUNK_TABLE != 0,
                time_resolution_sec,
                subsecond_resolution_nsec_multiplier,
            },
            ranges,
            chunks,
            chunk_table,
            directories,
            entries,
            inodes,
            names_offsets,
            names_blob,
            symlinks_offsets,
            symlinks_blob,
            uids,
            gids,
            modes,
            block_categories,
            category_metadata_json,
        })
    }

    pub fn name(&self, index: u32) -> Result<&str, MetadataError> {
        lookup_string(&self.names_offsets, &self.names_blob, index, "name")
    }

    pub fn symlink_target(&self, index: u32) -> Result<&str, MetadataError> {
        lookup_string(&self.symlinks_offsets, &self.symlinks_blob, index, "symlink")
    }
}

fn read_offset_table(c: &mut Cursor<&[u8]>, len: usize, what: &'static str) -> Result<Vec<u32>, MetadataError> {
    let mut v = Vec::with_capacity(len);
    for _ in 0..len {
        v.push(read_u32(c, what)?);
    }
    Ok(v)
}

fn read_blob(c: &mut Cursor<&[u8]>, len: usize, what: &'static str) -> Result<Vec<u8>, MetadataError> {
    let mut buf = vec![0u8; len];
    c.read_exact(&mut buf)
        .map_err(|_| MetadataError::Truncated(what))?;
    Ok(buf)
}

fn validate_offsets(offsets: &[u32], blob_len: usize, what: &'static str) -> Result<(), MetadataError> {
    for w in offsets.windows(2) {
        if w[1] < w[0] {
            return Err(MetadataError::Inconsistent(format!(
                "{what} offset table is not monotonically non-decreasing"
            )));
        }
    }
    if *offsets.last().unwrap_or(&0) as usize > blob_len {
        return Err(MetadataError::Inconsistent(format!(
            "{what} offset table's final entry exceeds blob length"
        )));
    }
    Ok(())
}

fn lookup_string<'a>(
    offsets: &[u32],
    blob: &'a [u8],
    index: u32,
    what: &'static str,
) -> Result<&'a str, MetadataError> {
    let i = index as usize;
    if i + 1 >= offsets.len() {
        return Err(MetadataError::NoSuchIndex { what, index });
    }
    let start = offsets[i] as usize;
    let end = offsets[i + 1] as usize;
    std::str::from_utf8(&blob[start..end])
        .map_err(|_| MetadataError::Inconsistent(format!("{what} table entry {index} is not valid UTF-8")))
}

fn read_u8(c: &mut Cursor<&[u8]>, what: &'static str) -> Result<u8, MetadataError> {
    c.read_u8().map_err(|_| MetadataError::Truncated(what))
}

fn read_u16(c: &mut Cursor<&[u8]>, what: &'static str) -> Result<u16, MetadataError> {
    c.read_u16::<LittleEndian>()
        .map_err(|_| MetadataError::Truncated(what))
}

fn read_u32(c: &mut Cursor<&[u8]>, what: &'static str) -> Result<u32, MetadataError> {
    c.read_u32::<LittleEndian>()
        .map_err(|_| MetadataError::Truncated(what))
}

fn read_u64(c: &mut Cursor<&[u8]>, what: &'static str) -> Result<u64, MetadataError> {
    c.read_u64::<LittleEndian>()
        .map_err(|_| MetadataError::Truncated(what))
}

fn read_i64(c: &mut Cursor<&[u8]>, what: &'static str) -> Result<i64, MetadataError> {
    c.read_i64::<LittleEndian>()
        .map_err(|_| MetadataError::Truncated(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_image() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(0); // options
        buf.extend_from_slice(&1u32.to_le_bytes()); // time_resolution_sec
        buf.extend_from_slice(&0u32.to_le_bytes()); // subsecond multiplier
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_chunks
        buf.extend_from_slice(&2u32.to_le_bytes()); // num_inodes
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_dir_inodes
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_link_inodes
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_file_inodes
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_device_inodes
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_directories
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_entries
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_names
        buf.extend_from_slice(&5u32.to_le_bytes()); // names_blob_len ("hello")
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_symlinks
        buf.extend_from_slice(&0u32.to_le_bytes()); // symlinks_blob_len
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_uids
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_gids
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_modes
        buf.push(0); // chunk_table_bits (unpacked)
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_block_categories
        buf.extend_from_slice(&0u32.to_le_bytes()); // category_json_len

        // chunks[0] = Data(block=0, offset=0, size=11)
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&11u32.to_le_bytes());

        // chunk_table: [0, 1, 1] (inode 0 = dir, no chunks; inode 1 = file, chunks[0..1])
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        // directories: root (parent=0, first_entry=0), sentinel (first_entry=1)
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        // entries[0]: name_index=0, inode_number=1
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        // inodes[0] (dir), inodes[1] (file)
        for _ in 0..2 {
            buf.extend_from_slice(&0u32.to_le_bytes()); // mode_index
            buf.extend_from_slice(&0u32.to_le_bytes()); // uid_index
            buf.extend_from_slice(&0u32.to_le_bytes()); // gid_index
            buf.extend_from_slice(&0i64.to_le_bytes()); // mtime
            buf.extend_from_slice(&0i64.to_le_bytes()); // atime
            buf.extend_from_slice(&0i64.to_le_bytes()); // ctime
            buf.extend_from_slice(&0u32.to_le_bytes()); // mtime_nsec
            buf.extend_from_slice(&u32::MAX.to_le_bytes()); // symlink_index
        }

        // names offsets [0, 5], blob "hello"
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(b"hello");

        // symlinks offsets [0]
        buf.extend_from_slice(&0u32.to_le_bytes());

        // uids, gids, modes
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0o100644u32.to_le_bytes());

        buf
    }

    #[test]
    fn parses_minimal_tree() {
        let buf = minimal_image();
        let meta = FrozenMetadata::parse(&buf).unwrap();
        assert_eq!(meta.chunks.len(), 1);
        assert_eq!(meta.chunk_table, vec![0, 0, 1]);
        assert_eq!(meta.name(0).unwrap(), "hello");
        assert_eq!(meta.ranges.kind_of(0), Some(InodeKind::Directory));
        assert_eq!(meta.ranges.kind_of(1), Some(InodeKind::Regular));
    }

    #[test]
    fn decodes_hole_chunks() {
        assert_eq!(Chunk::decode(0, 0, 100), Chunk::Data { block_number: 0, offset_in_block: 0, size: 100 });
        let hole = Chunk::decode(0, 0, 0x8000_0064);
        assert_eq!(hole, Chunk::Hole { length: 100 });
        assert!(hole.is_hole());

        let ext_hole = Chunk::decode(1, u32::MAX, 0x8000_0000);
        assert_eq!(ext_hole, Chunk::Hole { length: 1u64 << 31 });
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = minimal_image();
        buf[0] = b'X';
        assert!(matches!(FrozenMetadata::parse(&buf), Err(MetadataError::BadMagic)));
    }
}
