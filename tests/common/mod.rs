//! Shared byte-level image builders for the integration tests. These mirror
//! the unit-test harnesses already in `src/filesystem.rs` and
//! `src/metadata/mod.rs`, generalized enough to describe every end-to-end
//! scenario without repeating the frozen-metadata field order at each call
//! site.

use sha2::{Digest, Sha512_256};

pub const SECTION_HEADER_SIZE: usize = 64;
pub const SECTION_MAGIC: &[u8; 6] = b"DWARFS";

/// A section with a correct pair of checksums over its header tail + payload.
pub fn build_section(section_number: u32, section_type: u16, compression: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; SECTION_HEADER_SIZE + payload.len()];
    buf[0..6].copy_from_slice(SECTION_MAGIC);
    buf[6] = 2;
    buf[7] = 3;
    buf[8..12].copy_from_slice(&section_number.to_le_bytes());
    buf[12..14].copy_from_slice(&section_type.to_le_bytes());
    buf[14..16].copy_from_slice(&compression.to_le_bytes());
    buf[16..24].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    buf[SECTION_HEADER_SIZE..].copy_from_slice(payload);

    let covered = buf[56..].to_vec();
    let mut hasher = Sha512_256::new();
    hasher.update(&covered);
    let sha: [u8; 32] = hasher.finalize().into();
    buf[24..56].copy_from_slice(&sha);
    let xxh = xxhash_rust::xxh3::xxh3_64(&covered);
    buf[56..64].copy_from_slice(&xxh.to_le_bytes());
    buf
}

pub struct InodeSpec {
    pub mode_index: u32,
    pub uid_index: u32,
    pub gid_index: u32,
    pub symlink_index: u32,
}

impl InodeSpec {
    /// Every inode in these fixtures shares uid/gid slot 0; `mode_index`
    /// must match the inode's position in `MetaSpec::modes`.
    pub fn new(mode_index: u32) -> Self {
        Self {
            mode_index,
            uid_index: 0,
            gid_index: 0,
            symlink_index: u32::MAX,
        }
    }
}

/// Describes a whole frozen-metadata tree at the level the scenarios below
/// care about: one root plus however many files, all sorted by name already
/// (the builder does not sort for you, matching the on-disk invariant that
/// entries arrive pre-sorted).
pub struct MetaSpec {
    pub dir_count: u32,
    pub file_count: u32,
    /// `(parent, first_entry)` for every directory plus one trailing
    /// sentinel, length `dir_count + 1`.
    pub directories: Vec<(u32, u32)>,
    /// `(name_index, inode_number)`, root-to-leaf concatenated in directory
    /// order.
    pub entries: Vec<(u32, u32)>,
    pub inodes: Vec<InodeSpec>,
    /// Raw on-disk chunk fields; a hole is encoded via the high bit of
    /// `size`, same as `metadata::frozen::Chunk::decode`.
    pub chunks: Vec<(u32, u32, u32)>,
    pub chunk_table: Vec<u32>,
    pub names: Vec<&'static str>,
    pub modes: Vec<u32>,
}

impl MetaSpec {
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"FMV2");
        buf.push(0); // options
        buf.extend_from_slice(&1u32.to_le_bytes()); // time_resolution_sec
        buf.extend_from_slice(&0u32.to_le_bytes()); // subsecond multiplier

        let num_inodes = self.inodes.len() as u32;
        let num_directories = self.dir_count;

        buf.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());
        buf.extend_from_slice(&num_inodes.to_le_bytes());
        buf.extend_from_slice(&self.dir_count.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // link_count
        buf.extend_from_slice(&self.file_count.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // device_count
        buf.extend_from_slice(&num_directories.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.names.len() as u32).to_le_bytes());
        let names_blob: String = self.names.concat();
        buf.extend_from_slice(&(names_blob.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_symlinks
        buf.extend_from_slice(&0u32.to_le_bytes()); // symlinks_blob_len
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_uids: one shared slot
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_gids: one shared slot
        buf.extend_from_slice(&(self.modes.len() as u32).to_le_bytes());
        buf.push(0); // chunk_table_bits: unpacked
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_block_categories
        buf.extend_from_slice(&0u32.to_le_bytes()); // category_json_len

        for (block_number, offset_in_block, size) in &self.chunks {
            buf.extend_from_slice(&block_number.to_le_bytes());
            buf.extend_from_slice(&offset_in_block.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
        }

        for entry in &self.chunk_table {
            buf.extend_from_slice(&entry.to_le_bytes());
        }

        for (parent, first_entry) in &self.directories {
            buf.extend_from_slice(&parent.to_le_bytes());
            buf.extend_from_slice(&first_entry.to_le_bytes());
        }

        for (name_index, inode_number) in &self.entries {
            buf.extend_from_slice(&name_index.to_le_bytes());
            buf.extend_from_slice(&inode_number.to_le_bytes());
        }

        for inode in &self.inodes {
            buf.extend_from_slice(&inode.mode_index.to_le_bytes());
            buf.extend_from_slice(&inode.uid_index.to_le_bytes());
            buf.extend_from_slice(&inode.gid_index.to_le_bytes());
            buf.extend_from_slice(&0i64.to_le_bytes()); // mtime
            buf.extend_from_slice(&0i64.to_le_bytes()); // atime
            buf.extend_from_slice(&0i64.to_le_bytes()); // ctime
            buf.extend_from_slice(&0u32.to_le_bytes()); // mtime_nsec
            buf.extend_from_slice(&inode.symlink_index.to_le_bytes());
        }

        // names offset table + blob
        let mut offset = 0u32;
        let mut offsets = Vec::with_capacity(self.names.len() + 1);
        offsets.push(0u32);
        for name in &self.names {
            offset += name.len() as u32;
            offsets.push(offset);
        }
        for o in &offsets {
            buf.extend_from_slice(&o.to_le_bytes());
        }
        buf.extend_from_slice(names_blob.as_bytes());

        buf.extend_from_slice(&0u32.to_le_bytes()); // symlinks offsets[0]

        buf.extend_from_slice(&1000u32.to_le_bytes()); // uids[0]
        buf.extend_from_slice(&1000u32.to_le_bytes()); // gids[0]
        for mode in &self.modes {
            buf.extend_from_slice(&mode.to_le_bytes());
        }

        buf
    }
}

pub const HOLE_BIT: u32 = 0x8000_0000;
