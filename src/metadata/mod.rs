//! Frozen metadata — immutable directory tree, inode table, chunk lists.
//!
//! Spec §4.8 exposes this as a read-only tree consumed in place: no parsing
//! pass builds an intermediate representation, `frozen::FrozenMetadata`
//! holds the on-disk tables directly and this module layers lookup,
//! readdir, and attribute queries on top of them with no allocation beyond
//! what a `String` result needs.

pub mod frozen;

use thiserror::Error;

use frozen::{Chunk, FrozenMetadata, InodeKind};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("bad frozen metadata magic")]
    BadMagic,
    #[error("truncated frozen metadata: missing {0}")]
    Truncated(&'static str),
    #[error("inconsistent frozen metadata: {0}")]
    Inconsistent(String),
    #[error("no such {what} index: {index}")]
    NoSuchIndex { what: &'static str, index: u32 },
    #[error("inode {0} out of range")]
    NoSuchInode(u32),
    #[error("directory entries for inode {0} are not sorted by name")]
    UnsortedDirectory(u32),
}

#[derive(Debug, Clone)]
pub struct InodeAttr {
    pub inode: u32,
    pub kind: InodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub mtime_nsec: u32,
    pub atime: i64,
    pub ctime: i64,
    /// Sum of the inode's chunk sizes for regular files (spec invariant 6);
    /// zero for every other kind.
    pub size: u64,
    /// Directory-entry reference count for this inode. `1` unless
    /// `Metadata::enable_nlink` was called, since without it nothing in this
    /// crate tracks how many directory entries alias one inode.
    pub nlink: u32,
}

pub struct Metadata {
    inner: FrozenMetadata,
    /// Populated by `enable_nlink`; maps inode number to how many directory
    /// entries reference it.
    link_counts: Option<std::collections::HashMap<u32, u32>>,
}

impl Metadata {
    pub fn load(buf: &[u8]) -> Result<Self, MetadataError> {
        let inner = FrozenMetadata::parse(buf)?;
        let meta = Metadata { inner, link_counts: None };
        meta.check_consistency()?;
        Ok(meta)
    }

    /// Computes and caches directory-entry reference counts so `getattr`
    /// reports real `nlink` values instead of the `1` default (spec's
    /// `metadata.enable_nlink` configuration knob). Counts entries only —
    /// it doesn't add the conventional directory self- and parent-links,
    /// matching the approximation this crate already makes for `access`
    /// and `statvfs` rather than inventing full POSIX nlink semantics.
    pub fn enable_nlink(&mut self) {
        let mut counts = std::collections::HashMap::new();
        for entry in &self.inner.entries {
            *counts.entry(entry.inode_number).or_insert(0u32) += 1;
        }
        self.link_counts = Some(counts);
    }

    fn nlink_of(&self, inode: u32) -> u32 {
        self.link_counts
            .as_ref()
            .and_then(|m| m.get(&inode).copied())
            .unwrap_or(1)
    }

    fn check_consistency(&self) -> Result<(), MetadataError> {
        for dir_inode in 0..self.inner.ranges.dir_count {
            let names = self.entry_names(dir_inode)?;
            if !names.windows(2).all(|w| w[0] <= w[1]) {
                return Err(MetadataError::UnsortedDirectory(dir_inode));
            }
        }
        Ok(())
    }

    pub fn root_inode(&self) -> u32 {
        0
    }

    pub fn inode_count(&self) -> u32 {
        self.inner.ranges.total()
    }

    fn inode_record(&self, inode: u32) -> Result<&frozen::InodeRecord, MetadataError> {
        self.inner
            .inodes
            .get(inode as usize)
            .ok_or(MetadataError::NoSuchInode(inode))
    }

    pub fn kind(&self, inode: u32) -> Result<InodeKind, MetadataError> {
        self.inner
            .ranges
            .kind_of(inode)
            .ok_or(MetadataError::NoSuchInode(inode))
    }

    pub fn getattr(&self, inode: u32) -> Result<InodeAttr, MetadataError> {
        let kind = self.kind(inode)?;
        let rec = self.inode_record(inode)?;
        let mode = *self
            .inner
            .modes
            .get(rec.mode_index as usize)
            .ok_or(MetadataError::NoSuchIndex {
                what: "mode",
                index: rec.mode_index,
            })?;
        let uid = *self
            .inner
            .uids
            .get(rec.uid_index as usize)
            .ok_or(MetadataError::NoSuchIndex {
                what: "uid",
                index: rec.uid_index,
            })?;
        let gid = *self
            .inner
            .gids
            .get(rec.gid_index as usize)
            .ok_or(MetadataError::NoSuchIndex {
                what: "gid",
                index: rec.gid_index,
            })?;

        let size = if kind == InodeKind::Regular {
            self.chunks_for_inode(inode)?
                .iter()
                .map(|c| c.size())
                .sum()
        } else {
            0
        };

        Ok(InodeAttr {
            inode,
            kind,
            mode,
            uid,
            gid,
            mtime: rec.mtime,
            mtime_nsec: if self.inner.options.mtime_only { 0 } else { rec.mtime_nsec },
            atime: if self.inner.options.mtime_only { rec.mtime } else { rec.atime },
            ctime: if self.inner.options.mtime_only { rec.mtime } else { rec.ctime },
            size,
            nlink: self.nlink_of(inode),
        })
    }

    /// The chunk list backing a regular-file inode's data (spec invariant 3:
    /// chunks never cross a block boundary; holes are single slots).
    pub fn chunks_for_inode(&self, inode: u32) -> Result<&[Chunk], MetadataError> {
        let begin = *self
            .inner
            .chunk_table
            .get(inode as usize)
            .ok_or(MetadataError::NoSuchInode(inode))? as usize;
        let end = *self
            .inner
            .chunk_table
            .get(inode as usize + 1)
            .ok_or(MetadataError::NoSuchInode(inode))? as usize;
        Ok(&self.inner.chunks[begin..end])
    }

    pub fn symlink_target(&self, inode: u32) -> Result<&str, MetadataError> {
        if self.kind(inode)? != InodeKind::Symlink {
            return Err(MetadataError::Inconsistent(format!(
                "inode {inode} is not a symlink"
            )));
        }
        let rec = self.inode_record(inode)?;
        self.inner.symlink_target(rec.symlink_index)
    }

    fn directory_entry_range(&self, dir_inode: u32) -> Result<(usize, usize), MetadataError> {
        if self.kind(dir_inode)? != InodeKind::Directory {
            return Err(MetadataError::Inconsistent(format!(
                "inode {dir_inode} is not a directory"
            )));
        }
        let d = dir_inode as usize;
        let begin = self
            .inner
            .directories
            .get(d)
            .ok_or(MetadataError::NoSuchInode(dir_inode))?
            .first_entry as usize;
        let end = self
            .inner
            .directories
            .get(d + 1)
            .ok_or(MetadataError::NoSuchInode(dir_inode))?
            .first_entry as usize;
        Ok((begin, end))
    }

    fn entry_names(&self, dir_inode: u32) -> Result<Vec<&str>, MetadataError> {
        let (begin, end) = self.directory_entry_range(dir_inode)?;
        self.inner.entries[begin..end]
            .iter()
            .map(|e| self.inner.name(e.name_index))
            .collect()
    }

    /// Lists `(name, inode_number)` for every entry of `dir_inode`, `.` and
    /// `..` first followed by the on-disk (name-sorted) entries.
    pub fn readdir(&self, dir_inode: u32) -> Result<Vec<(&str, u32)>, MetadataError> {
        let (begin, end) = self.directory_entry_range(dir_inode)?;
        let parent = self.parent_of(dir_inode)?;
        let mut out = Vec::with_capacity(end - begin + 2);
        out.push((".", dir_inode));
        out.push(("..", parent));
        for e in &self.inner.entries[begin..end] {
            out.push((self.inner.name(e.name_index)?, e.inode_number));
        }
        Ok(out)
    }

    /// Binary-searches `dir_inode`'s sorted entries for `name` (spec
    /// invariant 4).
    pub fn lookup(&self, dir_inode: u32, name: &str) -> Result<Option<u32>, MetadataError> {
        let (begin, end) = self.directory_entry_range(dir_inode)?;
        let entries = &self.inner.entries[begin..end];
        let mut lo = 0usize;
        let mut hi = entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let mid_name = self.inner.name(entries[mid].name_index)?;
            match mid_name.cmp(name) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(entries[mid].inode_number)),
            }
        }
        Ok(None)
    }

    pub fn parent_of(&self, dir_inode: u32) -> Result<u32, MetadataError> {
        if self.kind(dir_inode)? != InodeKind::Directory {
            return Err(MetadataError::Inconsistent(format!(
                "inode {dir_inode} is not a directory"
            )));
        }
        Ok(self.inner.directories[dir_inode as usize].parent)
    }

    pub fn category_metadata_json(&self) -> Option<&str> {
        self.inner.category_metadata_json.as_deref()
    }

    /// The largest `offset_in_block + size` reached by any chunk, i.e. a
    /// lower bound on the true block size (spec invariant 3: chunks never
    /// cross a block boundary, so no chunk's extent can exceed it). Used by
    /// `statvfs` in place of a fixed block size, since the frozen metadata
    /// carries no explicit block-size field.
    pub fn max_chunk_extent(&self) -> u64 {
        self.inner
            .chunks
            .iter()
            .filter_map(|c| match *c {
                Chunk::Data { offset_in_block, size, .. } => Some(offset_in_block as u64 + size as u64),
                Chunk::Hole { .. } => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn block_category(&self, block_number: u32) -> Option<u16> {
        self.inner
            .block_categories
            .get(block_number as usize)
            .copied()
            .flatten()
    }
}
