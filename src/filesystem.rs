//! Filesystem facade — composes the image, metadata, block cache, and inode
//! reader behind a POSIX-shaped read API (spec §4.10).

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cache::BlockCache;
use crate::codec::{decompress_all, Registry};
use crate::config::ReaderOptions;
use crate::error::{DwarfsError, Result, SeekWhence};
use crate::file_reader::{FileReader, Semaphore};
use crate::file_view::{FileView, MappedFileView};
use crate::image::Image;
use crate::inode_reader::{InodeReader, ReadSegment};
use crate::metadata::frozen::{Chunk, InodeKind};
use crate::metadata::{InodeAttr, Metadata};
use crate::section::SectionType;
use crate::worker::WorkerGroup;

/// A minimal `statvfs`-shaped summary (spec §4.10); this is a read-only,
/// single-device filesystem, so most mutability-oriented fields upstream's
/// `statvfs(2)` exposes collapse to constants.
#[derive(Debug, Clone, Copy)]
pub struct StatVfs {
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub name_max: u32,
}

pub struct Filesystem {
    image: Arc<Image>,
    metadata: Metadata,
    cache: Arc<BlockCache>,
    inode_reader: Arc<InodeReader>,
    workers: Arc<WorkerGroup>,
}

impl Filesystem {
    pub fn open(path: &Path, options: &ReaderOptions) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let view: Arc<dyn FileView> = Arc::new(MappedFileView::open(&file)?);
        let image = Arc::new(Image::open(view, options.image_offset)?);

        let registry = Arc::new(Registry::with_defaults());
        let mut metadata = load_metadata(&image, &registry)?;
        if options.enable_nlink {
            metadata.enable_nlink();
        }

        let workers = Arc::new(WorkerGroup::new(options.num_workers, options.num_workers * 4));
        let cache = Arc::new(BlockCache::new(
            image.clone(),
            registry,
            workers.clone(),
            options.max_cache_bytes,
            options.disable_integrity_check,
            options.mm_release,
        ));
        let inode_reader = Arc::new(InodeReader::new(
            cache.clone(),
            256,
            options.offset_cache_chunk_index_interval,
            options.offset_cache_updater_max_inline_offsets,
        ));

        info!(path = %path.display(), inodes = metadata.inode_count(), "filesystem opened");

        Ok(Self {
            image,
            metadata,
            cache,
            inode_reader,
            workers,
        })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub fn worker_cpu_time(&self) -> std::time::Duration {
        self.workers.total_cpu_time()
    }

    /// Resolves a `/`-separated path to an inode, starting at root.
    /// Returns `Ok(None)` for a missing component, not an error.
    pub fn find_path(&self, path: &str) -> Result<Option<u32>> {
        let mut current = self.metadata.root_inode();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if self.metadata.kind(current)? != InodeKind::Directory {
                return Ok(None);
            }
            match self.metadata.lookup(current, component)? {
                Some(inode) => current = inode,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Resolves `(parent, name) -> inode`, the other `find` overload spec
    /// §4.10 lists alongside whole-path and bare-inode lookup.
    pub fn find_in_dir(&self, parent: u32, name: &str) -> Result<Option<u32>> {
        Ok(self.metadata.lookup(parent, name)?)
    }

    pub fn getattr(&self, inode: u32) -> Result<InodeAttr> {
        Ok(self.metadata.getattr(inode)?)
    }

    /// Checks `mode`'s requested bits (`R_OK`/`W_OK`/`X_OK`-style, as plain
    /// POSIX permission bits) against the inode's mode. This crate has no
    /// notion of a calling uid/gid, so it checks the "other" permission
    /// class only — a conservative approximation documented as an open
    /// question resolution, not a full POSIX access check.
    pub fn access(&self, inode: u32, mode: u32) -> Result<()> {
        let attr = self.getattr(inode)?;
        if attr.mode & mode == mode {
            Ok(())
        } else {
            Err(DwarfsError::PermissionDenied(format!(
                "inode {inode} does not permit mode {mode:#o}"
            )))
        }
    }

    pub fn opendir(&self, inode: u32) -> Result<()> {
        if self.metadata.kind(inode)? != InodeKind::Directory {
            return Err(DwarfsError::NotADirectory { inode });
        }
        Ok(())
    }

    pub fn readdir(&self, inode: u32) -> Result<Vec<(String, u32)>> {
        self.opendir(inode)?;
        Ok(self
            .metadata
            .readdir(inode)?
            .into_iter()
            .map(|(name, ino)| (name.to_string(), ino))
            .collect())
    }

    pub fn readlink(&self, inode: u32) -> Result<String> {
        Ok(self.metadata.symlink_target(inode)?.to_string())
    }

    pub fn statvfs(&self) -> StatVfs {
        // Fall back to a conservative minimum when the image has no chunks
        // to measure (e.g. an empty filesystem), so `total_blocks` doesn't
        // divide by zero.
        const MIN_BLOCK_SIZE: u64 = 4096;
        let block_size = self.metadata.max_chunk_extent().max(MIN_BLOCK_SIZE);
        let total_bytes = self.image.filesystem_size();
        StatVfs {
            block_size,
            total_blocks: total_bytes.div_ceil(block_size),
            free_blocks: 0,
            total_inodes: self.metadata.inode_count() as u64,
            free_inodes: 0,
            name_max: 255,
        }
    }

    /// `open` returns a handle whose integer value is just the inode
    /// number (spec §4.10); there's no per-handle mutable state to track.
    pub fn open(&self, inode: u32) -> Result<u32> {
        if self.metadata.kind(inode)? != InodeKind::Regular {
            return Err(DwarfsError::NotARegularFile { inode });
        }
        Ok(inode)
    }

    fn chunks_for(&self, handle: u32) -> Result<&[Chunk]> {
        Ok(self.metadata.chunks_for_inode(handle)?)
    }

    pub fn read(&self, handle: u32, offset: u64, size: usize) -> Result<Vec<u8>> {
        let chunks = self.chunks_for(handle)?;
        self.inode_reader.read(handle, chunks, offset, size)
    }

    pub fn readv(&self, handle: u32, offset: u64, size: usize) -> Result<Vec<ReadSegment>> {
        let chunks = self.chunks_for(handle)?;
        self.inode_reader.readv(handle, chunks, offset, size)
    }

    pub fn seek(&self, handle: u32, offset: u64, whence: SeekWhence) -> Result<u64> {
        let chunks = self.chunks_for(handle)?;
        self.inode_reader.seek(chunks, offset, whence)
    }

    pub fn get_chunks(&self, handle: u32) -> Result<Vec<Chunk>> {
        Ok(self.chunks_for(handle)?.to_vec())
    }

    /// Opens a bounded-memory streaming iterator over `handle`'s data
    /// (spec §4.9).
    pub fn open_stream(&self, handle: u32, max_bytes: usize, semaphore: Arc<Semaphore>) -> Result<FileReader> {
        let attr = self.getattr(handle)?;
        let chunks = Arc::new(self.get_chunks(handle)?);
        Ok(FileReader::new(
            self.inode_reader.clone(),
            handle,
            chunks,
            attr.size,
            max_bytes,
            semaphore,
        ))
    }

    /// Evicts cache blocks idle longer than `max_age` — intended to be
    /// called periodically by a caller-owned tidy thread (spec §4.7).
    pub fn tidy_cache(&self, max_age: std::time::Duration) -> usize {
        self.cache.evict_idle(max_age)
    }
}

fn load_metadata(image: &Image, registry: &Registry) -> Result<Metadata> {
    let section = image
        .sections_of_type(SectionType::MetadataV2)
        .last()
        .copied()
        .ok_or_else(|| DwarfsError::NoSuchEntry("image has no MetadataV2 section".to_string()))?;

    if !section.check_any(image.view().as_ref())? {
        return Err(DwarfsError::Decompression(format!(
            "integrity check failed for metadata section {}",
            section.section_number
        )));
    }

    let payload = section.payload_segment(image.view().as_ref())?;
    let bytes = decompress_all(registry, section.compression, payload.as_slice())?;
    Ok(Metadata::load(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{CompressionType, HEADER_SIZE, MAGIC};
    use std::io::Write;

    fn build_section(section_number: u32, section_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE + payload.len()];
        buf[0..6].copy_from_slice(MAGIC);
        buf[6] = 2;
        buf[7] = 3;
        buf[8..12].copy_from_slice(&section_number.to_le_bytes());
        buf[12..14].copy_from_slice(&section_type.to_le_bytes());
        buf[14..16].copy_from_slice(&CompressionType::None.to_raw().to_le_bytes());
        buf[16..24].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        buf[HEADER_SIZE..].copy_from_slice(payload);
        use sha2::{Digest, Sha512_256};
        let covered = &buf[56..];
        let mut hasher = Sha512_256::new();
        hasher.update(covered);
        let sha: [u8; 32] = hasher.finalize().into();
        buf[24..56].copy_from_slice(&sha);
        let xxh = xxhash_rust::xxh3::xxh3_64(covered);
        buf[56..64].copy_from_slice(&xxh.to_le_bytes());
        buf
    }

    fn single_file_tree() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(crate::metadata::frozen::MAGIC);
        buf.push(0);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_chunks
        buf.extend_from_slice(&2u32.to_le_bytes()); // num_inodes
        buf.extend_from_slice(&1u32.to_le_bytes()); // dirs
        buf.extend_from_slice(&0u32.to_le_bytes()); // links
        buf.extend_from_slice(&1u32.to_le_bytes()); // files
        buf.extend_from_slice(&0u32.to_le_bytes()); // devices
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_directories
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_entries
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_names
        buf.extend_from_slice(&5u32.to_le_bytes()); // names_blob_len
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_uids
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_gids
        buf.extend_from_slice(&1u32.to_le_bytes()); // num_modes
        buf.push(0);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&11u32.to_le_bytes()); // chunk: block 0, off 0, size 11

        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        for _ in 0..2 {
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0i64.to_le_bytes());
            buf.extend_from_slice(&0i64.to_le_bytes());
            buf.extend_from_slice(&0i64.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&u32::MAX.to_le_bytes());
        }

        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(b"a.txt");

        buf.extend_from_slice(&0u32.to_le_bytes());

        buf.extend_from_slice(&1000u32.to_le_bytes());
        buf.extend_from_slice(&1000u32.to_le_bytes());
        buf.extend_from_slice(&0o100644u32.to_le_bytes());

        buf
    }

    #[test]
    fn opens_and_reads_a_single_file_image() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build_section(0, SectionType::Block.to_raw(), b"hello world"))
            .unwrap();
        let meta_bytes = single_file_tree();
        file.write_all(&build_section(1, SectionType::MetadataV2.to_raw(), &meta_bytes))
            .unwrap();
        file.flush().unwrap();

        let options = ReaderOptions::default();
        let fs = Filesystem::open(file.path(), &options).unwrap();

        let inode = fs.find_path("a.txt").unwrap().unwrap();
        assert_eq!(fs.getattr(inode).unwrap().size, 11);

        let handle = fs.open(inode).unwrap();
        let data = fs.read(handle, 0, 11).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn missing_path_resolves_to_none() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build_section(0, SectionType::Block.to_raw(), b"hello world"))
            .unwrap();
        let meta_bytes = single_file_tree();
        file.write_all(&build_section(1, SectionType::MetadataV2.to_raw(), &meta_bytes))
            .unwrap();
        file.flush().unwrap();

        let fs = Filesystem::open(file.path(), &ReaderOptions::default()).unwrap();
        assert_eq!(fs.find_path("nope.txt").unwrap(), None);
    }
}
