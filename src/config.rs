//! Reader configuration — spec §6 "Configuration recognized by the reader".
//!
//! Plain-field `Default`-deriving struct, constructed once and handed to
//! [`crate::filesystem::Filesystem::open`], in the same shape as the
//! teacher's `PackOptions`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOffset {
    /// Scan for the magic starting at offset 0.
    Auto,
    /// The filesystem image starts at exactly this byte offset.
    Fixed(u64),
}

impl Default for ImageOffset {
    fn default() -> Self {
        ImageOffset::Auto
    }
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// `block_cache.max_bytes` — upper bound on resident decompressed memory.
    pub max_cache_bytes: u64,
    /// `block_cache.num_workers` — decompression concurrency (>= 1).
    pub num_workers: usize,
    /// `block_cache.disable_integrity_check` — skip fast checksum (dangerous).
    pub disable_integrity_check: bool,
    /// `block_cache.mm_release` — advise-release compressed pages after decode.
    pub mm_release: bool,
    /// `metadata.enable_nlink` — compute and expose hardlink counts.
    pub enable_nlink: bool,
    /// `image_offset` — fixed offset or auto-detect.
    pub image_offset: ImageOffset,
    /// `inode_reader.offset_cache_chunk_index_interval` — the `K` constant.
    pub offset_cache_chunk_index_interval: u32,
    /// `inode_reader.offset_cache_updater_max_inline_offsets`.
    pub offset_cache_updater_max_inline_offsets: usize,
    /// How many idle blocks the cache's tidy pass is allowed to consider
    /// per sweep before yielding (not in spec.md verbatim, bounds tidy-thread cost).
    pub cache_tidy_interval_secs: u64,
    /// Idle threshold after which the tidy thread evicts an otherwise-unused
    /// block (spec §4.7 "optional tidy thread").
    pub cache_tidy_max_age_secs: u64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_cache_bytes: 512 * 1024 * 1024,
            num_workers: default_num_workers(),
            disable_integrity_check: false,
            mm_release: true,
            enable_nlink: false,
            image_offset: ImageOffset::Auto,
            offset_cache_chunk_index_interval: 256,
            offset_cache_updater_max_inline_offsets: 16,
            cache_tidy_interval_secs: 5,
            cache_tidy_max_age_secs: 60,
        }
    }
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
