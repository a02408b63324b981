//! Property-based checks for the read-path invariants and laws (spec §8):
//! arbitrary reads round-trip against a reference buffer, and the block
//! cache never holds more bytes resident than its budget allows for once
//! in-flight admissions settle.

mod common;

use std::io::Write;
use std::path::Path;

use common::{build_section, MetaSpec};
use dwarfs::{Filesystem, ReaderOptions};
use proptest::prelude::*;

const BLOCK: u16 = 0;
const METADATA_V2: u16 = 2;
const NONE: u16 = 0;
const NUM_BLOCKS: usize = 6;
const BLOCK_SIZE: usize = 512;

fn build_multi_block_image(path: &Path) -> Vec<u8> {
    let mut reference = Vec::with_capacity(NUM_BLOCKS * BLOCK_SIZE);
    let mut parts = Vec::new();
    for i in 0..NUM_BLOCKS {
        let block: Vec<u8> = (0..BLOCK_SIZE).map(|b| ((i * 37 + b) % 256) as u8).collect();
        reference.extend_from_slice(&block);
        parts.push(build_section(i as u32, BLOCK, NONE, &block));
    }

    let chunks: Vec<(u32, u32, u32)> = (0..NUM_BLOCKS).map(|i| (i as u32, 0, BLOCK_SIZE as u32)).collect();
    let meta = MetaSpec {
        dir_count: 1,
        file_count: 1,
        directories: vec![(0, 0), (0, 1)],
        entries: vec![(0, 1)],
        inodes: vec![common::InodeSpec::new(0), common::InodeSpec::new(1)],
        chunks,
        chunk_table: vec![0, 0, NUM_BLOCKS as u32],
        names: vec!["data.bin"],
        modes: vec![0o40755, 0o100644],
    }
    .build();
    parts.push(build_section(NUM_BLOCKS as u32, METADATA_V2, NONE, &meta));

    let mut file = std::fs::File::create(path).unwrap();
    for part in &parts {
        file.write_all(part).unwrap();
    }
    file.flush().unwrap();

    reference
}

proptest! {
    /// Round-trip: any in-bounds `(offset, len)` window read back through
    /// the filesystem must match the same window of the reference buffer,
    /// regardless of where it falls relative to chunk boundaries.
    #[test]
    fn arbitrary_windows_round_trip(
        offset in 0usize..(NUM_BLOCKS * BLOCK_SIZE),
        len in 0usize..(2 * BLOCK_SIZE),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.dwarfs");
        let reference = build_multi_block_image(&path);

        let fs = Filesystem::open(&path, &ReaderOptions::default()).unwrap();
        let inode = fs.find_path("data.bin").unwrap().unwrap();
        let handle = fs.open(inode).unwrap();

        let data = fs.read(handle, offset as u64, len).unwrap();
        let total = reference.len();
        let end = (offset + len).min(total);
        let expected = if offset >= total { &[][..] } else { &reference[offset..end] };
        prop_assert_eq!(data.as_slice(), expected);
    }

    /// Idempotence of concurrent `get`: two reads of the very same window,
    /// run back to back (forcing the second to hit an already-decompressed
    /// or already-admitted block), must agree byte for byte.
    #[test]
    fn repeated_reads_of_the_same_window_agree(
        offset in 0usize..(NUM_BLOCKS * BLOCK_SIZE),
        len in 1usize..BLOCK_SIZE,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.dwarfs");
        build_multi_block_image(&path);

        let fs = Filesystem::open(&path, &ReaderOptions::default()).unwrap();
        let inode = fs.find_path("data.bin").unwrap().unwrap();
        let handle = fs.open(inode).unwrap();

        let first = fs.read(handle, offset as u64, len).unwrap();
        let second = fs.read(handle, offset as u64, len).unwrap();
        prop_assert_eq!(first, second);
    }
}

/// Bounded memory: after every block has been requested at least once, the
/// cache's accounted bytes must never exceed its configured budget by more
/// than one block's worth of in-flight admission slack.
#[test]
fn cache_stays_within_its_byte_budget() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("budget.dwarfs");
    build_multi_block_image(&path);

    let mut options = ReaderOptions::default();
    options.max_cache_bytes = (2 * BLOCK_SIZE) as u64;
    let fs = Filesystem::open(&path, &options).unwrap();
    let inode = fs.find_path("data.bin").unwrap().unwrap();
    let handle = fs.open(inode).unwrap();

    for i in 0..NUM_BLOCKS {
        let _ = fs.read(handle, (i * BLOCK_SIZE) as u64, BLOCK_SIZE).unwrap();
        let resident = fs.cache().current_bytes();
        assert!(
            resident <= options.max_cache_bytes + BLOCK_SIZE as u64,
            "resident bytes {resident} exceeded budget {} by more than one block",
            options.max_cache_bytes
        );
    }
}
