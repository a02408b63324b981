//! # dwarfs — DwarFS read path core
//!
//! A read-optimized, deduplicating, content-addressed archival file system.
//! This crate implements the read path only: parsing a DwarFS image,
//! decompressing its blocks on demand through a byte-budgeted cache, and
//! exposing the frozen metadata tree and inode data through a POSIX-shaped
//! facade. There is no writer here — images are produced by the reference
//! `mkdwarfs` tool and only ever consumed by this crate.
//!
//! Reading an image end to end touches, in order: [`file_view`] (the raw
//! byte window), [`section`] and [`image`] (the on-disk container format),
//! [`codec`] (per-block decompression), [`cache`] (the shared, byte-budgeted
//! block cache), [`metadata`] (the frozen directory tree), [`inode_reader`]
//! and [`file_reader`] (translating inode data into cache requests), and
//! finally [`filesystem`], which wires all of the above behind one facade.

pub mod byte_buffer;
pub mod cache;
pub mod cached_block;
pub mod codec;
pub mod config;
pub mod error;
pub mod file_reader;
pub mod file_view;
pub mod filesystem;
pub mod image;
pub mod inode_reader;
pub mod memory;
pub mod metadata;
pub mod offset_cache;
pub mod section;
pub mod util;
pub mod worker;

pub use config::{ImageOffset, ReaderOptions};
pub use error::{DwarfsError, Result, SeekWhence};
pub use filesystem::{Filesystem, StatVfs};
pub use inode_reader::ReadSegment;
pub use metadata::{InodeAttr, Metadata};
