//! Crate-wide error taxonomy.
//!
//! Every module that can fail defines its own narrow error enum (see
//! [`crate::section::SectionError`], [`crate::codec::CodecError`], ...); this
//! module is the union type returned by the facade and the CLI. The mapping
//! mirrors spec §7's taxonomy directly rather than wrapping `std::io::Error`
//! everywhere, since most of these failures are format-level, not I/O-level.

use std::fmt;
use thiserror::Error;

use crate::codec::CodecError;
use crate::image::ImageError;
use crate::metadata::MetadataError;
use crate::section::SectionError;

#[derive(Error, Debug)]
pub enum DwarfsError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Section(#[from] SectionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("read past end of file: offset {offset} + {size} > {file_size}")]
    OutOfRange {
        offset: u64,
        size: u64,
        file_size: u64,
    },

    /// `SEEK_DATA`/`SEEK_HOLE` found no further boundary of the requested kind.
    #[error("no such device or address: no further {kind} boundary past offset {offset}")]
    NoSuchDeviceOrAddress { kind: SeekWhence, offset: u64 },

    #[error("not a directory: inode {inode}")]
    NotADirectory { inode: u32 },

    #[error("not a regular file: inode {inode}")]
    NotARegularFile { inode: u32 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("capacity exceeded: request of {requested} bytes exceeds cache limit of {limit} bytes")]
    CapacityExceeded { requested: u64, limit: u64 },

    /// A future was dropped before its decompression job completed.
    #[error("operation cancelled")]
    Cancelled,

    #[error("inode {inode} not found")]
    NoSuchInode { inode: u32 },

    #[error("no such entry: {0}")]
    NoSuchEntry(String),
}

pub type Result<T> = std::result::Result<T, DwarfsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Data,
    Hole,
}

impl fmt::Display for SeekWhence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeekWhence::Data => write!(f, "data"),
            SeekWhence::Hole => write!(f, "hole"),
        }
    }
}
