//! Section — self-describing compressed blob header + payload.
//!
//! # On-disk layout (64 bytes, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      6   magic              = "DWARFS"
//!    6      1   major
//!    7      1   minor
//!    8      4   section_number     monotone from 0, dense, no gaps
//!   12      2   section_type       see `SectionType`
//!   14      2   compression        see `CompressionType`
//!   16      8   length             compressed payload length
//!   24     32   sha2_512_256       integrity hash over header tail + payload
//!   56      8   xxh3_64            fast checksum over header tail + payload
//! ```
//!
//! Either checksum verifying is sufficient (spec invariant 2); both covered
//! fields include everything in the header from byte 24 on, plus the
//! payload, mirroring `check_fast`/`check` in
//! `internal::fs_section` upstream.

use thiserror::Error;

use crate::file_view::{FileSegment, FileView};
use crate::util::endian::{read_u16_le, read_u32_le, read_u64_le, try_read_u64_le};

pub const MAGIC: &[u8; 6] = b"DWARFS";
pub const HEADER_SIZE: usize = 64;

const OFF_MAJOR: usize = 6;
const OFF_MINOR: usize = 7;
const OFF_SECTION_NUMBER: usize = 8;
const OFF_SECTION_TYPE: usize = 12;
const OFF_COMPRESSION: usize = 14;
const OFF_LENGTH: usize = 16;
const OFF_SHA2: usize = 24;
const OFF_XXH3: usize = 56;

#[derive(Error, Debug)]
pub enum SectionError {
    #[error("bad magic at offset {offset}")]
    BadMagic { offset: u64 },
    #[error("truncated section header at offset {offset}: need {need} bytes, have {have}")]
    TruncatedHeader { offset: u64, need: usize, have: usize },
    #[error("truncated section payload at offset {offset}: need {need} bytes, have {have}")]
    TruncatedPayload { offset: u64, need: u64, have: u64 },
    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("integrity check failed for section {section_number} (type {section_type:?})")]
    IntegrityCheck {
        section_number: u32,
        section_type: u16,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionType {
    Block,
    MetadataV2Schema,
    MetadataV2,
    History,
    SectionIndex,
    /// Any discriminant not in the set above; the reader skips these
    /// (forward compatibility, spec §4.3) rather than hard-failing.
    Unknown(u16),
}

impl SectionType {
    pub fn from_raw(v: u16) -> Self {
        match v {
            0 => SectionType::Block,
            1 => SectionType::MetadataV2Schema,
            2 => SectionType::MetadataV2,
            3 => SectionType::History,
            4 => SectionType::SectionIndex,
            other => SectionType::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            SectionType::Block => 0,
            SectionType::MetadataV2Schema => 1,
            SectionType::MetadataV2 => 2,
            SectionType::History => 3,
            SectionType::SectionIndex => 4,
            SectionType::Unknown(v) => v,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, SectionType::Unknown(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    None,
    Lzma,
    Zstd,
    Lz4,
    Lz4Hc,
    Brotli,
    Unknown(u16),
}

impl CompressionType {
    pub fn from_raw(v: u16) -> Self {
        match v {
            0 => CompressionType::None,
            1 => CompressionType::Lzma,
            2 => CompressionType::Zstd,
            3 => CompressionType::Lz4,
            4 => CompressionType::Lz4Hc,
            5 => CompressionType::Brotli,
            other => CompressionType::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lzma => 1,
            CompressionType::Zstd => 2,
            CompressionType::Lz4 => 3,
            CompressionType::Lz4Hc => 4,
            CompressionType::Brotli => 5,
            CompressionType::Unknown(v) => v,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, CompressionType::Unknown(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Lzma => "lzma",
            CompressionType::Zstd => "zstd",
            CompressionType::Lz4 => "lz4",
            CompressionType::Lz4Hc => "lz4hc",
            CompressionType::Brotli => "brotli",
            CompressionType::Unknown(_) => "unknown",
        }
    }
}

/// A parsed section header plus its location in the image. Cheap to copy;
/// the payload bytes themselves are only materialized when `segment` is
/// called.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub start: u64,
    pub major: u8,
    pub minor: u8,
    pub section_number: u32,
    pub section_type: SectionType,
    pub compression: CompressionType,
    pub length: u64,
}

impl Section {
    /// Parses the 64-byte header located at `offset` in `view`. Does not
    /// validate the payload is actually present; callers that need the
    /// payload should follow up with `segment`, which will surface a
    /// truncation error itself.
    pub fn parse(view: &dyn FileView, offset: u64) -> Result<Self, SectionError> {
        if offset + HEADER_SIZE as u64 > view.size() {
            return Err(SectionError::TruncatedHeader {
                offset,
                need: HEADER_SIZE,
                have: (view.size().saturating_sub(offset)) as usize,
            });
        }

        let mut buf = [0u8; HEADER_SIZE];
        view.copy_bytes(&mut buf, offset, HEADER_SIZE as u64)
            .map_err(|_| SectionError::TruncatedHeader {
                offset,
                need: HEADER_SIZE,
                have: 0,
            })?;

        if &buf[0..6] != MAGIC {
            return Err(SectionError::BadMagic { offset });
        }

        let major = buf[OFF_MAJOR];
        let minor = buf[OFF_MINOR];
        let section_number = read_u32_le(&buf, OFF_SECTION_NUMBER);
        let section_type = SectionType::from_raw(read_u16_le(&buf, OFF_SECTION_TYPE));
        let compression = CompressionType::from_raw(read_u16_le(&buf, OFF_COMPRESSION));
        let length = read_u64_le(&buf, OFF_LENGTH);

        Ok(Section {
            start: offset,
            major,
            minor,
            section_number,
            section_type,
            compression,
            length,
        })
    }

    /// Tries to parse a header at `offset` without treating a bad magic or a
    /// truncated buffer as hard errors — used by the image parser's
    /// candidate-offset probing (spec §4.2).
    pub fn try_parse(view: &dyn FileView, offset: u64) -> Option<Self> {
        Self::parse(view, offset).ok()
    }

    pub fn end(&self) -> u64 {
        self.start + HEADER_SIZE as u64 + self.length
    }

    /// Returns a segment spanning the whole section (header + payload).
    pub fn whole_segment(&self, view: &dyn FileView) -> Result<FileSegment, SectionError> {
        let total = HEADER_SIZE as u64 + self.length;
        if self.start + total > view.size() {
            return Err(SectionError::TruncatedPayload {
                offset: self.start,
                need: total,
                have: view.size().saturating_sub(self.start),
            });
        }
        view.segment_at(self.start..self.start + total)
            .map_err(|_| SectionError::TruncatedPayload {
                offset: self.start,
                need: total,
                have: view.size().saturating_sub(self.start),
            })
    }

    /// Returns a segment over just the payload bytes.
    pub fn payload_segment(&self, view: &dyn FileView) -> Result<FileSegment, SectionError> {
        let payload_start = self.start + HEADER_SIZE as u64;
        let payload_end = payload_start + self.length;
        if payload_end > view.size() {
            return Err(SectionError::TruncatedPayload {
                offset: payload_start,
                need: self.length,
                have: view.size().saturating_sub(payload_start),
            });
        }
        view.segment_at(payload_start..payload_end)
            .map_err(|_| SectionError::TruncatedPayload {
                offset: payload_start,
                need: self.length,
                have: view.size().saturating_sub(payload_start),
            })
    }

    fn sha2_expected(&self, whole: &FileSegment) -> [u8; 32] {
        whole.as_slice()[OFF_SHA2..OFF_SHA2 + 32]
            .try_into()
            .unwrap()
    }

    fn xxh3_expected(&self, whole: &FileSegment) -> u64 {
        read_u64_le(whole.as_slice(), OFF_XXH3)
    }

    /// Covered bytes for both checksums: everything in the header from
    /// `sha2_512_256` onward (i.e. past the header fields the checksums
    /// themselves don't cover), plus the payload.
    fn covered_bytes<'a>(&self, whole: &'a FileSegment) -> &'a [u8] {
        &whole.as_slice()[OFF_SHA2 + 32..]
    }

    /// Verifies only the fast `xxh3_64` checksum.
    pub fn check_fast(&self, view: &dyn FileView) -> Result<bool, SectionError> {
        let whole = self.whole_segment(view)?;
        let expected = self.xxh3_expected(&whole);
        let actual = xxhash_rust::xxh3::xxh3_64(self.covered_bytes(&whole));
        Ok(actual == expected)
    }

    /// Verifies the stronger `sha2_512_256` integrity hash.
    pub fn check(&self, view: &dyn FileView) -> Result<bool, SectionError> {
        use sha2::{Digest, Sha512_256};
        let whole = self.whole_segment(view)?;
        let expected = self.sha2_expected(&whole);
        let mut hasher = Sha512_256::new();
        hasher.update(self.covered_bytes(&whole));
        let actual: [u8; 32] = hasher.finalize().into();
        Ok(actual == expected)
    }

    /// Verifies either checksum (spec invariant 2: "Either the `xxh3_64` or
    /// the `sha2_512_256` field of each section verifies its payload").
    pub fn check_any(&self, view: &dyn FileView) -> Result<bool, SectionError> {
        Ok(self.check_fast(view)? || self.check(view)?)
    }
}

/// Decodes a section-index entry: `(type << 48) | offset_within_image`.
pub fn decode_index_entry(entry: u64) -> (u16, u64) {
    let section_type = (entry >> 48) as u16;
    let offset = entry & 0x0000_ffff_ffff_ffff;
    (section_type, offset)
}

pub fn encode_index_entry(section_type: u16, offset: u64) -> u64 {
    ((section_type as u64) << 48) | (offset & 0x0000_ffff_ffff_ffff)
}

/// Reads the trailing 8 bytes of the image as a candidate section-index
/// back-pointer, per spec §9's open question on index discovery.
pub fn read_trailing_pointer(buf_tail: &[u8]) -> Option<u64> {
    try_read_u64_le(buf_tail, buf_tail.len().checked_sub(8)?)
}
