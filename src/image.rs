//! Image parser — locates the filesystem start, walks section headers, and
//! loads the section index.
//!
//! An image is an optional opaque header prefix (e.g. a self-extracting
//! stub) followed by a contiguous run of sections, optionally terminated by
//! a `SectionIndex` section. When the caller doesn't pin a fixed offset,
//! `Image::open` scans for the magic at 512-byte boundaries — the real
//! on-disk convention for stub-prepended images — validating each candidate
//! by confirming its first section parses as a plausible `Block` or
//! `MetadataV2Schema` header before committing to it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::ImageOffset;
use crate::file_view::FileView;
use crate::section::{decode_index_entry, CompressionType, Section, SectionError, SectionType, HEADER_SIZE, MAGIC};

/// How far `ImageOffset::Auto` is willing to scan before giving up. Chosen
/// generously above any realistic self-extractor stub size while still
/// bounding the cost of probing non-DwarFS input.
const MAX_SCAN_BYTES: u64 = 16 * 1024 * 1024;
const SCAN_STRIDE: u64 = 512;

/// Newest format version this reader understands. A major bump signals a
/// wire-incompatible layout change; this reader has no forward-compat story
/// for one, so it rejects rather than misinterpreting an image it can't
/// actually read.
const SUPPORTED_MAJOR: u8 = 2;
const SUPPORTED_MINOR: u8 = 3;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("no DwarFS magic found within the first {0} bytes")]
    BadMagic(u64),
    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("image is truncated: {0}")]
    Truncated(#[from] SectionError),
    #[error("section index is corrupt: {0}")]
    IndexCorrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One entry of the (optional) section index: the section's type and its
/// byte offset within the image.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    pub section_type: u16,
    pub offset: u64,
}

pub struct Image {
    view: Arc<dyn FileView>,
    /// Byte offset of the first section header within `view`.
    filesystem_start: u64,
    /// Bytes preceding `filesystem_start` (e.g. a self-extractor stub).
    header_len: u64,
    major: u8,
    minor: u8,
    sections: Vec<Section>,
    index: Option<Vec<IndexEntry>>,
}

impl Image {
    #[instrument(skip_all)]
    pub fn open(view: Arc<dyn FileView>, offset: ImageOffset) -> Result<Self, ImageError> {
        let filesystem_start = match offset {
            ImageOffset::Fixed(off) => {
                probe_candidate(view.as_ref(), off).ok_or(ImageError::BadMagic(off))?;
                off
            }
            ImageOffset::Auto => scan_for_magic(view.as_ref())?,
        };
        debug!(filesystem_start, "located filesystem start");

        let first = Section::parse(view.as_ref(), filesystem_start)?;
        if !matches!(first.section_type, SectionType::Block | SectionType::MetadataV2Schema) {
            return Err(ImageError::BadMagic(filesystem_start));
        }
        if first.major != SUPPORTED_MAJOR || first.minor > SUPPORTED_MINOR {
            return Err(ImageError::UnsupportedVersion {
                major: first.major,
                minor: first.minor,
            });
        }

        let (sections, index) = walk_and_index(view.as_ref(), filesystem_start)?;
        info!(
            major = first.major,
            minor = first.minor,
            sections = sections.len(),
            has_index = index.is_some(),
            "opened image"
        );

        Ok(Image {
            view,
            filesystem_start,
            header_len: filesystem_start,
            major: first.major,
            minor: first.minor,
            sections,
            index,
        })
    }

    pub fn header(&self) -> crate::error::Result<Vec<u8>> {
        if self.header_len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; self.header_len as usize];
        self.view.copy_bytes(&mut buf, 0, self.header_len)?;
        Ok(buf)
    }

    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn filesystem_size(&self) -> u64 {
        self.sections
            .last()
            .map(|s| s.end() - self.filesystem_start)
            .unwrap_or(0)
    }

    pub fn filesystem_start(&self) -> u64 {
        self.filesystem_start
    }

    pub fn view(&self) -> &Arc<dyn FileView> {
        &self.view
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn index_entries(&self) -> Option<&[IndexEntry]> {
        self.index.as_deref()
    }

    /// Returns the sections of a given type, in on-disk order.
    pub fn sections_of_type(&self, ty: SectionType) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.section_type == ty)
    }
}

/// Validates that `offset` begins with the magic and that the header at
/// least parses (not a full section-chain validation — that's `walk_and_index`'s
/// job, which runs once a candidate offset is accepted).
fn probe_candidate(view: &dyn FileView, offset: u64) -> Option<()> {
    if offset + 6 > view.size() {
        return None;
    }
    let mut magic_buf = [0u8; 6];
    view.copy_bytes(&mut magic_buf, offset, 6).ok()?;
    if &magic_buf != MAGIC {
        return None;
    }
    let first = Section::try_parse(view, offset)?;
    if !first.compression.is_known() && first.compression != CompressionType::None {
        return None;
    }
    // Confirm there's room for a plausible follow-on header right after
    // this section (or that this section runs to EOF).
    let next_offset = first.end();
    if next_offset < view.size() {
        Section::try_parse(view, next_offset)?;
    }
    Some(())
}

fn scan_for_magic(view: &dyn FileView) -> Result<u64, ImageError> {
    let limit = view.size().min(MAX_SCAN_BYTES);
    let mut offset = 0u64;
    while offset < limit {
        if probe_candidate(view, offset).is_some() {
            return Ok(offset);
        }
        offset += SCAN_STRIDE;
    }
    Err(ImageError::BadMagic(limit))
}

/// Walks every section from `start` to EOF, and separately attempts the
/// fast path (trailing back-pointer into a `SectionIndex` section) before
/// trusting the sequential walk's own discovery of one.
fn walk_and_index(
    view: &dyn FileView,
    start: u64,
) -> Result<(Vec<Section>, Option<Vec<IndexEntry>>), ImageError> {
    let mut sections = Vec::new();
    let mut index = None;
    let mut offset = start;
    let file_size = view.size();
    let mut expected_number = 0u32;

    while offset < file_size {
        let section = Section::parse(view, offset)?;
        if section.section_number != expected_number {
            return Err(ImageError::IndexCorrupt(format!(
                "section_number {} is not dense (expected {})",
                section.section_number, expected_number
            )));
        }
        expected_number += 1;

        if section.section_type == SectionType::SectionIndex {
            index = Some(parse_index_section(view, &section)?);
        }

        offset = section.end();
        sections.push(section);
    }

    // Fast path per spec §9: the last 8 bytes of the image may encode a
    // `(SectionIndex << 48) | offset` back-pointer. Prefer it over the
    // sequentially discovered index when it resolves to the same section,
    // since it's what lets a future reader skip the walk entirely; when it
    // disagrees we keep what the walk actually found rather than trusting
    // an unverifiable pointer.
    if index.is_none() && file_size >= 8 {
        let mut tail = [0u8; 8];
        if view.copy_bytes(&mut tail, file_size - 8, 8).is_ok() {
            let entry = u64::from_le_bytes(tail);
            let (ty, candidate_offset) = decode_index_entry(entry);
            if ty == SectionType::SectionIndex.to_raw() {
                if let Some(s) = sections
                    .iter()
                    .find(|s| s.start == candidate_offset && s.section_type == SectionType::SectionIndex)
                {
                    index = Some(parse_index_section(view, s)?);
                }
            }
        }
    }

    Ok((sections, index))
}

fn parse_index_section(view: &dyn FileView, section: &Section) -> Result<Vec<IndexEntry>, ImageError> {
    if !section.check_any(view).map_err(ImageError::Truncated)? {
        return Err(ImageError::IndexCorrupt(format!(
            "checksum mismatch on section index at offset {}",
            section.start
        )));
    }
    let payload = section.payload_segment(view).map_err(ImageError::Truncated)?;
    let bytes = payload.as_slice();
    if bytes.len() % 8 != 0 {
        return Err(ImageError::IndexCorrupt(format!(
            "section index payload length {} is not a multiple of 8",
            bytes.len()
        )));
    }
    let entries = bytes
        .chunks_exact(8)
        .map(|chunk| {
            let raw = u64::from_le_bytes(chunk.try_into().unwrap());
            let (section_type, offset) = decode_index_entry(raw);
            IndexEntry { section_type, offset }
        })
        .collect();
    Ok(entries)
}

// `HEADER_SIZE` is re-exported for callers that need to step past a known
// section without re-parsing it (e.g. the CLI's `--info` dump).
pub use crate::section::HEADER_SIZE as SECTION_HEADER_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::ops::Range;
    use std::sync::Arc as StdArc;

    struct MemView(Vec<u8>);
    impl FileView for MemView {
        fn size(&self) -> u64 {
            self.0.len() as u64
        }
        fn copy_bytes(&self, dest: &mut [u8], offset: u64, size: u64) -> Result<()> {
            let start = offset as usize;
            dest.copy_from_slice(&self.0[start..start + size as usize]);
            Ok(())
        }
        fn segment_at(&self, range: Range<u64>) -> Result<crate::file_view::FileSegment> {
            Ok(crate::file_view::FileSegment::Owned(StdArc::new(
                self.0[range.start as usize..range.end as usize].to_vec(),
            )))
        }
        fn release_until(&self, _offset: u64) {}
    }

    fn build_section(number: u32, ty: u16, compression: u16, payload: &[u8]) -> Vec<u8> {
        use sha2::{Digest, Sha512_256};
        let mut buf = vec![0u8; HEADER_SIZE + payload.len()];
        buf[0..6].copy_from_slice(MAGIC);
        buf[6] = 2;
        buf[7] = 3;
        buf[8..12].copy_from_slice(&number.to_le_bytes());
        buf[12..14].copy_from_slice(&ty.to_le_bytes());
        buf[14..16].copy_from_slice(&compression.to_le_bytes());
        buf[16..24].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        buf[HEADER_SIZE..].copy_from_slice(payload);

        let covered = buf[56..].to_vec();
        let mut hasher = Sha512_256::new();
        hasher.update(&covered);
        let sha: [u8; 32] = hasher.finalize().into();
        buf[24..56].copy_from_slice(&sha);
        let xxh = xxhash_rust::xxh3::xxh3_64(&covered);
        buf[56..64].copy_from_slice(&xxh.to_le_bytes());
        buf
    }

    #[test]
    fn opens_fixed_offset_image() {
        let mut raw = build_section(0, 0, 0, b"block data");
        raw.extend(build_section(1, 2, 0, b"metadata"));
        let view: Arc<dyn FileView> = Arc::new(MemView(raw));
        let image = Image::open(view, ImageOffset::Fixed(0)).unwrap();
        assert_eq!(image.sections().len(), 2);
        assert_eq!(image.version(), (2, 3));
        assert!(!image.has_index());
    }

    #[test]
    fn auto_scans_past_a_stub_prefix() {
        let mut raw = vec![0u8; 512];
        raw.extend(build_section(0, 1, 0, b"schema"));
        raw.extend(build_section(1, 2, 0, b"metadata"));
        let view: Arc<dyn FileView> = Arc::new(MemView(raw));
        let image = Image::open(view, ImageOffset::Auto).unwrap();
        assert_eq!(image.filesystem_start(), 512);
        assert_eq!(image.header().unwrap().len(), 512);
    }

    #[test]
    fn rejects_unsupported_major_version() {
        let mut raw = build_section(0, 0, 0, b"a");
        raw[6] = 3;
        let view: Arc<dyn FileView> = Arc::new(MemView(raw));
        assert!(matches!(
            Image::open(view, ImageOffset::Fixed(0)),
            Err(ImageError::UnsupportedVersion { major: 3, minor: 3 })
        ));
    }

    #[test]
    fn rejects_non_dense_section_numbers() {
        let mut raw = build_section(0, 0, 0, b"a");
        raw.extend(build_section(5, 2, 0, b"b"));
        let view: Arc<dyn FileView> = Arc::new(MemView(raw));
        assert!(matches!(
            Image::open(view, ImageOffset::Fixed(0)),
            Err(ImageError::IndexCorrupt(_))
        ));
    }
}
