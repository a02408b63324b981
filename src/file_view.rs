//! File view — random-access window over the image file.
//!
//! Two backends behind one [`FileView`] trait object: [`MappedFileView`]
//! memory-maps the whole file (the common case — DwarFS images are read far
//! more than they're touched, so paging the kernel already does for free
//! beats any buffering this crate could add), and [`PositionalFileView`]
//! falls back to `pread`-style positional reads when mapping isn't available
//! (huge files on 32-bit address spaces, non-seekable sources piped through
//! a block device wrapper, or simply a platform without `mmap`).
//!
//! Windows returned by `segment_at` are reference-counted so overlapping
//! requests can alias freely; `release_until` is an advisory hint and every
//! backend is free to ignore it.

use std::fs::File;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{DwarfsError, Result};

/// A contiguous, already-resident slice of the image, keeping whatever
/// backing (mmap or owned buffer) alive for as long as any clone of it is
/// held.
#[derive(Clone)]
pub enum FileSegment {
    Mapped(Arc<memmap2::Mmap>, Range<usize>),
    Owned(Arc<Vec<u8>>),
}

impl FileSegment {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FileSegment::Mapped(mmap, range) => &mmap[range.clone()],
            FileSegment::Owned(buf) => buf.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One maximal run of either resident data or a hole, as reported by
/// `extents`. Offsets are relative to the file view, not the filesystem
/// image start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    Data(Range<u64>),
    Hole(Range<u64>),
}

/// Random-access byte range over the image file. Implementations may be
/// backed by `mmap`, a positional-read `File`, or (in tests) an in-memory
/// buffer; callers never need to know which.
pub trait FileView: Send + Sync {
    /// Total size of the view in bytes.
    fn size(&self) -> u64;

    /// Copies `size` bytes starting at `offset` into `dest`. `dest.len()`
    /// must equal `size`.
    fn copy_bytes(&self, dest: &mut [u8], offset: u64, size: u64) -> Result<()>;

    /// Returns a reference-counted window over `range`, valid until all
    /// clones are dropped regardless of later `release_until` calls.
    fn segment_at(&self, range: Range<u64>) -> Result<FileSegment>;

    /// Iterates the data/hole extents overlapping `range`. Views without
    /// sparse-file awareness report the whole range as one `Data` extent.
    fn extents(&self, range: Range<u64>) -> Result<Vec<Extent>> {
        self.check_range(range.start, range.end.saturating_sub(range.start))?;
        Ok(vec![Extent::Data(range)])
    }

    /// Advises the backend that bytes before `offset` are no longer needed.
    /// Purely advisory — every implementation may legally no-op this.
    fn release_until(&self, offset: u64);

    fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        let file_size = self.size();
        if offset.checked_add(size).map_or(true, |end| end > file_size) {
            return Err(DwarfsError::OutOfRange {
                offset,
                size,
                file_size,
            });
        }
        Ok(())
    }
}

/// `mmap`-backed view. The default backend: cheap to construct, and lets the
/// OS page cache do the buffering the block cache would otherwise have to
/// duplicate.
pub struct MappedFileView {
    mmap: Arc<memmap2::Mmap>,
}

impl MappedFileView {
    pub fn open(file: &File) -> Result<Self> {
        // Safety: the mapping is only ever read; the caller is responsible
        // for not truncating the backing file out from under us, matching
        // the lifetime contract `memmap2::Mmap::map` documents.
        let mmap = unsafe { memmap2::Mmap::map(file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
        })
    }
}

impl FileView for MappedFileView {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn copy_bytes(&self, dest: &mut [u8], offset: u64, size: u64) -> Result<()> {
        self.check_range(offset, size)?;
        let start = offset as usize;
        let end = start + size as usize;
        dest.copy_from_slice(&self.mmap[start..end]);
        Ok(())
    }

    fn segment_at(&self, range: Range<u64>) -> Result<FileSegment> {
        self.check_range(range.start, range.end.saturating_sub(range.start))?;
        Ok(FileSegment::Mapped(
            self.mmap.clone(),
            range.start as usize..range.end as usize,
        ))
    }

    fn release_until(&self, offset: u64) {
        let len = offset.min(self.mmap.len() as u64) as usize;
        if len > 0 {
            // Best-effort: madvise failures here aren't actionable.
            let _ = self.mmap.advise_range(memmap2::Advice::DontNeed, 0, len);
        }
    }
}

/// Positional-read fallback, used when `mmap` isn't appropriate. Reads go
/// straight through `read_at` with no internal buffering; the cache layer
/// above already owns the buffering policy.
pub struct PositionalFileView {
    file: File,
    size: u64,
}

impl PositionalFileView {
    pub fn open(file: File) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl FileView for PositionalFileView {
    fn size(&self) -> u64 {
        self.size
    }

    #[cfg(unix)]
    fn copy_bytes(&self, dest: &mut [u8], offset: u64, size: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.check_range(offset, size)?;
        self.file.read_exact_at(dest, offset)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn copy_bytes(&self, dest: &mut [u8], offset: u64, size: u64) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        self.check_range(offset, size)?;
        // No portable pread equivalent; serialize access through a clone of
        // the handle's cursor. Callers on non-Unix platforms pay for this
        // with contention, not incorrectness.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(dest)?;
        Ok(())
    }

    fn segment_at(&self, range: Range<u64>) -> Result<FileSegment> {
        let size = range.end.saturating_sub(range.start);
        self.check_range(range.start, size)?;
        let mut buf = vec![0u8; size as usize];
        self.copy_bytes(&mut buf, range.start, size)?;
        Ok(FileSegment::Owned(Arc::new(buf)))
    }

    fn release_until(&self, _offset: u64) {
        // No page cache mapping of our own to drop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mapped_view_round_trips() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello, dwarfs").unwrap();
        tmp.flush().unwrap();

        let view = MappedFileView::open(tmp.as_file()).unwrap();
        assert_eq!(view.size(), 13);

        let mut buf = [0u8; 5];
        view.copy_bytes(&mut buf, 7, 5).unwrap();
        assert_eq!(&buf, b"dwarf");

        let seg = view.segment_at(0..5).unwrap();
        assert_eq!(seg.as_slice(), b"hello");
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"short").unwrap();
        tmp.flush().unwrap();

        let view = MappedFileView::open(tmp.as_file()).unwrap();
        let mut buf = [0u8; 10];
        assert!(matches!(
            view.copy_bytes(&mut buf, 0, 10),
            Err(DwarfsError::OutOfRange { .. })
        ));
    }

    #[test]
    fn positional_view_matches_mapped() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"positional read path").unwrap();
        tmp.flush().unwrap();

        let file = tmp.reopen().unwrap();
        let view = PositionalFileView::open(file).unwrap();
        let mut buf = [0u8; 11];
        view.copy_bytes(&mut buf, 0, 11).unwrap();
        assert_eq!(&buf, b"positional ");
    }
}
