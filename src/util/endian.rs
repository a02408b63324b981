//! Little-endian field readers/writers.
//!
//! Every on-disk structure in this crate is little-endian (spec §3, §6); the
//! teacher parses headers with `u32::from_le_bytes(buf[a..b].try_into()...)`
//! inline rather than through a parsing crate, and this module keeps that
//! idiom but factors out the repeated slice-and-convert so call sites read as
//! `read_u32_le(buf, 8)` instead of re-deriving the byte range each time.

/// Reads a `u16` at `offset` in `buf`. Panics if the slice is too short —
/// callers are expected to have already size-checked the section/header
/// they're reading from.
pub fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

pub fn read_u64_le(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

pub fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn write_u64_le(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Fallible counterparts used where a truncated buffer is an expected, not a
/// programmer, error (e.g. parsing a section header straight off disk).
pub fn try_read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

pub fn try_read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}
