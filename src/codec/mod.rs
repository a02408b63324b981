//! Codec registry — name/type → decoder factory.
//!
//! Unlike the container format this crate descends from, a DwarFS block's
//! compression is declared per-section (the `compression` field of the
//! section header, spec §3/§6), not negotiated once for the whole archive.
//! There is no "required codec list" to fail fast against; instead, asking
//! for a [`CompressionType`] with no registered [`Decompressor`] factory is
//! itself the failure (`UnknownCompression`, spec §7), surfaced the moment a
//! block using it is first decompressed rather than at open time, since an
//! image may contain sections in compression formats the caller never
//! touches.
//!
//! Each decoder implements [`Decompressor`], an incremental `run`-style
//! interface so the block cache (spec §4.7) can feed it compressed input
//! and drain uncompressed output without holding the whole decompressed
//! block in memory at once when the underlying library supports it. Only
//! Zstd genuinely streams; the other codecs decompress their whole frame on
//! the first call and report `Complete` immediately after, which still
//! satisfies the interface's contract.

mod brotli_codec;
mod lz4_codec;
mod lzma_codec;
mod none_codec;
mod zstd_codec;

use std::collections::HashMap;

use thiserror::Error;

use crate::section::CompressionType;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown or unregistered compression type {0:?}")]
    UnknownCompression(CompressionType),
    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),
    #[error("decompressed size {actual} does not match expected size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of one `run` call against a [`Decompressor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// More output will be produced by further `run` calls once more input
    /// is supplied (Zstd's true incremental path).
    NeedsMoreInput,
    /// The decoder has produced all of its output; the cache can freeze the
    /// destination buffer.
    Complete,
}

/// Streams compressed bytes into a growable destination buffer.
///
/// `run` may be called multiple times with successive chunks of compressed
/// input; implementations that can't stream (everything but Zstd, given the
/// crates available) simply decompress everything on the first call whose
/// accumulated input forms a complete frame and return `Complete`.
pub trait Decompressor: Send {
    /// Feeds `input` to the decoder, appending newly available uncompressed
    /// bytes to `output`. Returns whether the stream is fully drained.
    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<DecodeStatus, CodecError>;
}

type DecoderFactory = fn() -> Box<dyn Decompressor>;

/// Name → decoder factory lookup, populated with the built-in codecs at
/// construction and open to caller-registered ones (the FLAC/RicePP slot
/// spec.md calls out as optional: no crate in this dependency stack
/// implements them, so they ship unregistered and resolve to
/// `UnknownCompression` until a caller supplies one).
pub struct Registry {
    factories: HashMap<CompressionType, DecoderFactory>,
}

impl Registry {
    pub fn with_defaults() -> Self {
        let mut factories: HashMap<CompressionType, DecoderFactory> = HashMap::new();
        factories.insert(CompressionType::None, || Box::new(none_codec::NoneDecoder::new()));
        factories.insert(CompressionType::Zstd, || Box::new(zstd_codec::ZstdDecoder::new()));
        factories.insert(CompressionType::Lz4, || Box::new(lz4_codec::Lz4Decoder::new()));
        factories.insert(CompressionType::Lz4Hc, || Box::new(lz4_codec::Lz4Decoder::new()));
        #[cfg(feature = "brotli")]
        factories.insert(CompressionType::Brotli, || Box::new(brotli_codec::BrotliDecoder::new()));
        #[cfg(feature = "lzma")]
        factories.insert(CompressionType::Lzma, || Box::new(lzma_codec::LzmaDecoder::new()));
        Self { factories }
    }

    /// Registers (or overrides) the decoder factory for `ty`.
    pub fn register(&mut self, ty: CompressionType, factory: DecoderFactory) {
        self.factories.insert(ty, factory);
    }

    pub fn make_decoder(&self, ty: CompressionType) -> Result<Box<dyn Decompressor>, CodecError> {
        self.factories
            .get(&ty)
            .map(|f| f())
            .ok_or(CodecError::UnknownCompression(ty))
    }

    pub fn is_registered(&self, ty: CompressionType) -> bool {
        self.factories.contains_key(&ty)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Decompresses a complete, self-contained payload in one call — used by
/// tests and by anything that doesn't need the cache's incremental path.
pub fn decompress_all(
    registry: &Registry,
    ty: CompressionType,
    input: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let mut decoder = registry.make_decoder(ty)?;
    let mut output = Vec::new();
    decoder.run(input, &mut output)?;
    Ok(output)
}
