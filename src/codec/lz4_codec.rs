use super::{CodecError, DecodeStatus, Decompressor};

/// LZ4 and LZ4HC share one decoder: the compressed block format is
/// identical regardless of which encoder effort produced it, only the
/// `CompressionType` discriminant in the section header differs (spec §3).
///
/// `lz4_flex` doesn't expose a streaming decompressor. The block cache
/// always hands a section's whole payload to `run` in one call (spec §4.4),
/// so this accumulates input across calls (in case a caller chooses to feed
/// it in pieces anyway) and only attempts the actual decode once asked to
/// and the accumulated size-prepended header says enough bytes are present.
pub struct Lz4Decoder {
    buf: Vec<u8>,
}

impl Lz4Decoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

impl Decompressor for Lz4Decoder {
    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<DecodeStatus, CodecError> {
        self.buf.extend_from_slice(input);

        match lz4_flex::block::decompress_size_prepended(&self.buf) {
            Ok(decoded) => {
                output.extend_from_slice(&decoded);
                Ok(DecodeStatus::Complete)
            }
            Err(e) => Err(CodecError::CorruptStream(e.to_string())),
        }
    }
}
