use std::io::Read;

use super::{CodecError, DecodeStatus, Decompressor};

/// Optional codec (the `brotli` feature). `brotli`'s decompressor reader
/// wants the whole compressed buffer behind a `Read`; this accumulates
/// input until asked for output and decodes once, same one-shot contract as
/// [`super::lzma_codec::LzmaDecoder`].
pub struct BrotliDecoder {
    buf: Vec<u8>,
}

impl BrotliDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

impl Decompressor for BrotliDecoder {
    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<DecodeStatus, CodecError> {
        self.buf.extend_from_slice(input);

        let mut reader = brotli::Decompressor::new(self.buf.as_slice(), 4096);
        let mut decoded = Vec::new();
        reader
            .read_to_end(&mut decoded)
            .map_err(|e| CodecError::CorruptStream(e.to_string()))?;
        output.extend_from_slice(&decoded);
        Ok(DecodeStatus::Complete)
    }
}
