use super::{CodecError, DecodeStatus, Decompressor};

/// Optional codec (the `lzma` feature). `lzma-rs` decompresses a whole
/// stream in one call; same one-shot contract as the other non-Zstd
/// codecs here.
pub struct LzmaDecoder {
    buf: Vec<u8>,
}

impl LzmaDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

impl Decompressor for LzmaDecoder {
    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<DecodeStatus, CodecError> {
        self.buf.extend_from_slice(input);

        let mut decoded = Vec::new();
        let mut cursor = std::io::Cursor::new(&self.buf);
        lzma_rs::lzma_decompress(&mut cursor, &mut decoded)
            .map_err(|e| CodecError::CorruptStream(e.to_string()))?;
        output.extend_from_slice(&decoded);
        Ok(DecodeStatus::Complete)
    }
}
