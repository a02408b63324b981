use super::{CodecError, DecodeStatus, Decompressor};

/// Stored-verbatim codec — `CompressionType::None`.
#[derive(Default)]
pub struct NoneDecoder;

impl NoneDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decompressor for NoneDecoder {
    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<DecodeStatus, CodecError> {
        output.extend_from_slice(input);
        Ok(DecodeStatus::Complete)
    }
}
