use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

use super::{CodecError, DecodeStatus, Decompressor};

const SCRATCH_SIZE: usize = 64 * 1024;

/// Zstd is the one codec in this registry with a genuinely incremental
/// decoder: `zstd::stream::raw::Decoder` wraps libzstd's streaming API
/// directly, so `run` can be called with successive chunks of compressed
/// input and produce output as it becomes available rather than requiring
/// the whole frame up front.
pub struct ZstdDecoder {
    inner: zstd::stream::raw::Decoder<'static>,
    frame_complete: bool,
}

impl ZstdDecoder {
    pub fn new() -> Self {
        Self {
            inner: zstd::stream::raw::Decoder::new().expect("zstd decoder init"),
            frame_complete: false,
        }
    }
}

impl Decompressor for ZstdDecoder {
    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<DecodeStatus, CodecError> {
        let mut in_buffer = InBuffer::around(input);
        let mut scratch = [0u8; SCRATCH_SIZE];

        loop {
            let mut out_buffer = OutBuffer::around(&mut scratch[..]);
            let remaining_hint = self
                .inner
                .run(&mut in_buffer, &mut out_buffer)
                .map_err(|e| CodecError::CorruptStream(e.to_string()))?;

            let written = out_buffer.as_slice().len();
            if written > 0 {
                output.extend_from_slice(out_buffer.as_slice());
            }

            if remaining_hint == 0 {
                self.frame_complete = true;
                break;
            }
            if in_buffer.pos() >= input.len() && written == 0 {
                // No more input to feed and nothing new produced: wait for
                // the next `run` call with a fresh chunk.
                break;
            }
        }

        Ok(if self.frame_complete {
            DecodeStatus::Complete
        } else {
            DecodeStatus::NeedsMoreInput
        })
    }
}
