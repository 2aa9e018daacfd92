use lz4_flex::block::{
    compress_into, decompress_into, get_maximum_output_size, CompressError, DecompressError,
};
use zframe_core::{Codec, Error, Progress, Result, Session, Status};

/// LZ4 block codec.
///
/// Fastest decompression of all bundled codecs. Each frame payload is one raw
/// LZ4 block, so a session is all-or-nothing per call: it either transforms
/// the whole frame or reports that the output slice is too small.
///
/// Best for: hot data, low-latency workloads. Levels are ignored.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn max_level(&self) -> u32 {
        0
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        get_maximum_output_size(source_size)
    }

    fn encoder(&self, _level: u32) -> Result<Box<dyn Session>> {
        Ok(Box::new(Lz4Encoder))
    }

    fn decoder(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(Lz4Decoder))
    }
}

struct Lz4Encoder;

impl Session for Lz4Encoder {
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        match compress_into(input, output) {
            Ok(written) => Ok(Progress::new(input.len(), written, Status::Complete)),
            Err(CompressError::OutputTooSmall) => Ok(Progress::new(0, 0, Status::NeedsMoreOutput)),
            #[allow(unreachable_patterns)]
            Err(e) => Err(Error::codec("lz4", e)),
        }
    }
}

struct Lz4Decoder;

impl Session for Lz4Decoder {
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        match decompress_into(input, output) {
            Ok(written) => Ok(Progress::new(input.len(), written, Status::Complete)),
            Err(DecompressError::OutputTooSmall { .. }) => {
                Ok(Progress::new(0, 0, Status::NeedsMoreOutput))
            }
            Err(e) => Err(Error::codec("lz4", e)),
        }
    }
}
