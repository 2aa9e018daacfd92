use zframe_core::{Codec, Progress, Result, Session, Status};

/// No-op codec: stores frames verbatim, with no compression.
///
/// Useful for:
/// - Verifying the framing and ordering independently of any codec.
/// - Data that is already compressed (e.g., JPEG, MP4) where further
///   compression would expand the stream.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn max_level(&self) -> u32 {
        0
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        source_size
    }

    fn encoder(&self, _level: u32) -> Result<Box<dyn Session>> {
        Ok(Box::new(CopySession))
    }

    fn decoder(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(CopySession))
    }
}

/// Copies input to output; the frame is complete once the input is drained.
struct CopySession;

impl Session for CopySession {
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        let status = if n == input.len() {
            Status::Complete
        } else {
            Status::NeedsMoreOutput
        };
        Ok(Progress::new(n, n, status))
    }
}
