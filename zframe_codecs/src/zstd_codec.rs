use zframe_core::{Codec, Error, Progress, Result, Session, Status, MAX_FRAME_SIZE};
use zstd::stream::raw::{CParameter, DParameter, Decoder, Encoder, InBuffer, Operation, OutBuffer};
use zstd::zstd_safe;

/// Zstandard streaming codec.
///
/// Each frame is one complete zstd frame with its content size and a content
/// checksum, so a damaged payload fails to decode instead of producing wrong
/// bytes.
///
/// Levels: 0 is zstd level 1 (fastest); `n` is zstd level `n` up to 22.
///
/// Best for: general text, JSON, logs, mixed structured data.
pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn max_level(&self) -> u32 {
        (*zstd::compression_level_range().end()).max(1) as u32
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        zstd_safe::compress_bound(source_size)
    }

    fn encoder(&self, level: u32) -> Result<Box<dyn Session>> {
        let mut inner = Encoder::new(level.max(1) as i32).map_err(zstd_error)?;
        inner
            .set_parameter(CParameter::ChecksumFlag(true))
            .map_err(zstd_error)?;
        Ok(Box::new(ZstdEncoder {
            inner,
            pledged: false,
        }))
    }

    fn decoder(&self) -> Result<Box<dyn Session>> {
        let mut inner = Decoder::new().map_err(zstd_error)?;
        // Single-segment frames use their content size as the window.
        inner
            .set_parameter(DParameter::WindowLogMax(MAX_FRAME_SIZE.trailing_zeros()))
            .map_err(zstd_error)?;
        Ok(Box::new(ZstdDecoder { inner }))
    }
}

fn zstd_error(e: std::io::Error) -> Error {
    Error::codec("zstd", e)
}

struct ZstdEncoder {
    inner: Encoder<'static>,
    /// Whether the current frame's content size has been declared.
    pledged: bool,
}

impl Session for ZstdEncoder {
    fn reset(&mut self) -> Result<()> {
        self.pledged = false;
        self.inner.reinit().map_err(zstd_error)
    }

    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        // The first call of a frame sees all of its raw bytes. Pledging them
        // yields single-segment frames with the content size in the header.
        if !self.pledged {
            self.inner
                .set_pledged_src_size(Some(input.len() as u64))
                .map_err(zstd_error)?;
            self.pledged = true;
        }
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(output);

        while src.pos() < input.len() {
            let before = (src.pos(), dst.pos());
            self.inner.run(&mut src, &mut dst).map_err(zstd_error)?;
            if (src.pos(), dst.pos()) == before {
                break;
            }
        }

        let status = if src.pos() < input.len() {
            Status::NeedsMoreOutput
        } else {
            // Returns how many bytes are still buffered; 0 once the frame
            // epilogue is fully written.
            match self.inner.finish(&mut dst, true).map_err(zstd_error)? {
                0 => Status::Complete,
                _ => Status::NeedsMoreOutput,
            }
        };
        Ok(Progress::new(src.pos(), dst.pos(), status))
    }
}

struct ZstdDecoder {
    inner: Decoder<'static>,
}

impl Session for ZstdDecoder {
    fn reset(&mut self) -> Result<()> {
        self.inner.reinit().map_err(zstd_error)
    }

    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let room = output.len();
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(output);

        let status = loop {
            let before = (src.pos(), dst.pos());
            // A zero hint means the frame is fully decoded and verified.
            let hint = self.inner.run(&mut src, &mut dst).map_err(zstd_error)?;
            if hint == 0 {
                break Status::Complete;
            }
            if dst.pos() == room {
                break Status::NeedsMoreOutput;
            }
            if src.pos() == input.len() || (src.pos(), dst.pos()) == before {
                break Status::NeedsMoreInput;
            }
        };
        Ok(Progress::new(src.pos(), dst.pos(), status))
    }
}
