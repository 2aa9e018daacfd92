use std::io::{self, Write};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::codec::{Codec, Session};
use crate::error::Result;
use crate::format::{clamp_frame_size, DEFAULT_FRAME_SIZE};
use crate::queue::write_frame;
use crate::session::{clamp_level, compress_frame};

/// Single-threaded streaming writer for framed streams.
///
/// # Write contract
/// Call [`write`](Write::write) any number of times with arbitrary-sized
/// byte slices. The writer accumulates data and emits an independent frame
/// whenever `frame_size` bytes of raw data have been gathered.
/// Call [`finish`](FrameWriter::finish) to emit the remaining partial frame.
///
/// The output is byte-identical to [`FramePipeline::compress`] with the same
/// codec, level and frame size.
///
/// [`FramePipeline::compress`]: crate::FramePipeline::compress
pub struct FrameWriter<W: Write> {
    inner: W,
    codec: Arc<dyn Codec>,
    session: Box<dyn Session>,
    frame_size: usize,
    /// Pending raw bytes not yet emitted as a frame.
    pending: Vec<u8>,
    out: Buffer,
    frames: u64,
}

impl<W: Write> FrameWriter<W> {
    /// A writer using [`DEFAULT_FRAME_SIZE`].
    pub fn new(inner: W, codec: Arc<dyn Codec>, level: u32) -> Result<Self> {
        Self::with_frame_size(inner, codec, level, DEFAULT_FRAME_SIZE)
    }

    pub fn with_frame_size(
        inner: W,
        codec: Arc<dyn Codec>,
        level: u32,
        frame_size: usize,
    ) -> Result<Self> {
        let frame_size = clamp_frame_size(frame_size);
        let level = clamp_level(codec.as_ref(), level);
        let session = codec.encoder(level)?;
        Ok(Self {
            inner,
            codec,
            session,
            frame_size,
            pending: Vec::with_capacity(frame_size),
            out: Buffer::default(),
            frames: 0,
        })
    }

    /// Frames emitted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Compress the first `len` pending bytes as one frame and write it out.
    fn emit_frame(&mut self, len: usize) -> Result<()> {
        compress_frame(
            self.session.as_mut(),
            self.codec.as_ref(),
            &self.pending[..len],
            &mut self.out,
        )?;
        write_frame(&mut self.inner, self.frames, self.out.as_slice())?;
        self.pending.drain(..len);
        self.frames += 1;
        Ok(())
    }

    /// Emit any partial trailing frame and flush the inner writer.
    ///
    /// Returns the number of frames written and the inner writer.
    pub fn finish(mut self) -> Result<(u64, W)> {
        if !self.pending.is_empty() {
            let len = self.pending.len();
            self.emit_frame(len)?;
        }
        self.inner.flush()?;
        Ok((self.frames, self.inner))
    }
}

impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(data);
        while self.pending.len() >= self.frame_size {
            self.emit_frame(self.frame_size).map_err(io::Error::other)?;
        }
        Ok(data.len())
    }

    /// Flushes the inner writer only. A partial frame stays pending so that
    /// frame boundaries do not depend on flush timing.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
