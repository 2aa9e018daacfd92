use std::io::{ErrorKind, Write};

use log::trace;

use crate::buffer::{Buffer, BufferPool};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Slot {
    frame_index: u64,
    buffer: Buffer,
}

/// Commits frames finished in any order to a sink in frame order.
///
/// Workers [`submit`](OrderingQueue::submit) each transformed frame with its
/// index. Every submission runs a commit sweep that writes out the frame at
/// `out_frame`, then the one after it, for as long as they are pending. The
/// pending list is unordered; only `out_frame` decides what is written next.
#[derive(Debug)]
pub struct OrderingQueue<W> {
    sink: W,
    out_frame: u64,
    pending: Vec<Slot>,
    bytes_committed: u64,
}

impl<W: Write> OrderingQueue<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            out_frame: 0,
            pending: Vec::new(),
            bytes_committed: 0,
        }
    }

    /// Reserve room for `additional` pending slots without aborting on OOM.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.pending
            .try_reserve(additional)
            .map_err(|_| Error::OutOfMemory {
                requested: additional * std::mem::size_of::<Slot>(),
            })
    }

    /// Queue `buffer` as the output of `frame_index`, then commit everything
    /// that has become contiguous. Committed buffers go back to `pool`.
    ///
    /// # Errors
    /// Returns an error if the frame was already committed or is already
    /// pending, or if writing to the sink fails.
    pub fn submit(&mut self, frame_index: u64, buffer: Buffer, pool: &BufferPool) -> Result<()> {
        if frame_index < self.out_frame
            || self.pending.iter().any(|slot| slot.frame_index == frame_index)
        {
            return Err(Error::DuplicateFrame {
                frame_index,
                out_frame: self.out_frame,
            });
        }
        self.pending.push(Slot {
            frame_index,
            buffer,
        });
        self.sweep(pool)
    }

    fn sweep(&mut self, pool: &BufferPool) -> Result<()> {
        let mut i = self.pending.len();
        while i > 0 {
            i -= 1;
            if self.pending[i].frame_index != self.out_frame {
                continue;
            }
            let slot = self.pending.swap_remove(i);
            self.commit(slot, pool)?;
            // The next frame may already be waiting anywhere in the list.
            i = self.pending.len();
        }
        Ok(())
    }

    fn commit(&mut self, slot: Slot, pool: &BufferPool) -> Result<()> {
        let bytes = slot.buffer.as_slice();
        write_frame(&mut self.sink, slot.frame_index, bytes)?;
        trace!("committed frame {} ({} bytes)", slot.frame_index, bytes.len());
        self.bytes_committed += bytes.len() as u64;
        self.out_frame += 1;
        pool.recycle(slot.buffer);
        Ok(())
    }

    /// Index of the next frame to be written.
    pub fn out_frame(&self) -> u64 {
        self.out_frame
    }

    /// Frames finished but still waiting for an earlier one.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    /// Drop every pending frame. Returns how many were discarded.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

/// Write one finished frame's bytes to `sink`.
///
/// A sink that stops accepting bytes is a [`Error::ShortWrite`].
pub(crate) fn write_frame<W: Write>(sink: &mut W, frame_index: u64, bytes: &[u8]) -> Result<()> {
    sink.write_all(bytes).map_err(|e| match e.kind() {
        ErrorKind::WriteZero => Error::ShortWrite {
            frame_index,
            expected: bytes.len(),
        },
        _ => Error::Io(e),
    })
}
