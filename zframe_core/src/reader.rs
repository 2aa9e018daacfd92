use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::codec::{Codec, Session};
use crate::error::{Error, Result};
use crate::format::{FrameHeader, HEADER_SIZE};
use crate::session::{check_header, decompress_frame};

/// Location and sizes of one frame inside a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    /// Byte offset of the frame header from the start of the stream.
    pub offset: u64,
    pub compressed_size: u32,
    pub source_size: u32,
}

/// Random-access reader for framed streams.
///
/// # Open sequence
/// Walk the stream header by header, seeking over each payload without
/// decoding it, and record where every frame starts. Scanning stops at the
/// first position that does not hold a valid header, exactly where a
/// streaming decode would stop.
///
/// # Access pattern
/// [`read_frame`](FrameReader::read_frame) seeks straight to one frame and
/// decodes only that frame.
pub struct FrameReader<R> {
    source: R,
    codec: Arc<dyn Codec>,
    entries: Vec<FrameEntry>,
    trailing_bytes: u64,
    session: Option<Box<dyn Session>>,
    payload: Buffer,
    out: Buffer,
}

impl<R: Read + Seek> FrameReader<R> {
    /// Index every frame in `source`.
    pub fn open(mut source: R, codec: Arc<dyn Codec>) -> Result<Self> {
        let stream_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut offset = 0u64;
        let mut header_buf = [0u8; HEADER_SIZE];
        while stream_len - offset >= HEADER_SIZE as u64 {
            source.read_exact(&mut header_buf)?;
            let Some(header) = FrameHeader::from_bytes(&header_buf) else {
                break;
            };
            let frame_index = entries.len() as u64;
            check_header(codec.as_ref(), frame_index, &header)?;
            if offset + header.frame_len() > stream_len {
                return Err(Error::corrupt(frame_index, "payload truncated"));
            }
            entries.push(FrameEntry {
                offset,
                compressed_size: header.compressed_size,
                source_size: header.source_size,
            });
            offset += header.frame_len();
            source.seek(SeekFrom::Start(offset))?;
        }

        Ok(Self {
            source,
            codec,
            entries,
            trailing_bytes: stream_len - offset,
            session: None,
            payload: Buffer::default(),
            out: Buffer::default(),
        })
    }

    /// Total number of frames in the stream.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.entries.len()
    }

    /// Access the raw `FrameEntry` slice (for inspection).
    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    /// Bytes after the last frame that do not form a valid header.
    pub fn trailing_bytes(&self) -> u64 {
        self.trailing_bytes
    }

    /// Total decoded size of all frames in bytes.
    pub fn raw_size(&self) -> u64 {
        self.entries.iter().map(|e| e.source_size as u64).sum()
    }

    /// Total payload size of all frames in bytes (excluding headers).
    pub fn compressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.compressed_size as u64).sum()
    }

    /// Compression ratio (raw / compressed).
    pub fn ratio(&self) -> f64 {
        let compressed = self.compressed_size();
        if compressed == 0 {
            return 1.0;
        }
        self.raw_size() as f64 / compressed as f64
    }

    /// Decode and return the raw bytes of frame `idx`.
    ///
    /// Only that frame's payload is read from the source.
    pub fn read_frame(&mut self, idx: usize) -> Result<Vec<u8>> {
        let entry = *self.entries.get(idx).ok_or_else(|| Error::FrameOutOfRange {
            index: idx,
            frames: self.entries.len(),
        })?;
        let frame_index = idx as u64;

        self.source
            .seek(SeekFrom::Start(entry.offset + HEADER_SIZE as u64))?;
        let len = entry.compressed_size as usize;
        self.payload.clear();
        self.payload.expand(len)?;
        self.source
            .read_exact(self.payload.as_mut_slice())
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => Error::corrupt(frame_index, "payload truncated"),
                _ => Error::Io(e),
            })?;

        let session = match &mut self.session {
            Some(session) => session,
            slot => slot.insert(self.codec.decoder()?),
        };
        let header = FrameHeader::new(entry.compressed_size, entry.source_size);
        decompress_frame(
            session.as_mut(),
            frame_index,
            header,
            self.payload.as_slice(),
            &mut self.out,
        )?;
        Ok(self.out.as_slice().to_vec())
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}
