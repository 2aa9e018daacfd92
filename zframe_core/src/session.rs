use log::{debug, trace};

use crate::buffer::Buffer;
use crate::codec::{Codec, Session, Status};
use crate::error::{Error, Result};
use crate::format::{FrameHeader, HEADER_SIZE, MAX_FRAME_SIZE};

/// Clamp `level` to the highest level `codec` supports.
pub fn clamp_level(codec: &dyn Codec, level: u32) -> u32 {
    let max = codec.max_level();
    if level > max {
        debug!(
            "{} level {} exceeds maximum {}; clamping",
            codec.name(),
            level,
            max
        );
        max
    } else {
        level
    }
}

/// Reject a header whose declared sizes no encoder would have written.
///
/// Runs before anything is allocated for the frame, so a hostile header
/// cannot size a buffer.
pub fn check_header(codec: &dyn Codec, frame_index: u64, header: &FrameHeader) -> Result<()> {
    let source_size = header.source_size as usize;
    if source_size > MAX_FRAME_SIZE {
        return Err(Error::corrupt(
            frame_index,
            "declared source size exceeds the largest frame",
        ));
    }
    if !header.within_bound(codec.max_compressed_size(source_size)) {
        return Err(Error::corrupt(
            frame_index,
            "declared payload exceeds the codec's worst-case bound",
        ));
    }
    Ok(())
}

/// Compress `raw` as one independent frame into `out`, header included.
///
/// `out` is sized to the codec's worst-case bound up front and grown if the
/// codec still asks for room.
pub fn compress_frame(
    session: &mut dyn Session,
    codec: &dyn Codec,
    raw: &[u8],
    out: &mut Buffer,
) -> Result<FrameHeader> {
    session.reset()?;
    out.clear();
    out.expand(HEADER_SIZE + codec.max_compressed_size(raw.len()))?;

    let mut consumed = 0;
    let mut produced = 0;
    loop {
        let progress = session.transform(
            &raw[consumed..],
            &mut out.as_mut_slice()[HEADER_SIZE + produced..],
        )?;
        consumed += progress.consumed;
        produced += progress.produced;
        match progress.status {
            Status::Complete => break,
            Status::NeedsMoreOutput => {
                let grown = out.len().saturating_mul(2);
                out.expand(grown)?;
            }
            Status::NeedsMoreInput => {
                return Err(Error::codec(
                    codec.name(),
                    "encoder asked for input past the end of the frame",
                ))
            }
        }
    }

    let compressed_size = u32::try_from(produced)
        .map_err(|_| Error::codec(codec.name(), "compressed frame exceeds u32 range"))?;
    let source_size = u32::try_from(raw.len())
        .map_err(|_| Error::codec(codec.name(), "raw frame exceeds u32 range"))?;
    let header = FrameHeader::new(compressed_size, source_size);
    out.truncate(HEADER_SIZE + produced);
    out.as_mut_slice()[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    Ok(header)
}

/// Decode one frame's `payload` into `out`.
///
/// The header's `source_size` is the exact expected output. A codec that
/// wants to write past it, stops short of it, or runs out of payload
/// mid-frame means the frame is corrupt.
pub fn decompress_frame(
    session: &mut dyn Session,
    frame_index: u64,
    header: FrameHeader,
    payload: &[u8],
    out: &mut Buffer,
) -> Result<()> {
    let source_size = header.source_size as usize;
    if source_size > MAX_FRAME_SIZE {
        return Err(Error::corrupt(
            frame_index,
            "declared source size exceeds the largest frame",
        ));
    }
    session.reset()?;
    out.clear();
    // One spare byte: a frame that overruns its declared size shows up as
    // extra output instead of as a full slice the codec stopped on.
    out.expand(source_size + 1)?;

    let mut consumed = 0;
    let mut produced = 0;
    loop {
        let progress =
            session.transform(&payload[consumed..], &mut out.as_mut_slice()[produced..])?;
        consumed += progress.consumed;
        produced += progress.produced;
        match progress.status {
            Status::Complete => break,
            Status::NeedsMoreOutput if produced < out.len() => {
                // The codec stopped early without filling the slice; retry
                // with what is left.
                if progress.consumed == 0 && progress.produced == 0 {
                    return Err(Error::corrupt(frame_index, "codec made no progress"));
                }
            }
            Status::NeedsMoreOutput => {
                return Err(Error::corrupt(
                    frame_index,
                    "frame decodes past its declared size",
                ))
            }
            Status::NeedsMoreInput => {
                return Err(Error::corrupt(frame_index, "payload ended mid-frame"))
            }
        }
    }

    if produced != source_size {
        return Err(Error::corrupt(
            frame_index,
            "decoded size does not match header",
        ));
    }
    if consumed != payload.len() {
        return Err(Error::corrupt(frame_index, "trailing bytes after frame end"));
    }
    out.truncate(produced);
    trace!(
        "decoded frame {} ({} -> {} bytes)",
        frame_index,
        consumed,
        produced
    );
    Ok(())
}

struct CachedSession {
    codec: &'static str,
    level: u32,
    session: Box<dyn Session>,
}

impl CachedSession {
    fn matches(&self, codec: &dyn Codec, level: u32) -> bool {
        self.codec == codec.name() && self.level == level
    }
}

/// The codec sessions owned by one worker thread.
///
/// Each direction is created on first use and kept until the codec or level
/// changes, so a worker pays session setup once rather than per frame.
#[derive(Default)]
pub struct WorkerSessions {
    encoder: Option<CachedSession>,
    decoder: Option<CachedSession>,
}

impl WorkerSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The encoder for `codec` at `level`, creating it if needed.
    pub fn encoder(&mut self, codec: &dyn Codec, level: u32) -> Result<&mut dyn Session> {
        let cached = match self.encoder.take() {
            Some(cached) if cached.matches(codec, level) => cached,
            _ => {
                debug!("creating {} encoder session at level {}", codec.name(), level);
                CachedSession {
                    codec: codec.name(),
                    level,
                    session: codec.encoder(level)?,
                }
            }
        };
        Ok(self.encoder.insert(cached).session.as_mut())
    }

    /// The decoder for `codec`, creating it if needed.
    pub fn decoder(&mut self, codec: &dyn Codec) -> Result<&mut dyn Session> {
        let cached = match self.decoder.take() {
            Some(cached) if cached.matches(codec, 0) => cached,
            _ => {
                debug!("creating {} decoder session", codec.name());
                CachedSession {
                    codec: codec.name(),
                    level: 0,
                    session: codec.decoder()?,
                }
            }
        };
        Ok(self.decoder.insert(cached).session.as_mut())
    }
}
