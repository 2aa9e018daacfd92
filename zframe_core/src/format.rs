/// Magic number opening every frame header.
///
/// Sits inside the reserved skippable-frame range `0x184D2A50..=0x184D2A5F`,
/// so generic LZ4/Zstandard tooling treats the header as opaque.
pub const MAGIC: u32 = 0x184D_2A5A;

/// Fixed size of a frame header in bytes.
///   magic:u32 + header_len:u32 + compressed_size:u32 + source_size:u32
///   = 4 + 4 + 4 + 4 = 16
pub const HEADER_SIZE: usize = 16;

/// Default raw bytes per frame on the encode side: 1 MiB.
pub const DEFAULT_FRAME_SIZE: usize = 1 << 20;

/// Largest raw frame the encoder will produce: 256 MiB.
///
/// Keeps every codec's worst-case bound comfortably inside a `u32`.
pub const MAX_FRAME_SIZE: usize = 256 << 20;

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 16-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the codec payload following the header.
    pub compressed_size: u32,
    /// Length of the payload once decoded.
    pub source_size: u32,
}

impl FrameHeader {
    pub fn new(compressed_size: u32, source_size: u32) -> Self {
        Self {
            compressed_size,
            source_size,
        }
    }

    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        buf[8..12].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.source_size.to_le_bytes());
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes.
    ///
    /// Returns `None` when the magic or the header length does not match; the
    /// caller treats that as the end of the stream.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Option<Self> {
        let field = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        if field(0) != MAGIC || field(4) != HEADER_SIZE as u32 {
            return None;
        }
        Some(Self {
            compressed_size: field(8),
            source_size: field(12),
        })
    }

    /// Whether the declared payload fits under the codec's worst-case bound
    /// for the declared source size.
    pub fn within_bound(&self, max_compressed_size: usize) -> bool {
        self.compressed_size as usize <= max_compressed_size
    }

    /// Header plus payload length on the wire.
    pub fn frame_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.compressed_size as u64
    }
}

/// Clamp a requested raw frame size into `1..=MAX_FRAME_SIZE`.
pub fn clamp_frame_size(frame_size: usize) -> usize {
    frame_size.clamp(1, MAX_FRAME_SIZE)
}
