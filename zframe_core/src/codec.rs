use crate::error::Result;

/// Outcome of a single [`Session::transform`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The frame is finished: every input byte belonging to it was consumed
    /// and every output byte was produced.
    Complete,
    /// The output slice filled up before the frame was finished.
    NeedsMoreOutput,
    /// The input slice ran out before the frame was finished.
    NeedsMoreInput,
}

/// How far a [`Session::transform`] call got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub consumed: usize,
    pub produced: usize,
    pub status: Status,
}

impl Progress {
    pub fn new(consumed: usize, produced: usize, status: Status) -> Self {
        Self {
            consumed,
            produced,
            status,
        }
    }
}

/// Streaming state for one direction of a codec.
///
/// A session is owned by exactly one worker thread at a time and reused for
/// every frame that worker handles. Frames are independent, so the driver
/// calls [`reset`](Session::reset) before each one.
pub trait Session: Send {
    /// Forget any history from the previous frame.
    fn reset(&mut self) -> Result<()>;

    /// Push `input` through the codec into `output`.
    ///
    /// Encoders treat `input` as the rest of the frame's raw bytes and close
    /// the frame once it is consumed. Decoders treat it as the rest of the
    /// frame's payload. The driver calls again with the unconsumed input and
    /// the unfilled output until the status is [`Status::Complete`].
    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress>;
}

/// Core compression abstraction.
///
/// A `Codec` is a factory for [`Session`]s plus the facts the pipeline needs
/// to size buffers. It is shared by every worker, so it must be `Send + Sync`.
pub trait Codec: Send + Sync {
    /// Human-readable codec name for CLI display; also the session cache key.
    fn name(&self) -> &'static str;

    /// Highest meaningful compression level. Level 0 is always the fastest.
    fn max_level(&self) -> u32;

    /// Worst-case payload size for `source_size` raw bytes.
    fn max_compressed_size(&self, source_size: usize) -> usize;

    /// Create an encoding session at `level` (already clamped).
    fn encoder(&self, level: u32) -> Result<Box<dyn Session>>;

    /// Create a decoding session.
    fn decoder(&self) -> Result<Box<dyn Session>>;
}
