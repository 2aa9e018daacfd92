use thiserror::Error;

/// Every failure the pipeline can report.
///
/// Running out of input is not an error: an invalid or short frame header ends
/// the stream and the call returns `Ok`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("corrupt frame {frame_index}: {reason}")]
    CorruptFrame {
        frame_index: u64,
        reason: &'static str,
    },
    #[error("out of memory growing a buffer to {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("short write committing frame {frame_index} ({expected} bytes)")]
    ShortWrite { frame_index: u64, expected: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{codec} codec error: {message}")]
    Codec {
        codec: &'static str,
        message: String,
    },
    #[error("frame {frame_index} submitted twice (next to commit is {out_frame})")]
    DuplicateFrame { frame_index: u64, out_frame: u64 },
    #[error("unknown codec '{0}'")]
    UnknownCodec(String),
    #[error("frame {index} out of range (stream has {frames})")]
    FrameOutOfRange { index: usize, frames: usize },
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl Error {
    pub fn codec(codec: &'static str, message: impl ToString) -> Self {
        Self::Codec {
            codec,
            message: message.to_string(),
        }
    }

    pub(crate) fn corrupt(frame_index: u64, reason: &'static str) -> Self {
        Self::CorruptFrame {
            frame_index,
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
