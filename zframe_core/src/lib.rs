pub mod buffer;
pub mod codec;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod reader;
pub mod session;
pub mod writer;

pub use buffer::{Buffer, BufferPool, BufferStats, PoolMetrics};
pub use codec::{Codec, Progress, Session, Status};
pub use error::{Error, Result};
pub use format::{FrameHeader, DEFAULT_FRAME_SIZE, HEADER_SIZE, MAGIC, MAX_FRAME_SIZE};
pub use pipeline::{compress, decompress, FramePipeline, PipelineConfig, Summary, MAX_TASKS};
pub use pool::{TaskHandle, ThreadPool};
pub use queue::OrderingQueue;
pub use reader::{FrameEntry, FrameReader};
pub use session::WorkerSessions;
pub use writer::FrameWriter;
