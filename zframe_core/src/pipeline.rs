use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};

use crate::buffer::{Buffer, BufferPool, BufferStats, PoolMetrics};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::format::{clamp_frame_size, FrameHeader, DEFAULT_FRAME_SIZE, HEADER_SIZE};
use crate::pool::ThreadPool;
use crate::queue::{write_frame, OrderingQueue};
use crate::session::{check_header, clamp_level, compress_frame, decompress_frame, WorkerSessions};

/// Upper bound on concurrent worker loops per invocation.
pub const MAX_TASKS: usize = 32;

/// Tunables for a [`FramePipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Raw bytes per frame when compressing.
    pub frame_size: usize,
    /// Cap on worker loops, on top of the pool size and [`MAX_TASKS`].
    pub max_tasks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            max_tasks: MAX_TASKS,
        }
    }
}

impl PipelineConfig {
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = clamp_frame_size(frame_size);
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks.clamp(1, MAX_TASKS);
        self
    }
}

/// Totals for one compress or decompress call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub frames: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Multi-threaded, order-preserving frame compressor/decompressor.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use zframe_core::{FramePipeline, ThreadPool};
/// # fn codec() -> Arc<dyn zframe_core::Codec> { unimplemented!() }
///
/// let pool = ThreadPool::new(4)?;
/// let pipeline = FramePipeline::new(codec());
/// let mut packed = Vec::new();
/// pipeline.compress(&pool, &b"hello hello hello"[..], &mut packed, 3)?;
/// let mut unpacked = Vec::new();
/// pipeline.decompress(&pool, packed.as_slice(), &mut unpacked)?;
/// assert_eq!(unpacked, b"hello hello hello");
/// # Ok::<(), zframe_core::Error>(())
/// ```
pub struct FramePipeline {
    codec: Arc<dyn Codec>,
    config: PipelineConfig,
    metrics: PoolMetrics,
}

impl FramePipeline {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self::with_config(codec, PipelineConfig::default())
    }

    pub fn with_config(codec: Arc<dyn Codec>, config: PipelineConfig) -> Self {
        let config = PipelineConfig::default()
            .with_frame_size(config.frame_size)
            .with_max_tasks(config.max_tasks);
        Self {
            codec,
            config,
            metrics: PoolMetrics::default(),
        }
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Buffer counters accumulated over every call on this pipeline.
    pub fn buffer_stats(&self) -> BufferStats {
        self.metrics.snapshot()
    }

    /// Split `source` into frames, compress them on `pool`, and write the
    /// framed stream to `sink`.
    ///
    /// `level` above the codec's maximum is clamped.
    pub fn compress<R, W>(&self, pool: &ThreadPool, source: R, sink: W, level: u32) -> Result<Summary>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let job = Job {
            codec: self.codec.as_ref(),
            direction: Direction::Compress,
            level: clamp_level(self.codec.as_ref(), level),
            frame_size: self.config.frame_size,
        };
        self.run(pool, &job, source, sink)
    }

    /// Decode a framed stream from `source` on `pool`, writing the original
    /// bytes to `sink` in order.
    ///
    /// The stream ends at the first position that does not hold a valid
    /// frame header.
    pub fn decompress<R, W>(&self, pool: &ThreadPool, source: R, sink: W) -> Result<Summary>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let job = Job {
            codec: self.codec.as_ref(),
            direction: Direction::Decompress,
            level: 0,
            frame_size: self.config.frame_size,
        };
        self.run(pool, &job, source, sink)
    }

    fn run<R, W>(&self, pool: &ThreadPool, job: &Job<'_>, source: R, sink: W) -> Result<Summary>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let tasks = pool.size().min(self.config.max_tasks).min(MAX_TASKS);
        debug!(
            "{} {:?}: {} task(s) on a pool of {}",
            job.codec.name(),
            job.direction,
            tasks,
            pool.size()
        );
        let buffers = BufferPool::with_metrics(self.metrics.clone());
        let result = if tasks <= 1 {
            pool.with_sessions(|sessions| run_serial(job, sessions, source, sink, &buffers))
        } else {
            run_parallel(job, pool, tasks, source, sink, &buffers)
        };
        let released = buffers.release();
        debug!("released {} pooled buffer(s)", released);
        result
    }
}

/// Compress `source` into `sink` with `codec` and the default configuration.
pub fn compress<R, W>(
    pool: &ThreadPool,
    codec: Arc<dyn Codec>,
    source: R,
    sink: W,
    level: u32,
) -> Result<Summary>
where
    R: Read + Send,
    W: Write + Send,
{
    FramePipeline::new(codec).compress(pool, source, sink, level)
}

/// Decompress a framed stream from `source` into `sink` with `codec`.
pub fn decompress<R, W>(pool: &ThreadPool, codec: Arc<dyn Codec>, source: R, sink: W) -> Result<Summary>
where
    R: Read + Send,
    W: Write + Send,
{
    FramePipeline::new(codec).decompress(pool, source, sink)
}

// ── Frame claim and transform ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Compress,
    Decompress,
}

struct Job<'a> {
    codec: &'a dyn Codec,
    direction: Direction,
    level: u32,
    frame_size: usize,
}

enum Claimed {
    Raw { frame_index: u64, input: Buffer },
    Frame {
        frame_index: u64,
        header: FrameHeader,
        payload: Buffer,
    },
}

/// The read side of a run: the source and the next index to hand out.
struct InputSide<R> {
    source: R,
    in_frame: u64,
    exhausted: bool,
    bytes_in: u64,
}

impl<R: Read> InputSide<R> {
    fn new(source: R) -> Self {
        Self {
            source,
            in_frame: 0,
            exhausted: false,
            bytes_in: 0,
        }
    }
}

impl Job<'_> {
    /// Read the next frame's input and give it the next index.
    ///
    /// `None` once the source is exhausted; the source is not read again
    /// after that.
    fn claim<R: Read>(&self, input: &mut InputSide<R>, buffers: &BufferPool) -> Result<Option<Claimed>> {
        if input.exhausted {
            return Ok(None);
        }
        let frame_index = input.in_frame;
        let claimed = match self.direction {
            Direction::Compress => self.claim_raw(input, frame_index, buffers)?,
            Direction::Decompress => self.claim_frame(input, frame_index, buffers)?,
        };
        match claimed {
            Some(claimed) => {
                input.in_frame += 1;
                trace!("claimed frame {}", frame_index);
                Ok(Some(claimed))
            }
            None => {
                input.exhausted = true;
                trace!("source exhausted after {} frame(s)", frame_index);
                Ok(None)
            }
        }
    }

    fn claim_raw<R: Read>(
        &self,
        input: &mut InputSide<R>,
        frame_index: u64,
        buffers: &BufferPool,
    ) -> Result<Option<Claimed>> {
        let mut raw = buffers.acquire(self.frame_size)?;
        let filled = read_full(&mut input.source, raw.as_mut_slice())?;
        if filled < self.frame_size {
            input.exhausted = true;
        }
        if filled == 0 {
            buffers.recycle(raw);
            return Ok(None);
        }
        raw.truncate(filled);
        input.bytes_in += filled as u64;
        Ok(Some(Claimed::Raw {
            frame_index,
            input: raw,
        }))
    }

    fn claim_frame<R: Read>(
        &self,
        input: &mut InputSide<R>,
        frame_index: u64,
        buffers: &BufferPool,
    ) -> Result<Option<Claimed>> {
        let mut header_buf = [0u8; HEADER_SIZE];
        let filled = read_full(&mut input.source, &mut header_buf)?;
        if filled < HEADER_SIZE {
            if filled > 0 {
                debug!("ignoring {} trailing byte(s) after frame {}", filled, frame_index);
            }
            return Ok(None);
        }
        let Some(header) = FrameHeader::from_bytes(&header_buf) else {
            debug!("no frame header at frame {}; treating as end of stream", frame_index);
            return Ok(None);
        };
        check_header(self.codec, frame_index, &header)?;

        let len = header.compressed_size as usize;
        let mut payload = buffers.acquire(len)?;
        let filled = read_full(&mut input.source, &mut payload.as_mut_slice()[..len])?;
        if filled < len {
            return Err(Error::corrupt(frame_index, "payload truncated"));
        }
        payload.truncate(len);
        input.bytes_in += header.frame_len();
        Ok(Some(Claimed::Frame {
            frame_index,
            header,
            payload,
        }))
    }

    /// Run a claimed frame through this worker's codec session.
    fn transform(
        &self,
        claimed: Claimed,
        sessions: &mut WorkerSessions,
        buffers: &BufferPool,
    ) -> Result<(u64, Buffer)> {
        let mut out = buffers.acquire(0)?;
        match claimed {
            Claimed::Raw { frame_index, input } => {
                let session = sessions.encoder(self.codec, self.level)?;
                compress_frame(session, self.codec, input.as_slice(), &mut out)?;
                buffers.recycle(input);
                Ok((frame_index, out))
            }
            Claimed::Frame {
                frame_index,
                header,
                payload,
            } => {
                let session = sessions.decoder(self.codec)?;
                decompress_frame(session, frame_index, header, payload.as_slice(), &mut out)?;
                buffers.recycle(payload);
                Ok((frame_index, out))
            }
        }
    }
}

/// Fill `buf` from `source`, stopping early only at end of input.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}

// ── Single-threaded path ───────────────────────────────────────────────────

/// Read, transform, write, one frame at a time on the calling thread.
fn run_serial<R: Read, W: Write>(
    job: &Job<'_>,
    sessions: &mut WorkerSessions,
    source: R,
    mut sink: W,
    buffers: &BufferPool,
) -> Result<Summary> {
    let mut input = InputSide::new(source);
    let mut bytes_out = 0u64;
    while let Some(claimed) = job.claim(&mut input, buffers)? {
        let (frame_index, out) = job.transform(claimed, sessions, buffers)?;
        write_frame(&mut sink, frame_index, out.as_slice())?;
        bytes_out += out.len() as u64;
        buffers.recycle(out);
    }
    sink.flush()?;
    Ok(Summary {
        frames: input.in_frame,
        bytes_in: input.bytes_in,
        bytes_out,
    })
}

// ── Parallel path ──────────────────────────────────────────────────────────

/// State shared by every worker loop of one parallel run.
///
/// The read lock serializes claims, the write lock serializes submission and
/// the commit sweep. Neither is held while a frame is being transformed.
struct ThreadContext<'a, R, W> {
    job: &'a Job<'a>,
    input: Mutex<InputSide<R>>,
    output: Mutex<OrderingQueue<W>>,
    buffers: &'a BufferPool,
    failed: AtomicBool,
}

impl<R: Read, W: Write> ThreadContext<'_, R, W> {
    fn worker_loop(&self, sessions: &mut WorkerSessions) -> Result<u64> {
        let _unwind = FailOnUnwind(&self.failed);
        let result = self.claim_transform_submit(sessions);
        if result.is_err() {
            self.failed.store(true, Ordering::Release);
        }
        result
    }

    fn claim_transform_submit(&self, sessions: &mut WorkerSessions) -> Result<u64> {
        let mut frames = 0;
        while !self.failed.load(Ordering::Acquire) {
            let claimed = {
                let mut input = lock(&self.input)?;
                self.job.claim(&mut input, self.buffers)?
            };
            let Some(claimed) = claimed else {
                break;
            };
            let (frame_index, out) = self.job.transform(claimed, sessions, self.buffers)?;
            lock(&self.output)?.submit(frame_index, out, self.buffers)?;
            frames += 1;
        }
        Ok(frames)
    }

    /// Drop every frame still waiting in the queue and every pooled buffer.
    fn teardown(&self) -> (usize, usize) {
        let discarded = self
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .discard_pending();
        (discarded, self.buffers.release())
    }
}

/// Raises the shared failure flag if a worker unwinds.
struct FailOnUnwind<'a>(&'a AtomicBool);

impl Drop for FailOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::Release);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::WorkerPanicked("pipeline state lock poisoned".to_string()))
}

fn run_parallel<R, W>(
    job: &Job<'_>,
    pool: &ThreadPool,
    tasks: usize,
    source: R,
    sink: W,
    buffers: &BufferPool,
) -> Result<Summary>
where
    R: Read + Send,
    W: Write + Send,
{
    let mut queue = OrderingQueue::new(sink);
    // Nothing is tracked yet, so a failure here needs no cleanup.
    queue.reserve(tasks)?;

    let ctx = ThreadContext {
        job,
        input: Mutex::new(InputSide::new(source)),
        output: Mutex::new(queue),
        buffers,
        failed: AtomicBool::new(false),
    };

    let handles = pool.schedule_all(tasks, |sessions| ctx.worker_loop(sessions));

    let mut first_error = None;
    for (task, handle) in handles.into_iter().enumerate() {
        match handle.wait().and_then(|outcome| outcome) {
            Ok(frames) => trace!("task {} finished after {} frame(s)", task, frames),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(e) => warn!("discarding secondary failure from task {}: {}", task, e),
        }
    }

    let (discarded, released) = ctx.teardown();
    if discarded > 0 || released > 0 {
        debug!(
            "teardown discarded {} pending frame(s), released {} buffer(s)",
            discarded, released
        );
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let input = ctx.input.into_inner().unwrap_or_else(PoisonError::into_inner);
    let mut queue = ctx.output.into_inner().unwrap_or_else(PoisonError::into_inner);
    debug_assert_eq!(queue.pending_len(), 0);
    debug_assert_eq!(queue.out_frame(), input.in_frame);
    queue.flush()?;
    Ok(Summary {
        frames: queue.out_frame(),
        bytes_in: input.bytes_in,
        bytes_out: queue.bytes_committed(),
    })
}
